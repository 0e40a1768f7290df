//! `GET /status`, `GET /metrics` (§6.1), and the supplemented `GET /health`
//! liveness probe.

use axum::extract::State;
use axum::Json;
use serde_json::Value as JsonValue;

use crate::auth::AuthUser;
use crate::http::Result;
use crate::state::AppState;

/// `GET /health`: no auth, no database round-trip — just "the process is up
/// and answering requests", for load balancer / orchestrator liveness
/// probes. Distinct from `/status`, which reports pool health.
pub async fn health() -> Json<JsonValue> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /status` (§6.1): process + pool stats, unauthenticated by design so
/// external health checks don't need a credential.
pub async fn status(State(state): State<AppState>) -> Json<JsonValue> {
    let pools: Vec<JsonValue> = state
        .pool_manager
        .metrics_by_pool()
        .into_iter()
        .map(|(name, metrics)| {
            serde_json::json!({
                "pool": name,
                "currentSize": metrics.current_size,
                "active": metrics.active_count,
                "idle": metrics.idle_count,
                "waiters": metrics.waiters,
            })
        })
        .collect();

    Json(serde_json::json!({ "status": "ok", "pools": pools }))
}

/// `GET /metrics` (§6.1): the full per-pool metrics snapshot, behind auth
/// since it exposes more operational detail than `/status`.
pub async fn metrics(State(state): State<AppState>, _auth: AuthUser) -> Result<Json<JsonValue>> {
    let metrics = state.pool_manager.metrics_by_pool();
    Ok(Json(serde_json::to_value(metrics).expect("pool metrics always serialize")))
}
