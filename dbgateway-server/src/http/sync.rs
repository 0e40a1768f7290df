//! `/sync/{entity}` batched upsert and `/sync/{entity}/changes` change feed
//! (§4.5, §6.1), thin HTTP wrappers around [`dbgateway_sync`].

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use time::format_description::well_known::Iso8601;
use time::OffsetDateTime;

use dbgateway_core::Error as CoreError;
use dbgateway_sync::{get_changes, sync, SyncEntityKind};

use crate::auth::AuthUser;
use crate::http::{Error, Result, ValidatedJson};
use crate::state::AppState;

fn entity_kind(segment: &str) -> std::result::Result<SyncEntityKind, Error> {
    SyncEntityKind::from_path_segment(segment)
        .ok_or_else(|| CoreError::InvalidRequest(format!("unknown sync entity {segment:?}")).into())
}

/// `POST /sync/{entity}` (§6.1): batched upsert, response shaped per §6.1's
/// mutation response contract (`processed`/`success`/`failed`/`errors`).
pub async fn sync_entity(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(entity): Path<String>,
    ValidatedJson(payload): ValidatedJson<JsonValue>,
) -> Result<Json<JsonValue>> {
    let kind = entity_kind(&entity)?;
    let mut guard = state.pool_manager.acquire(&state.primary_pool).await?;

    let result = sync(&mut *guard, kind, &payload).await?;

    Ok(Json(serde_json::json!({
        "success": result.fail_count == 0,
        "message": if result.fail_count == 0 { "sync completed" } else { "sync completed with errors" },
        "processed": result.total_processed,
        "succeeded": result.success_count,
        "failed": result.fail_count,
        "errors": result.error_summary(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ChangesQuery {
    #[serde(rename = "lastSync")]
    last_sync: String,
}

/// `GET /sync/{entity}/changes` (§6.1): rows changed after `lastSync`.
pub async fn get_entity_changes(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(entity): Path<String>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<JsonValue>> {
    let kind = entity_kind(&entity)?;
    let since = OffsetDateTime::parse(&query.last_sync, &Iso8601::DEFAULT)
        .map_err(|_| CoreError::InvalidParameter("lastSync must be an ISO-8601 timestamp".into()))?;

    let mut guard = state.pool_manager.acquire(&state.primary_pool).await?;
    let changes = get_changes(&mut *guard, kind, since).await?;

    Ok(Json(changes))
}
