//! `POST /login` and `POST /logout` (§6.1). Credential verification is an
//! external collaborator per spec.md §9 Open Question #2; this gateway
//! resolves it by looking the username up in a `users` table on the primary
//! pool and checking the stored hash with [`crate::auth::password`].

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use dbgateway_core::{Error as CoreError, Params};

use crate::auth::{self, AuthUser};
use crate::http::{Error, Result, ValidatedJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /login` (§6.1): `{username, password}` → signed JWT, or 401 when
/// the username is unknown or the password doesn't verify. Both failure
/// modes return the same `Unauthorized` error so a caller can't use timing
/// or response shape to enumerate valid usernames.
pub async fn login(State(state): State<AppState>, ValidatedJson(req): ValidatedJson<LoginRequest>) -> Result<Json<JsonValue>> {
    let mut guard = state.pool_manager.acquire(&state.primary_pool).await?;
    let engine = guard.engine();
    let table = engine.quote_identifier("users");
    let username_col = engine.quote_identifier("username");

    let params = Params::new().with("username", req.username.clone());
    let sql = format!("SELECT * FROM {table} WHERE {username_col} = @username");
    let rows = guard.execute_reader(&sql, &params).await?;
    drop(guard);

    let row = rows.rows.into_iter().next().ok_or(Error::Core(CoreError::Unauthorized))?;
    let stored_hash = row
        .get("password_hash")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| CoreError::Command("users.password_hash column missing or not text".into()))?
        .to_owned();

    if !auth::password::verify(req.password, stored_hash).await? {
        return Err(Error::Core(CoreError::Unauthorized));
    }

    let token = auth::issue(&state.jwt, &req.username)?;
    Ok(Json(serde_json::json!({ "success": true, "message": "logged in", "token": token })))
}

/// `POST /logout` (§6.1): revokes the presented token's `jti` so a future
/// request bearing the same JWT is rejected by [`AuthUser`] even though the
/// token itself hasn't expired.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> Result<Json<JsonValue>> {
    state.revoked_tokens.lock().expect("revoked token set lock poisoned").insert(auth.jti);
    Ok(Json(serde_json::json!({ "success": true, "message": "logged out" })))
}
