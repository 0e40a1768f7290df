//! JWT issuance and validation (§6.1 `POST /login`, and the `Auth: yes`
//! column on every other route). An external collaborator per spec.md, but
//! a runnable gateway needs one, so it's built in the idiom of the
//! reference example's session handling — stateless claims rather than a
//! server-side session table, with `POST /logout` backed by a small revoked-
//! jti set (see [`crate::state::AppState::revoked_tokens`]).

pub mod password;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use dbgateway_core::Error as CoreError;

use crate::config::JwtConfig;
use crate::http::Error;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub jti: String,
}

/// Issues a signed JWT for `username`, expiring `jwt.expiration_hours` from
/// now (§6.3 `security.jwt.expirationHours`).
pub fn issue(jwt: &JwtConfig, username: &str) -> Result<String, Error> {
    let exp = OffsetDateTime::now_utc() + time::Duration::hours(jwt.expiration_hours as i64);
    let claims =
        Claims { sub: username.to_owned(), iss: jwt.issuer.clone(), aud: jwt.audience.clone(), exp: exp.unix_timestamp(), jti: Uuid::new_v4().to_string() };

    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(jwt.secret.as_bytes()))
        .map_err(|e| CoreError::Command(format!("failed to sign token: {e}")).into())
}

fn decode(jwt: &JwtConfig, token: &str) -> Result<Claims, Error> {
    let mut validation = Validation::default();
    validation.set_issuer(&[&jwt.issuer]);
    validation.set_audience(&[&jwt.audience]);

    jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(jwt.secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|_| CoreError::Unauthorized.into())
}

/// An authenticated request, extracted from the `Authorization: Bearer …`
/// header. Handlers that take `AuthUser` as a parameter automatically
/// reject unauthenticated or revoked-token requests with 401 before the
/// handler body runs.
pub struct AuthUser {
    pub username: String,
    pub jti: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::Core(CoreError::Unauthorized))?;

        let token = header.strip_prefix("Bearer ").ok_or(Error::Core(CoreError::Unauthorized))?;

        let claims = decode(&state.jwt, token)?;

        if state.revoked_tokens.lock().expect("revoked token set lock poisoned").contains(&claims.jti) {
            return Err(Error::Core(CoreError::Unauthorized));
        }

        Ok(AuthUser { username: claims.sub, jti: claims.jti })
    }
}
