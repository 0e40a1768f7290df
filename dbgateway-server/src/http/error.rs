//! Maps [`dbgateway_core::Error`] kinds to HTTP status codes (§7) — the
//! equivalent of the reference example's `http::Error::status_code()`, but
//! dispatching on the gateway's own error kind table instead of wrapping
//! `sqlx::Error` directly.

use async_trait::async_trait;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;

use dbgateway_core::Error as CoreError;

/// The HTTP-edge error type every handler in this crate returns.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("request body is not valid JSON")]
    MalformedJson,

    #[error("{0}")]
    NotFound(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_message: Option<String>,
}

/// Whether debug-only fields (`exception_type`, `original_message`, §7) are
/// included in error bodies. Mirrors production/dev detection already used
/// by `ConnectionConfig::validate` (§3.1) rather than inventing a second
/// environment switch.
fn is_dev_build() -> bool {
    !dbgateway_core::config::is_production_env()
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Core(CoreError::Config(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Core(CoreError::Pool(_)) => {
                if self.as_core().map(CoreError::is_transient).unwrap_or(false) {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            Error::Core(CoreError::Connection(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Core(CoreError::Command(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Core(CoreError::MissingParameter(_))
            | Error::Core(CoreError::InvalidParameter(_))
            | Error::Core(CoreError::InvalidRequest(_))
            | Error::MalformedJson => StatusCode::BAD_REQUEST,
            Error::Core(CoreError::Unauthorized) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn as_core(&self) -> Option<&CoreError> {
        match self {
            Error::Core(e) => Some(e),
            Error::MalformedJson | Error::NotFound(_) => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            _ => self.as_core().map(CoreError::kind_name).unwrap_or("InvalidRequest"),
        }
    }
}

/// A `Json<T>` extractor whose rejection goes through [`Error`] so a
/// malformed request body gets the same `{success, message, code, ...}`
/// shape as every other failure, instead of axum's own plain-text default.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|_| Error::MalformedJson)?;
        Ok(ValidatedJson(value))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!(kind = self.kind_name(), %self, "request failed");

        let body = ErrorBody {
            success: false,
            message: self.to_string(),
            code: status.as_u16(),
            exception_type: is_dev_build().then(|| self.kind_name()),
            original_message: is_dev_build().then(|| format!("{self:?}")),
        };

        (status, Json(body)).into_response()
    }
}
