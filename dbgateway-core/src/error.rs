//! Error taxonomy shared by every layer of the gateway.
//!
//! The kinds here mirror the error taxonomy table in the design: each
//! variant is a *kind*, not a wrapped driver type, so that the HTTP edge can
//! map a kind to a status code without knowing anything about SQL Server,
//! PostgreSQL or MySQL error internals.

/// A specialized [`Result`] for the gateway core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A generic error that represents every way a gateway operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or missing configuration at startup or pool reconfiguration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Acquire timeout, unknown pool, or a pool in the process of shutting down.
    #[error("pool error: {0}")]
    Pool(#[from] PoolErrorKind),

    /// `Connect()` or engine session-init failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The driver returned an error for a query.
    #[error("command error: {0}")]
    Command(String),

    /// A required body or query field was absent.
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    /// A field was present but malformed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The request body was not a JSON object, or was empty when one was required.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The auth middleware denied the request.
    #[error("unauthorized")]
    Unauthorized,
}

/// The sub-kinds of [`Error::Pool`], split out so [`crate::connection::DbConnection`]
/// impls and the pool itself can construct them without reaching back into
/// the umbrella enum's string-formatting variants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolErrorKind {
    /// `Acquire` waited the full timeout without a connection becoming available.
    #[error("timed out waiting for a connection from pool {pool_name:?} after {waited_ms}ms")]
    Timeout { pool_name: String, waited_ms: u64 },

    /// The named pool does not exist in the manager's registry.
    #[error("no such pool: {0:?}")]
    UnknownPool(String),

    /// The pool (or the whole manager) is past `shuttingDown`/`destroyed`.
    #[error("pool {0:?} is shutting down")]
    ShuttingDown(String),

    /// `PoolManager::instance()` was called after `shutdown()`.
    #[error("pool manager has been destroyed and cannot be revived")]
    ManagerDestroyed,

    /// A connection create attempt during acquire failed.
    #[error("failed to create a new connection for pool {pool_name:?}: {reason}")]
    CreateFailed { pool_name: String, reason: String },
}

impl Error {
    /// The error kind name, used in logs and in the `exception_type` debug field.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Pool(_) => "PoolError",
            Error::Connection(_) => "ConnectionError",
            Error::Command(_) => "CommandError",
            Error::MissingParameter(_) => "MissingParameter",
            Error::InvalidParameter(_) => "InvalidParameter",
            Error::InvalidRequest(_) => "InvalidRequest",
            Error::Unauthorized => "Unauthorized",
        }
    }

    /// Whether the failure is transient (the caller could plausibly retry),
    /// used by the HTTP edge to choose between 500 and 503 for pool errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Pool(PoolErrorKind::Timeout { .. } | PoolErrorKind::CreateFailed { .. })
                | Error::Connection(_)
        )
    }
}

/// Helper for constructing a [`Error::Config`] with a formatted message,
/// mirroring the `protocol_err!`/`tls_err!` macros in the teacher's error
/// module but for our own config-validation messages.
#[macro_export]
macro_rules! config_err {
    ($($args:tt)*) => {
        $crate::error::Error::Config(format!($($args)*))
    };
}
