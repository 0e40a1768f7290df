//! Facade crate: re-exports the pieces of the database gateway that an
//! embedding application needs, the way `sqlx`'s root crate re-exports
//! `sqlx-core` plus whichever engine crates are enabled by feature flag.

pub use dbgateway_core::{
    config::{ConnectionConfig, Engine, PoolingConfig, RetryConfig, TlsConfig},
    connection::{DbConnection, ParamValue, Params},
    error::{Error, Result},
};
pub use dbgateway_pool::{manager::PoolManager, metrics::PoolMetrics, single_pool::SingleDbPool};
pub use dbgateway_query::{QueryBuilder, SortDirection};
pub use dbgateway_sync::{get_changes, sync, SyncEntityKind, SyncResult};

#[cfg(feature = "postgres")]
pub use dbgateway_postgres::PostgresConnection;

#[cfg(feature = "mysql")]
pub use dbgateway_mysql::MySqlConnection;

#[cfg(feature = "mssql")]
pub use dbgateway_mssql::MssqlConnection;
