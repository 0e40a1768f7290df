//! Connection pooling (§4.2, §4.3): one [`SingleDbPool`] per tenant database
//! endpoint, registered with a process-wide [`PoolManager`].

pub mod manager;
pub mod metrics;
pub mod pooled_connection;
pub mod single_pool;

pub use manager::{EngineRegistry, PoolManager};
pub use metrics::PoolMetrics;
pub use pooled_connection::{ConnectionState, PooledConnection};
pub use single_pool::{Connector, PoolGuard, PoolLifecycle, SingleDbPool};
