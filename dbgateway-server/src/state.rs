//! Shared application state threaded through every handler via
//! `axum::State`, the same role `sqlx::PgPool` plays via `Extension` in the
//! reference example — except this gateway fronts many tenant pools, so the
//! state carries the whole [`PoolManager`] rather than a single pool.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dbgateway_pool::manager::EngineRegistry;
use dbgateway_pool::PoolManager;

use crate::config::JwtConfig;

/// Builds the [`EngineRegistry`] from whichever driver crates are compiled
/// in (feature-gated), the way `sqlx::any::install_default_drivers`
/// registers only the `Any` drivers enabled by Cargo features.
pub fn build_registry() -> EngineRegistry {
    let mut registry = EngineRegistry::new();

    #[cfg(feature = "postgres")]
    registry.register(dbgateway_core::Engine::Postgres, std::sync::Arc::new(|cfg| Box::pin(dbgateway_postgres::connect(cfg))));

    #[cfg(feature = "mysql")]
    registry.register(dbgateway_core::Engine::Mysql, std::sync::Arc::new(|cfg| Box::pin(dbgateway_mysql::connect(cfg))));

    #[cfg(feature = "mssql")]
    registry.register(dbgateway_core::Engine::Mssql, std::sync::Arc::new(|cfg| Box::pin(dbgateway_mssql::connect(cfg))));

    registry
}

/// Pool name the customer/sync/login controllers operate against. The core
/// (`PoolManager`) is genuinely multi-tenant; this HTTP surface is just one
/// consumer of it and, per spec.md §2 ("the core itself doesn't speak
/// HTTP"), picks a single named pool rather than routing by tenant.
pub const PRIMARY_POOL: &str = "primary";

/// State shared across every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool_manager: PoolManager,
    pub primary_pool: String,
    pub jwt: Arc<JwtConfig>,
    /// JWTs are stateless by construction; `POST /logout` (§6.1) needs
    /// *some* server-side effect, so logged-out token ids are tracked here
    /// until they'd have expired anyway. Bounded in practice by
    /// `expiration_hours`; an external implementation would back this with
    /// a shared cache instead of in-process memory.
    pub revoked_tokens: Arc<Mutex<HashSet<String>>>,
}

impl AppState {
    pub fn new(pool_manager: PoolManager, jwt: JwtConfig) -> Self {
        Self {
            pool_manager,
            primary_pool: PRIMARY_POOL.to_owned(),
            jwt: Arc::new(jwt),
            revoked_tokens: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}
