//! [`PoolManager`]: the process-wide registry of [`SingleDbPool`]s (§4.3).

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use dbgateway_core::error::PoolErrorKind;
use dbgateway_core::{ConnectionConfig, Error, Result};

use crate::metrics::PoolMetrics;
use crate::single_pool::{Connector, PoolGuard, SingleDbPool};

static INSTANCE: OnceLock<RwLock<Option<PoolManager>>> = OnceLock::new();

/// Registers the per-engine connection builders this manager dispatches to
/// when it creates a pool for a [`ConnectionConfig`]. Populated once at
/// startup from whichever `dbgateway-{postgres,mysql,mssql}` crates are
/// compiled in, the same role `sqlx::any::install_default_drivers` plays for
/// `AnyConnection`.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    connectors: HashMap<dbgateway_core::Engine, Connector>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: dbgateway_core::Engine, connector: Connector) {
        self.connectors.insert(engine, connector);
    }

    fn get(&self, engine: dbgateway_core::Engine) -> Option<Connector> {
        self.connectors.get(&engine).cloned()
    }
}

/// The process-wide singleton that owns every tenant's [`SingleDbPool`]
/// (§4.3). Obtained via [`PoolManager::init`] at startup and
/// [`PoolManager::instance`] everywhere else, the way a single `sqlx::Pool`
/// is threaded through `axum::State` — except this manager fronts many
/// pools, keyed by config name, because one gateway process serves many
/// tenants' database endpoints at once.
#[derive(Clone)]
pub struct PoolManager {
    registry: Arc<EngineRegistry>,
    pools: Arc<RwLock<HashMap<String, SingleDbPool>>>,
}

impl PoolManager {
    /// Initializes the process-wide instance. Must be called exactly once,
    /// before the first [`PoolManager::instance`] call; subsequent calls are
    /// a logic error (mirrors `sqlx`'s `install_default_drivers`, which also
    /// panics on double-install).
    pub fn init(registry: EngineRegistry) {
        let cell = INSTANCE.get_or_init(|| RwLock::new(None));
        let mut guard = cell.write().expect("pool manager lock poisoned");
        if guard.is_some() {
            panic!("PoolManager::init called more than once");
        }
        *guard = Some(PoolManager { registry: Arc::new(registry), pools: Arc::new(RwLock::new(HashMap::new())) });
    }

    /// Returns the process-wide instance, or a [`PoolErrorKind::ManagerDestroyed`]
    /// if [`PoolManager::shutdown_all`] already ran (§4.3, §9 Open Question: a
    /// destroyed manager is a logic error to keep using, never silently
    /// re-created).
    pub fn instance() -> Result<PoolManager> {
        let cell = INSTANCE.get().expect("PoolManager::init was never called");
        let guard = cell.read().expect("pool manager lock poisoned");
        guard
            .clone()
            .ok_or_else(|| Error::Pool(PoolErrorKind::ManagerDestroyed))
    }

    /// Registers a new pool from a validated config. Idempotent re-registration
    /// under the same name replaces the old pool after draining it (§4.3).
    pub async fn register_pool(&self, mut config: ConnectionConfig) -> Result<()> {
        config.validate()?;
        let connector = self
            .registry
            .get(config.engine)
            .ok_or_else(|| Error::Config(format!("no driver registered for engine {:?}", config.engine)))?;

        let pool = SingleDbPool::new(config.name.clone(), config.clone(), connector);
        let previous = {
            let mut pools = self.pools.write().expect("pools lock poisoned");
            pools.insert(config.name.clone(), pool)
        };
        if let Some(previous) = previous {
            previous.shutdown(Some(Duration::from_secs(5))).await;
        }
        Ok(())
    }

    /// Atomically replaces the entire named-pool set (§4.3): every new pool
    /// is built first, so a bad config in the middle of the list never
    /// touches live state, then the whole map is swapped under one
    /// write-lock acquisition. Any pool displaced by the swap — whether
    /// superseded by a same-named replacement or simply absent from
    /// `configs` — is drained and shut down afterwards.
    pub async fn configure_pools(&self, configs: Vec<ConnectionConfig>) -> Result<()> {
        let mut built = HashMap::with_capacity(configs.len());
        for mut config in configs {
            config.validate()?;
            let connector = self
                .registry
                .get(config.engine)
                .ok_or_else(|| Error::Config(format!("no driver registered for engine {:?}", config.engine)))?;
            let pool = SingleDbPool::new(config.name.clone(), config.clone(), connector);
            built.insert(config.name.clone(), pool);
        }

        let displaced = {
            let mut pools = self.pools.write().expect("pools lock poisoned");
            std::mem::replace(&mut *pools, built)
        };
        for (_, pool) in displaced {
            pool.shutdown(Some(Duration::from_secs(5))).await;
        }
        Ok(())
    }

    /// Looks up a pool by name and checks out a connection from it (§4.3).
    pub async fn acquire(&self, pool_name: &str) -> Result<PoolGuard> {
        let pool = self.pool(pool_name)?;
        pool.acquire(None).await
    }

    /// As [`PoolManager::acquire`], with an explicit acquire timeout override.
    pub async fn acquire_with_timeout(&self, pool_name: &str, timeout: Duration) -> Result<PoolGuard> {
        let pool = self.pool(pool_name)?;
        pool.acquire(Some(timeout)).await
    }

    pub fn pool(&self, pool_name: &str) -> Result<SingleDbPool> {
        self.pools
            .read()
            .expect("pools lock poisoned")
            .get(pool_name)
            .cloned()
            .ok_or_else(|| Error::Pool(PoolErrorKind::UnknownPool(pool_name.to_owned())))
    }

    pub fn pool_names(&self) -> Vec<String> {
        self.pools.read().expect("pools lock poisoned").keys().cloned().collect()
    }

    /// A metrics snapshot per registered pool, keyed by pool name (§4.2.5,
    /// surfaced at the `/metrics` HTTP endpoint).
    pub fn metrics_by_pool(&self) -> HashMap<String, PoolMetrics> {
        self.pools
            .read()
            .expect("pools lock poisoned")
            .iter()
            .map(|(name, pool)| (name.clone(), pool.metrics()))
            .collect()
    }

    /// Forces an out-of-band validation pass on every pool's idle
    /// connections, bypassing the lazy interval (used by health checks that
    /// want a stronger guarantee than "probably fine").
    pub async fn validate_all(&self) {
        let pools: Vec<_> = self.pools.read().expect("pools lock poisoned").values().cloned().collect();
        for pool in pools {
            pool.validate_idle().await;
        }
    }

    /// Drains and closes every pool, then marks the manager destroyed so any
    /// further [`PoolManager::instance`] call fails fast instead of handing
    /// back a manager with no usable pools (§9 Open Question resolution: we
    /// treat "manager used after shutdown" as a logic error, not a fallback
    /// to a fresh empty manager).
    pub async fn shutdown_all(grace: Option<Duration>) {
        let Some(cell) = INSTANCE.get() else { return };
        let manager = { cell.write().expect("pool manager lock poisoned").take() };
        let Some(manager) = manager else { return };

        let pools: Vec<_> = manager.pools.read().expect("pools lock poisoned").values().cloned().collect();
        for pool in pools {
            pool.shutdown(grace).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgateway_core::connection::DbConnection;
    use dbgateway_core::{Engine, ResultSet};

    #[derive(Debug)]
    struct NoopConnection;

    #[async_trait::async_trait]
    impl DbConnection for NoopConnection {
        fn engine(&self) -> Engine {
            Engine::Postgres
        }
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn start_transaction(&mut self) -> Result<()> {
            Ok(())
        }
        async fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        async fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            false
        }
        async fn execute(&mut self, _sql: &str, _params: &dbgateway_core::Params) -> Result<u64> {
            Ok(0)
        }
        async fn execute_scalar(
            &mut self,
            _sql: &str,
            _params: &dbgateway_core::Params,
        ) -> Result<Option<serde_json::Value>> {
            Ok(None)
        }
        async fn execute_reader(&mut self, _sql: &str, _params: &dbgateway_core::Params) -> Result<ResultSet> {
            Ok(ResultSet::default())
        }
        async fn version(&mut self) -> Result<String> {
            Ok("noop".into())
        }
        async fn get_tables(&mut self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn get_fields(&mut self, _table: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn set_query_timeout(&mut self, _sec: u32) {}
        fn query_timeout(&self) -> u32 {
            30
        }
    }

    fn noop_connector() -> Connector {
        Arc::new(|_cfg| Box::pin(async { Ok(Box::new(NoopConnection) as Box<dyn DbConnection>) }))
    }

    fn test_config(name: &str) -> ConnectionConfig {
        use dbgateway_core::config::{PoolingConfig, RetryConfig, TlsConfig};
        ConnectionConfig {
            name: name.into(),
            engine: Engine::Postgres,
            server: "localhost".into(),
            port: 5432,
            database: "db".into(),
            schema: None,
            username: "u".into(),
            password: "p".into(),
            application_name: "test".into(),
            extra_params: vec![],
            connect_timeout_sec: 5,
            command_timeout_sec: 5,
            pooling: PoolingConfig { enabled: true, min_size: 1, max_size: 2, idle_timeout_sec: 60, acquire_timeout_ms: 500 },
            tls: TlsConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    #[tokio::test]
    async fn unknown_pool_name_is_an_error() {
        let mut registry = EngineRegistry::new();
        registry.register(Engine::Postgres, noop_connector());
        let manager = PoolManager { registry: Arc::new(registry), pools: Arc::new(RwLock::new(HashMap::new())) };

        let err = manager.acquire("nope").await.unwrap_err();
        assert!(matches!(err, Error::Pool(PoolErrorKind::UnknownPool(_))));
    }

    #[tokio::test]
    async fn register_and_acquire_roundtrip() {
        let mut registry = EngineRegistry::new();
        registry.register(Engine::Postgres, noop_connector());
        let manager = PoolManager { registry: Arc::new(registry), pools: Arc::new(RwLock::new(HashMap::new())) };

        manager.register_pool(test_config("tenant_a")).await.unwrap();
        let guard = manager.acquire("tenant_a").await.unwrap();
        assert_eq!(guard.engine(), Engine::Postgres);
        assert_eq!(manager.pool_names(), vec!["tenant_a".to_string()]);
    }

    #[tokio::test]
    async fn metrics_by_pool_reflects_registered_pools() {
        let mut registry = EngineRegistry::new();
        registry.register(Engine::Postgres, noop_connector());
        let manager = PoolManager { registry: Arc::new(registry), pools: Arc::new(RwLock::new(HashMap::new())) };

        manager.register_pool(test_config("tenant_a")).await.unwrap();
        let metrics = manager.metrics_by_pool();
        assert!(metrics.contains_key("tenant_a"));
    }
}
