//! [`SingleDbPool`]: a bounded pool of [`PooledConnection`]s for one
//! [`ConnectionConfig`] (§3.3/§4.2).

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use dbgateway_core::connection::DbConnection;
use dbgateway_core::error::PoolErrorKind;
use dbgateway_core::{ConnectionConfig, Error, Result};
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::metrics::{MetricsInner, PoolMetrics};
use crate::pooled_connection::{ConnectionState, PooledConnection};

/// Lazy-validation interval (§4.2.1 default).
const VALIDATION_INTERVAL: Duration = Duration::from_secs(300);
/// Poll granularity a waiter re-checks at while a pool is saturated (§4.2.1 fairness).
const WAIT_POLL: Duration = Duration::from_millis(250);
/// Hard wall-clock budget for one background cleanup cycle (§4.2.3).
const CLEANUP_BUDGET: Duration = Duration::from_secs(30);
/// Default grace window new connections get to finish before a forced close on shutdown.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Builds a freshly connected, session-initialized [`DbConnection`] for a
/// [`ConnectionConfig`]. Supplied by the engine-specific crate
/// (`dbgateway-postgres`, `dbgateway-mysql`, `dbgateway-mssql`) and
/// registered with the [`PoolManager`][crate::manager::PoolManager] at
/// startup, the way `sqlx_core::pool::inner::SharedPool` calls `DB::open`
/// without knowing which wire protocol that entails.
pub type Connector =
    Arc<dyn Fn(ConnectionConfig) -> BoxFuture<'static, Result<Box<dyn DbConnection>>> + Send + Sync>;

/// Lifecycle of a [`SingleDbPool`] (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolLifecycle {
    Created,
    Servicing,
    ShuttingDown,
    Closed,
}

struct Inner {
    name: String,
    config: ConnectionConfig,
    connector: Connector,
    idle: StdMutex<VecDeque<PooledConnection>>,
    active: StdMutex<HashMap<Uuid, PooledConnection>>,
    current_size: AtomicU32,
    shutting_down: AtomicBool,
    closed: AtomicBool,
    notify: Notify,
    metrics: MetricsInner,
    cleanup_task: AsyncMutex<Option<JoinHandle<()>>>,
}

/// A bounded pool of live connections for one [`ConnectionConfig`] (§3.3).
#[derive(Clone)]
pub struct SingleDbPool(Arc<Inner>);

/// A checked-out connection. Returned to the idle queue (or destroyed, per
/// §4.2.2) when dropped.
pub struct PoolGuard {
    conn: Option<PooledConnection>,
    pool: Option<SingleDbPool>,
}

impl Deref for PoolGuard {
    type Target = dyn DbConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("(bug) guard used after release").conn()
    }
}

impl DerefMut for PoolGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("(bug) guard used after release").conn_mut()
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        match self.pool.take() {
            Some(pool) => {
                tokio::spawn(async move { pool.release(conn).await });
            }
            None => {
                // Pooling disabled for this config: §4.2.6, release just disconnects.
                tokio::spawn(async move {
                    let mut conn = conn.into_conn();
                    let _ = conn.disconnect().await;
                });
            }
        }
    }
}

impl SingleDbPool {
    /// Creates a pool for `config` and starts its background cleanup task
    /// (§4.2.3) if pooling is enabled.
    pub fn new(name: impl Into<String>, config: ConnectionConfig, connector: Connector) -> Self {
        let pool = SingleDbPool(Arc::new(Inner {
            name: name.into(),
            config,
            connector,
            idle: StdMutex::new(VecDeque::new()),
            active: StdMutex::new(HashMap::new()),
            current_size: AtomicU32::new(0),
            shutting_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
            metrics: MetricsInner::default(),
            cleanup_task: AsyncMutex::new(None),
        }));

        if pool.0.config.pooling.enabled {
            pool.spawn_cleanup_task();
        }

        pool
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.0.config
    }

    pub fn lifecycle(&self) -> PoolLifecycle {
        if self.0.closed.load(Ordering::Acquire) {
            PoolLifecycle::Closed
        } else if self.0.shutting_down.load(Ordering::Acquire) {
            PoolLifecycle::ShuttingDown
        } else if self.0.current_size.load(Ordering::Acquire) > 0 {
            PoolLifecycle::Servicing
        } else {
            PoolLifecycle::Created
        }
    }

    fn max_size(&self) -> u32 {
        self.0.config.pooling.max_size
    }

    /// The acquisition algorithm (§4.2.1).
    pub async fn acquire(&self, timeout_override: Option<Duration>) -> Result<PoolGuard> {
        if !self.0.config.pooling.enabled {
            return self.acquire_unpooled().await;
        }

        let timeout = timeout_override
            .unwrap_or_else(|| Duration::from_millis(self.0.config.pooling.acquire_timeout_ms));
        let start = Instant::now();
        self.0.metrics.waiters.fetch_add(1, Ordering::Relaxed);

        let result = self.acquire_loop(start, timeout).await;

        self.0.metrics.waiters.fetch_sub(1, Ordering::Relaxed);
        self.0.metrics.record_acquire_wait(start.elapsed().as_millis() as u64);
        if result.is_ok() {
            self.0.metrics.total_acquired.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn acquire_loop(&self, start: Instant, timeout: Duration) -> Result<PoolGuard> {
        loop {
            if self.0.shutting_down.load(Ordering::Acquire) {
                return Err(Error::Pool(PoolErrorKind::ShuttingDown(self.0.name.clone())));
            }

            let popped = self.0.idle.lock().expect("idle lock poisoned").pop_front();
            if let Some(mut candidate) = popped {
                if candidate.needs_validation(VALIDATION_INTERVAL) {
                    let vtimeout = candidate.validation_timeout();
                    let ok = tokio::time::timeout(vtimeout, candidate.conn_mut().ping()).await;
                    match ok {
                        Ok(Ok(())) => {
                            candidate.mark_validated();
                            self.0.metrics.total_validated_ok.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            self.0.metrics.failed_validations.fetch_add(1, Ordering::Relaxed);
                            self.destroy(candidate).await;
                            continue;
                        }
                    }
                }
                candidate.mark_in_use();
                let id = candidate.id;
                self.0.active.lock().expect("active lock poisoned").insert(id, candidate);
                return Ok(self.guard_for(id));
            }

            let current = self.0.current_size.load(Ordering::Acquire);
            if current < self.max_size() {
                if self
                    .0
                    .current_size
                    .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    match (self.0.connector)(self.0.config.clone()).await {
                        Ok(raw) => {
                            self.0.metrics.total_created.fetch_add(1, Ordering::Relaxed);
                            let mut pc = PooledConnection::new(self.0.name.clone(), raw);
                            pc.mark_in_use();
                            let id = pc.id;
                            self.0.active.lock().expect("active lock poisoned").insert(id, pc);
                            return Ok(self.guard_for(id));
                        }
                        Err(e) => {
                            self.0.current_size.fetch_sub(1, Ordering::AcqRel);
                            self.0.metrics.failed_creations.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(pool = %self.0.name, error = %e, "failed to create pooled connection");
                            return Err(Error::Pool(PoolErrorKind::CreateFailed {
                                pool_name: self.0.name.clone(),
                                reason: e.to_string(),
                            }));
                        }
                    }
                }
                // lost the race to increment size; re-poll.
                continue;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(Error::Pool(PoolErrorKind::Timeout {
                    pool_name: self.0.name.clone(),
                    waited_ms: elapsed.as_millis() as u64,
                }));
            }
            let remaining = timeout - elapsed;
            let wait = remaining.min(WAIT_POLL);
            let notified = self.0.notify.notified();
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn acquire_unpooled(&self) -> Result<PoolGuard> {
        let raw = (self.0.connector)(self.0.config.clone()).await.map_err(|e| {
            Error::Pool(PoolErrorKind::CreateFailed { pool_name: self.0.name.clone(), reason: e.to_string() })
        })?;
        let mut pc = PooledConnection::new(self.0.name.clone(), raw);
        pc.mark_in_use();
        Ok(PoolGuard { conn: Some(pc), pool: None })
    }

    fn guard_for(&self, id: Uuid) -> PoolGuard {
        let conn = self.0.active.lock().expect("active lock poisoned").remove(&id);
        PoolGuard { conn, pool: Some(self.clone()) }
    }

    /// Release algorithm (§4.2.2).
    async fn release(&self, mut conn: PooledConnection) {
        // The connection went through `guard_for`, which already removed it
        // from `active` on checkout; if it's not `InUse` here something
        // external mutated it (e.g. a failed mid-flight operation marked it
        // invalid) and it must be destroyed rather than recycled.
        if conn.state != ConnectionState::InUse {
            self.destroy(conn).await;
            self.0.notify.notify_one();
            return;
        }

        conn.mark_idle();
        self.0.metrics.total_released.fetch_add(1, Ordering::Relaxed);

        let overflowed = {
            let mut idle = self.0.idle.lock().expect("idle lock poisoned");
            if idle.len() as u32 >= self.max_size() {
                true
            } else {
                idle.push_back(conn);
                false
            }
        };

        if overflowed {
            // idle queue already holds max_size entries: shouldn't normally
            // happen since current_size <= max_size, but guard against it.
            let stray = self.0.idle.lock().expect("idle lock poisoned").pop_back();
            if let Some(stray) = stray {
                self.destroy(stray).await;
            }
        }

        self.0.notify.notify_one();
    }

    async fn destroy(&self, conn: PooledConnection) {
        self.0.current_size.fetch_sub(1, Ordering::AcqRel);
        let mut raw = conn.into_conn();
        if let Err(e) = raw.disconnect().await {
            tracing::debug!(error = %e, "error disconnecting destroyed pooled connection");
        }
    }

    /// A snapshot of this pool's counters (§4.2.5), all read while holding
    /// the idle/active locks together so the counts are consistent.
    pub fn metrics(&self) -> PoolMetrics {
        let idle_count = self.0.idle.lock().expect("idle lock poisoned").len() as u32;
        let active_count = self.0.active.lock().expect("active lock poisoned").len() as u32;
        PoolMetrics {
            current_size: self.0.current_size.load(Ordering::Acquire),
            active_count,
            idle_count,
            waiters: self.0.metrics.waiters.load(Ordering::Relaxed),
            total_created: self.0.metrics.total_created.load(Ordering::Relaxed),
            total_acquired: self.0.metrics.total_acquired.load(Ordering::Relaxed),
            total_released: self.0.metrics.total_released.load(Ordering::Relaxed),
            total_validated_ok: self.0.metrics.total_validated_ok.load(Ordering::Relaxed),
            failed_creations: self.0.metrics.failed_creations.load(Ordering::Relaxed),
            failed_validations: self.0.metrics.failed_validations.load(Ordering::Relaxed),
            avg_acquire_wait_ms: self.0.metrics.avg_acquire_wait_ms(),
        }
    }

    /// Forces a validation pass over every currently idle connection
    /// (used by `PoolManager::validate_all`), outside of the lazy policy.
    pub async fn validate_idle(&self) {
        let candidates: Vec<_> = {
            let mut idle = self.0.idle.lock().expect("idle lock poisoned");
            idle.drain(..).collect()
        };
        let mut keep = VecDeque::new();
        for mut c in candidates {
            let timeout = c.validation_timeout();
            match tokio::time::timeout(timeout, c.conn_mut().ping()).await {
                Ok(Ok(())) => {
                    c.mark_validated();
                    self.0.metrics.total_validated_ok.fetch_add(1, Ordering::Relaxed);
                    keep.push_back(c);
                }
                _ => {
                    self.0.metrics.failed_validations.fetch_add(1, Ordering::Relaxed);
                    self.destroy(c).await;
                }
            }
        }
        self.0.idle.lock().expect("idle lock poisoned").extend(keep);
    }

    /// One cleanup cycle (§4.2.3): trim stale idle connections down to
    /// `min_size`, then top back up to `min_size` if creation attrition
    /// dropped `current_size` below it.
    pub async fn run_cleanup_cycle(&self) {
        let idle_timeout = Duration::from_secs(self.0.config.pooling.idle_timeout_sec);
        let min_size = self.0.config.pooling.min_size;

        let to_close = {
            let mut idle = self.0.idle.lock().expect("idle lock poisoned");
            let mut items: Vec<_> = idle.drain(..).collect();
            items.sort_by_key(|c| c.last_used_at);

            let current = self.0.current_size.load(Ordering::Acquire);
            let max_trim = current.saturating_sub(min_size) as usize;

            let mut trimmed = 0usize;
            let mut kept = VecDeque::with_capacity(items.len());
            let mut closing = Vec::new();
            for c in items {
                if trimmed < max_trim && c.idle_for() > idle_timeout {
                    closing.push(c);
                    trimmed += 1;
                } else {
                    kept.push_back(c);
                }
            }
            *idle = kept;
            closing
        };

        for c in to_close {
            self.destroy(c).await;
        }

        while self.0.current_size.load(Ordering::Acquire) < min_size {
            if self.0.shutting_down.load(Ordering::Acquire) {
                break;
            }
            let current = self.0.current_size.load(Ordering::Acquire);
            if self
                .0
                .current_size
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            match (self.0.connector)(self.0.config.clone()).await {
                Ok(raw) => {
                    self.0.metrics.total_created.fetch_add(1, Ordering::Relaxed);
                    let mut pc = PooledConnection::new(self.0.name.clone(), raw);
                    pc.mark_idle();
                    self.0.idle.lock().expect("idle lock poisoned").push_back(pc);
                    self.0.notify.notify_one();
                }
                Err(e) => {
                    self.0.current_size.fetch_sub(1, Ordering::AcqRel);
                    self.0.metrics.failed_creations.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(pool = %self.0.name, error = %e, "cleanup failed to restore min_size");
                    break;
                }
            }
        }
    }

    fn spawn_cleanup_task(&self) {
        let pool = self.clone();
        let period =
            Duration::from_secs(self.0.config.pooling.idle_timeout_sec / 3).max(Duration::from_secs(15));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if pool.0.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                if tokio::time::timeout(CLEANUP_BUDGET, pool.run_cleanup_cycle()).await.is_err() {
                    tracing::warn!(pool = %pool.0.name, "cleanup cycle exceeded its wall-clock budget");
                }
            }
        });

        // `try_lock` is safe here: nothing else holds this lock during
        // construction, this just avoids making `new` itself async.
        if let Ok(mut guard) = self.0.cleanup_task.try_lock() {
            *guard = Some(handle);
        }
    }

    /// Graceful shutdown (§4.2.4): stop accepting new work, let active
    /// connections finish within `grace`, then forcibly close everything.
    pub async fn shutdown(&self, grace: Option<Duration>) {
        self.0.shutting_down.store(true, Ordering::Release);
        self.0.notify.notify_waiters();

        if let Some(handle) = self.0.cleanup_task.lock().await.take() {
            handle.abort();
        }

        let grace = grace.unwrap_or(DEFAULT_SHUTDOWN_GRACE);
        let deadline = Instant::now() + grace;
        while !self.0.active.lock().expect("active lock poisoned").is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let stragglers: Vec<_> =
            self.0.active.lock().expect("active lock poisoned").drain().map(|(_, v)| v).collect();
        for c in stragglers {
            self.destroy(c).await;
        }

        let idle: Vec<_> = self.0.idle.lock().expect("idle lock poisoned").drain(..).collect();
        for c in idle {
            self.destroy(c).await;
        }

        self.0.closed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for SingleDbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleDbPool")
            .field("name", &self.0.name)
            .field("lifecycle", &self.lifecycle())
            .field("current_size", &self.0.current_size.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dbgateway_core::{Engine, ParamValue, Params, ResultSet};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct FakeConnection {
        connected: bool,
        in_txn: bool,
        fail_ping: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DbConnection for FakeConnection {
        fn engine(&self) -> Engine {
            Engine::Postgres
        }
        async fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
        async fn start_transaction(&mut self) -> Result<()> {
            self.in_txn = true;
            Ok(())
        }
        async fn commit(&mut self) -> Result<()> {
            self.in_txn = false;
            Ok(())
        }
        async fn rollback(&mut self) -> Result<()> {
            self.in_txn = false;
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            self.in_txn
        }
        async fn execute(&mut self, _sql: &str, _params: &Params) -> Result<u64> {
            Ok(0)
        }
        async fn execute_scalar(&mut self, _sql: &str, _params: &Params) -> Result<Option<serde_json::Value>> {
            Ok(None)
        }
        async fn execute_reader(&mut self, _sql: &str, _params: &Params) -> Result<ResultSet> {
            Ok(ResultSet::default())
        }
        async fn version(&mut self) -> Result<String> {
            Ok("fake-1.0".into())
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
        async fn ping(&mut self) -> Result<()> {
            if self.fail_ping.load(Ordering::Relaxed) {
                Err(Error::Connection("ping failed".into()))
            } else {
                Ok(())
            }
        }
    }

    fn test_config(min: u32, max: u32) -> ConnectionConfig {
        use dbgateway_core::config::{PoolingConfig, RetryConfig, TlsConfig};
        ConnectionConfig {
            name: "t".into(),
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
            pooling: PoolingConfig { enabled: true, min_size: min, max_size: max, idle_timeout_sec: 60, acquire_timeout_ms: 500 },
            tls: TlsConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    fn fake_connector(fail_ping: Arc<AtomicBool>) -> Connector {
        Arc::new(move |_cfg| {
            let fail_ping = fail_ping.clone();
            Box::pin(async move {
                let conn: Box<dyn DbConnection> =
                    Box::new(FakeConnection { connected: true, in_txn: false, fail_ping });
                Ok(conn)
            })
        })
    }

    #[tokio::test]
    async fn acquire_and_release_recycles_connection() {
        let fail = Arc::new(AtomicBool::new(false));
        let pool = SingleDbPool::new("t", test_config(0, 2), fake_connector(fail));

        let guard = pool.acquire(None).await.unwrap();
        assert_eq!(pool.metrics().active_count, 1);
        drop(guard);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let m = pool.metrics();
        assert_eq!(m.idle_count, 1);
        assert_eq!(m.active_count, 0);
    }

    #[tokio::test]
    async fn acquire_on_saturated_pool_times_out() {
        let fail = Arc::new(AtomicBool::new(false));
        let pool = SingleDbPool::new("t", test_config(0, 1), fake_connector(fail));

        let _held = pool.acquire(None).await.unwrap();
        let start = Instant::now();
        let err = pool.acquire(Some(Duration::from_millis(300))).await.unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, Error::Pool(PoolErrorKind::Timeout { .. })));
        assert!(elapsed >= Duration::from_millis(280) && elapsed <= Duration::from_millis(700));
    }

    #[tokio::test]
    async fn shutting_down_pool_rejects_new_acquires() {
        let fail = Arc::new(AtomicBool::new(false));
        let pool = SingleDbPool::new("t", test_config(0, 2), fake_connector(fail));
        pool.shutdown(Some(Duration::from_millis(50))).await;

        let err = pool.acquire(Some(Duration::from_millis(100))).await.unwrap_err();
        assert!(matches!(err, Error::Pool(PoolErrorKind::ShuttingDown(_))));
    }

    #[tokio::test]
    async fn invalid_connection_is_destroyed_not_recycled() {
        let fail = Arc::new(AtomicBool::new(false));
        let pool = SingleDbPool::new("t", test_config(0, 2), fake_connector(fail.clone()));

        let guard = pool.acquire(None).await.unwrap();
        drop(guard);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.metrics().idle_count, 1);

        // force the next acquire's lazy validation to observe a dead ping
        fail.store(true, Ordering::Relaxed);
        // bypass the 300s lazy interval for the test by forcing a manual validation pass
        pool.validate_idle().await;
        assert_eq!(pool.metrics().idle_count, 0);
        assert_eq!(pool.metrics().current_size, 0);
    }
}
