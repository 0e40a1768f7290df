//! [`PooledConnection`]: the wrapper owning exactly one live [`DbConnection`]
//! (§3.2), plus its state machine.

use std::time::Instant;

use dbgateway_core::DbConnection;
use uuid::Uuid;

/// The legal states of a [`PooledConnection`] (§3.2). Transitions not drawn
/// in the spec's state diagram never happen: `idle -> inUse` goes through
/// [`SingleDbPool::acquire`][crate::single_pool::SingleDbPool::acquire],
/// `inUse -> idle` through
/// [`SingleDbPool::release`][crate::single_pool::SingleDbPool::release], and
/// anything else becomes `closed` via `destroy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Idle,
    InUse,
    Invalid,
    Closed,
}

/// One pooled connection: a live [`DbConnection`] plus the bookkeeping the
/// pool needs to decide when to validate, trim or reap it.
#[derive(Debug)]
pub struct PooledConnection {
    pub id: Uuid,
    pub pool_name: String,
    pub state: ConnectionState,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub last_validated_at: Instant,
    pub usage_count: u64,
    conn: Box<dyn DbConnection>,
}

impl PooledConnection {
    pub fn new(pool_name: String, conn: Box<dyn DbConnection>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            pool_name,
            state: ConnectionState::New,
            created_at: now,
            last_used_at: now,
            last_validated_at: now,
            usage_count: 0,
            conn,
        }
    }

    pub fn conn(&self) -> &(dyn DbConnection + 'static) {
        self.conn.as_ref()
    }

    pub fn conn_mut(&mut self) -> &mut (dyn DbConnection + 'static) {
        self.conn.as_mut()
    }

    pub fn into_conn(self) -> Box<dyn DbConnection> {
        self.conn
    }

    pub fn mark_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.last_used_at = Instant::now();
    }

    pub fn mark_in_use(&mut self) {
        self.state = ConnectionState::InUse;
        self.usage_count += 1;
        self.last_used_at = Instant::now();
    }

    pub fn mark_invalid(&mut self) {
        self.state = ConnectionState::Invalid;
    }

    pub fn mark_validated(&mut self) {
        self.last_validated_at = Instant::now();
    }

    /// Lazy validation policy (§4.2.1): needs a ping if it's been longer than
    /// `validation_interval` since the last one.
    pub fn needs_validation(&self, validation_interval: std::time::Duration) -> bool {
        self.last_validated_at.elapsed() >= validation_interval
    }

    /// The validation timeout to use for this connection: shorter for
    /// connections that have been idle a long time or were previously
    /// flagged invalid (§4.2.1).
    pub fn validation_timeout(&self) -> std::time::Duration {
        use std::time::Duration;
        if self.state == ConnectionState::Invalid || self.last_used_at.elapsed() > Duration::from_secs(3600) {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(5)
        }
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_used_at.elapsed()
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}
