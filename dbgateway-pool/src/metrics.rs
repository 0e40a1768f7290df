//! Pool metrics (§4.2.5): an atomic snapshot struct plus the counters a
//! [`SingleDbPool`][crate::single_pool::SingleDbPool] updates as it runs.
//! Modeled on `sqlx_core::pool::PoolMetricsObserver`, but since spec.md
//! wants a pollable snapshot rather than a push-based observer, this is
//! closer to the counters `sqlx-core`'s `PoolOptions` tracks internally for
//! `acquire_slow_threshold` logging, surfaced as public state instead.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A point-in-time snapshot of a pool's counters, taken under the metrics
/// lock so the fields are mutually consistent (§4.2.5).
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PoolMetrics {
    pub current_size: u32,
    pub active_count: u32,
    pub idle_count: u32,
    pub waiters: u32,
    pub total_created: u64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_validated_ok: u64,
    pub failed_creations: u64,
    pub failed_validations: u64,
    pub avg_acquire_wait_ms: f64,
}

/// Internal atomic counters backing [`PoolMetrics`]. Kept separate from the
/// snapshot type so readers never see a torn read across fields: callers of
/// [`MetricsInner::snapshot`] get values read while holding the shared guard
/// that also guards size bookkeeping in the pool.
#[derive(Debug, Default)]
pub struct MetricsInner {
    pub waiters: AtomicU32,
    pub total_created: AtomicU64,
    pub total_acquired: AtomicU64,
    pub total_released: AtomicU64,
    pub total_validated_ok: AtomicU64,
    pub failed_creations: AtomicU64,
    pub failed_validations: AtomicU64,
    acquire_wait_samples: AtomicU64,
    acquire_wait_total_ms: AtomicU64,
}

impl MetricsInner {
    pub fn record_acquire_wait(&self, wait_ms: u64) {
        self.acquire_wait_samples.fetch_add(1, Ordering::Relaxed);
        self.acquire_wait_total_ms.fetch_add(wait_ms, Ordering::Relaxed);
    }

    pub fn avg_acquire_wait_ms(&self) -> f64 {
        let samples = self.acquire_wait_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        self.acquire_wait_total_ms.load(Ordering::Relaxed) as f64 / samples as f64
    }
}
