//! Observability metrics for throttling and caching.
//!
//! Counts limit decisions, cache lookups and storage faults so that degraded
//! operation (for example a backend outage) is visible without failing requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking throttle and cache statistics.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Requests the limiter let through
    requests_allowed: AtomicU64,
    /// Requests the limiter rejected
    requests_denied: AtomicU64,
    /// Lookups answered from storage
    cache_hits: AtomicU64,
    /// Lookups that had to forward
    cache_misses: AtomicU64,
    /// Storage errors that were absorbed
    storage_faults: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allowed(&self) {
        self.inner.requests_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self) {
        self.inner.requests_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_storage_fault(&self) {
        self.inner.storage_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests allowed by the limiter.
    pub fn requests_allowed(&self) -> u64 {
        self.inner.requests_allowed.load(Ordering::Relaxed)
    }

    /// Requests denied by the limiter.
    pub fn requests_denied(&self) -> u64 {
        self.inner.requests_denied.load(Ordering::Relaxed)
    }

    /// Responses served from storage.
    pub fn cache_hits(&self) -> u64 {
        self.inner.cache_hits.load(Ordering::Relaxed)
    }

    /// Cache lookups that found nothing.
    pub fn cache_misses(&self) -> u64 {
        self.inner.cache_misses.load(Ordering::Relaxed)
    }

    /// Storage errors absorbed instead of failing the request.
    pub fn storage_faults(&self) -> u64 {
        self.inner.storage_faults.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_allowed: self.requests_allowed(),
            requests_denied: self.requests_denied(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            storage_faults: self.storage_faults(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.inner.requests_allowed.store(0, Ordering::Relaxed);
        self.inner.requests_denied.store(0, Ordering::Relaxed);
        self.inner.cache_hits.store(0, Ordering::Relaxed);
        self.inner.cache_misses.store(0, Ordering::Relaxed);
        self.inner.storage_faults.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub requests_allowed: u64,
    pub requests_denied: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub storage_faults: u64,
}

impl MetricsSnapshot {
    /// Ratio of cache hits to lookups (0.0 to 1.0).
    ///
    /// Returns 0.0 if nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits.saturating_add(self.cache_misses);
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}
