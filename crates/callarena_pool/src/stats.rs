//! Pool counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the pool on every checkout and return.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    hits: AtomicU64,
    misses: AtomicU64,
    oversized: AtomicU64,
    pooled: AtomicU64,
    freed_on_return: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of the pool's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// `get` calls served from a warm free-list.
    pub hits: u64,
    /// `get` calls that had to acquire a new class buffer.
    pub misses: u64,
    /// `get` calls above the largest class, served by an unmanaged arena.
    pub oversized: u64,
    /// Arenas reset and pushed back on a free-list.
    pub pooled: u64,
    /// Unmanaged or foreign arenas freed on return.
    pub freed_on_return: u64,
    /// Class arenas freed on return because the free-list was full or the
    /// pool was closed.
    pub discarded: u64,
}

impl PoolStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_oversized(&self) {
        self.oversized.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pooled(&self) {
        self.pooled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_freed_on_return(&self) {
        self.freed_on_return.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub(crate) fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            pooled: self.pooled.load(Ordering::Relaxed),
            freed_on_return: self.freed_on_return.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl PoolStatsSnapshot {
    /// Fraction of class requests served without a new buffer.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}
