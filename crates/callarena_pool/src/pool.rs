//! # Arena Pool
//!
//! Recycles whole arenas by power-of-two size class so steady-state calls
//! never touch the raw provider.
//!
//! ## Architecture
//!
//! ```text
//!                 ArenaPool
//!   ┌──────────────────────────────────────┐
//!   │ class 0  (2 KiB)  Mutex<Vec<Arena>>  │ <── put(arena)  reset + push
//!   │ class 1  (4 KiB)  Mutex<Vec<Arena>>  │
//!   │ ...                                  │ ──> get(size)   pop or acquire
//!   │ class 13 (16 MiB) Mutex<Vec<Arena>>  │
//!   └──────────────────────────────────────┘
//!   get(size > 16 MiB)  -> unmanaged arena, freed on put
//! ```
//!
//! ## Thread Safety
//!
//! `get` and `put` take `&self`. Each class has its own lock, held only for
//! a push or pop; callers never see it. The pool does not own checked-out
//! arenas, so freeing the pool leaves them valid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use callarena_core::{Arena, RawProvider, ReclaimHandle, Reclaimer, SystemProvider};
use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::guard::PooledArena;
use crate::size_class::SizeClasses;
use crate::stats::{PoolStats, PoolStatsSnapshot};

/// Idle arenas of one class.
struct FreeList {
    /// Exact capacity of every arena in this list.
    capacity: usize,
    /// Position of this list in the pool.
    index: usize,
    arenas: Mutex<Vec<Arena>>,
}

impl FreeList {
    fn new(index: usize, capacity: usize) -> Self {
        Self {
            capacity,
            index,
            arenas: Mutex::new(Vec::new()),
        }
    }

    fn pop(&self) -> Option<Arena> {
        self.arenas.lock().pop()
    }

    /// Pushes a reset arena unless the pool is closed or the list already
    /// holds `limit` arenas.
    ///
    /// `closed` is read under the list lock, so a push either lands before
    /// `ArenaPool::free` drains this list or sees the pool closed.
    fn push(
        &self,
        arena: Arena,
        limit: Option<usize>,
        closed: &AtomicBool,
    ) -> Result<(), Arena> {
        let mut arenas = self.arenas.lock();
        let full = limit.is_some_and(|limit| arenas.len() >= limit);
        if full || closed.load(Ordering::Acquire) {
            return Err(arena);
        }
        arenas.push(arena);
        Ok(())
    }

    fn len(&self) -> usize {
        self.arenas.lock().len()
    }

    fn drain(&self) -> Vec<Arena> {
        std::mem::take(&mut *self.arenas.lock())
    }

    /// Acquires a fresh arena of this class.
    fn manufacture(
        &self,
        provider: &Arc<dyn RawProvider>,
        reclaim: Option<ReclaimHandle>,
    ) -> PoolResult<Arena> {
        let arena = Arena::with_provider(self.capacity, Arc::clone(provider))?
            .with_size_class(self.index);
        Ok(match reclaim {
            Some(handle) => arena.with_reclaimer(handle),
            None => arena,
        })
    }
}

/// A concurrent registry of reusable arenas bucketed by power-of-two size.
///
/// # Example
///
/// ```rust,ignore
/// let pool = ArenaPool::new();
///
/// let arena = pool.get(3000)?;          // 4 KiB class
/// let shape = arena.alloc_slice_copy(&[2_i64, 3]);
/// engine.call(shape.as_ptr());
/// pool.put(arena);                      // reset and kept for the next call
/// ```
pub struct ArenaPool {
    config: PoolConfig,
    classes: SizeClasses,
    lists: Vec<FreeList>,
    provider: Arc<dyn RawProvider>,
    reclaimer: Option<Reclaimer>,
    stats: PoolStats,
    closed: AtomicBool,
}

impl ArenaPool {
    /// Creates a pool with the default classes (2 KiB to 16 MiB) over the
    /// system allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::build(PoolConfig::default(), Arc::new(SystemProvider), None)
    }

    /// Creates a pool from `config` over the system allocator.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] for bad bounds, or an arena error
    /// if the reclaim thread cannot start.
    pub fn with_config(config: PoolConfig) -> PoolResult<Self> {
        Self::with_provider(config, Arc::new(SystemProvider))
    }

    /// Creates a pool from `config` whose arenas draw on `provider`.
    ///
    /// # Errors
    ///
    /// Same as [`with_config`](Self::with_config).
    pub fn with_provider(config: PoolConfig, provider: Arc<dyn RawProvider>) -> PoolResult<Self> {
        config.validate()?;
        let reclaimer = if config.deferred_cleanup {
            Some(Reclaimer::spawn()?)
        } else {
            None
        };
        Ok(Self::build(config, provider, reclaimer))
    }

    fn build(
        config: PoolConfig,
        provider: Arc<dyn RawProvider>,
        reclaimer: Option<Reclaimer>,
    ) -> Self {
        let classes = config.size_classes();
        let lists = (0..classes.len())
            .map(|index| FreeList::new(index, classes.capacity_of(index)))
            .collect();
        tracing::debug!(
            "arena pool: {} classes from {} to {} bytes",
            classes.len(),
            classes.min_size(),
            classes.max_size()
        );
        Self {
            config,
            classes,
            lists,
            provider,
            reclaimer,
            stats: PoolStats::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns a reset arena of at least `target_size` bytes.
    ///
    /// Requests are clamped up to the minimum pooled size and rounded up to a
    /// power of two. Requests above the largest class get a fresh unmanaged
    /// arena of exactly `target_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Arena`] if a new buffer cannot be acquired, and
    /// [`PoolError::Closed`] after [`free`](Self::free).
    pub fn get(&self, target_size: usize) -> PoolResult<Arena> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let target_size = target_size.max(self.classes.min_size());

        let Some(index) = self.classes.class_for(target_size) else {
            self.stats.record_oversized();
            tracing::debug!(
                "arena pool: {} bytes exceeds largest class, allocating unmanaged arena",
                target_size
            );
            return self.unmanaged(target_size);
        };

        let list = &self.lists[index];
        if let Some(arena) = list.pop() {
            self.stats.record_hit();
            return Ok(arena);
        }

        self.stats.record_miss();
        tracing::debug!(
            "arena pool: class {} empty, acquiring {} bytes",
            index,
            list.capacity
        );
        list.manufacture(&self.provider, self.reclaim_handle())
    }

    /// Like [`get`](Self::get), but wraps the arena in a guard that returns
    /// it to this pool when dropped.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn checkout(&self, target_size: usize) -> PoolResult<PooledArena<'_>> {
        self.get(target_size).map(|arena| PooledArena::new(self, arena))
    }

    /// Returns an arena for reuse.
    ///
    /// Freed arenas are ignored. Unmanaged arenas, arenas whose class this
    /// pool does not have, and returns to a freed pool are freed directly.
    /// Everything else is reset and pushed on its class free-list, or freed
    /// if that list is at its retention cap.
    pub fn put(&self, mut arena: Arena) {
        if arena.is_freed() {
            return;
        }

        let list = arena
            .size_class()
            .filter(|&index| self.classes.contains(index))
            .map(|index| &self.lists[index])
            .filter(|list| list.capacity == arena.capacity());
        let Some(list) = list else {
            self.stats.record_freed_on_return();
            tracing::trace!(
                "arena pool: freeing unmanaged arena of {} bytes",
                arena.capacity()
            );
            arena.free();
            return;
        };

        arena.reset();
        match list.push(arena, self.config.max_retained_per_class, &self.closed) {
            Ok(()) => self.stats.record_pooled(),
            Err(mut arena) => {
                self.stats.record_discarded();
                tracing::trace!(
                    "arena pool: class {} full or pool freed, freeing arena",
                    list.index
                );
                arena.free();
            }
        }
    }

    /// Discards every idle arena and stops handing out new ones.
    ///
    /// Checked-out arenas are not touched; they stay valid until their own
    /// `free`, and a later `put` frees them. Calling this again is a no-op.
    pub fn free(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Each drain takes the class lock after `closed` is set, so no push
        // can land on a list once it has been drained.
        let mut released = 0_usize;
        for list in &self.lists {
            for mut arena in list.drain() {
                arena.free();
                released += 1;
            }
        }
        tracing::debug!("arena pool: freed, released {} idle arenas", released);
    }

    /// Whether [`free`](Self::free) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The pool's configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The pool's size classes.
    #[must_use]
    pub const fn classes(&self) -> SizeClasses {
        self.classes
    }

    /// Idle arenas currently held in class `index` (0 for unknown classes).
    #[must_use]
    pub fn idle_in_class(&self, index: usize) -> usize {
        self.lists.get(index).map_or(0, FreeList::len)
    }

    /// Idle arenas across all classes.
    #[must_use]
    pub fn idle_total(&self) -> usize {
        self.lists.iter().map(FreeList::len).sum()
    }

    /// Current counter values.
    #[must_use]
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    /// Buffers released so far by the reclaim thread, if deferred cleanup
    /// is enabled.
    #[must_use]
    pub fn reclaimed(&self) -> Option<u64> {
        self.reclaimer.as_ref().map(Reclaimer::released)
    }

    fn reclaim_handle(&self) -> Option<ReclaimHandle> {
        self.reclaimer.as_ref().map(Reclaimer::handle)
    }

    fn unmanaged(&self, size: usize) -> PoolResult<Arena> {
        let arena = Arena::with_provider(size, Arc::clone(&self.provider))?;
        Ok(match self.reclaim_handle() {
            Some(handle) => arena.with_reclaimer(handle),
            None => arena,
        })
    }
}

impl Default for ArenaPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ArenaPool {
    fn drop(&mut self) {
        self.free();
    }
}

impl std::fmt::Debug for ArenaPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaPool")
            .field("classes", &self.classes)
            .field("idle", &self.idle_total())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callarena_core::TrackingProvider;

    const MIB: usize = 1024 * 1024;

    fn tracked_pool(config: PoolConfig) -> (ArenaPool, Arc<TrackingProvider>) {
        let provider = Arc::new(TrackingProvider::new(SystemProvider));
        let pool = ArenaPool::with_provider(config, provider.clone()).unwrap();
        (pool, provider)
    }

    #[test]
    fn test_get_rounds_to_class() {
        let pool = ArenaPool::new();

        let small = pool.get(2000).unwrap();
        assert_eq!(small.capacity(), 2048);
        assert_eq!(small.size_class(), Some(0));
        assert_eq!(small.used(), 0);

        let mid = pool.get(3000).unwrap();
        assert_eq!(mid.capacity(), 4096);
        assert_eq!(mid.size_class(), Some(1));

        let tiny = pool.get(0).unwrap();
        assert_eq!(tiny.capacity(), 2048);

        pool.put(small);
        pool.put(mid);
        pool.put(tiny);
        assert_eq!(pool.idle_in_class(0), 2);
        assert_eq!(pool.idle_in_class(1), 1);
    }

    #[test]
    fn test_capacity_is_power_of_two_at_least_request() {
        let pool = ArenaPool::new();
        for target in [1_usize, 100, 2047, 2048, 2049, 5000, 65_537, 16 * MIB] {
            let arena = pool.get(target).unwrap();
            assert!(arena.capacity().is_power_of_two());
            assert!(arena.capacity() >= target.max(2048));
            assert_eq!(arena.used(), 0);
            pool.put(arena);
        }
    }

    #[test]
    fn test_oversized_is_exact_and_freed_on_put() {
        let (pool, provider) = tracked_pool(PoolConfig::default());

        let arena = pool.get(32 * MIB).unwrap();
        assert_eq!(arena.capacity(), 32 * MIB);
        assert_eq!(arena.size_class(), None);
        assert_eq!(provider.live_buffers(), 1);

        pool.put(arena);
        assert_eq!(provider.live_buffers(), 0);
        assert_eq!(pool.idle_total(), 0);

        let stats = pool.stats();
        assert_eq!(stats.oversized, 1);
        assert_eq!(stats.freed_on_return, 1);
        assert_eq!(stats.pooled, 0);
    }

    #[test]
    fn test_put_then_get_reuses_buffer_zeroed() {
        let (pool, provider) = tracked_pool(PoolConfig::default());

        let arena = pool.get(4096).unwrap();
        arena.alloc_slice::<u8>(1000).fill(0xCD);
        let addr = arena.as_ptr();
        pool.put(arena);

        let mut again = pool.get(4000).unwrap();
        assert_eq!(again.as_ptr(), addr);
        assert_eq!(again.used(), 0);
        assert!(again.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(provider.acquired_total(), 1);

        let stats = pool.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        pool.put(again);
    }

    #[test]
    fn test_unmanaged_arena_is_freed_on_put() {
        let (pool, provider) = tracked_pool(PoolConfig::default());
        let arena = Arena::with_provider(2048, provider.clone()).unwrap();
        pool.put(arena);
        assert_eq!(pool.idle_total(), 0);
        assert_eq!(provider.live_buffers(), 0);
    }

    #[test]
    fn test_out_of_range_class_is_freed_on_put() {
        let (pool, provider) = tracked_pool(PoolConfig::default());
        let stray = Arena::with_provider(2048, provider.clone())
            .unwrap()
            .with_size_class(99);
        pool.put(stray);

        let mismatched = Arena::with_provider(1024, provider.clone())
            .unwrap()
            .with_size_class(0);
        pool.put(mismatched);

        assert_eq!(pool.idle_total(), 0);
        assert_eq!(provider.live_buffers(), 0);
        assert_eq!(pool.stats().freed_on_return, 2);
    }

    #[test]
    fn test_put_of_freed_arena_is_noop() {
        let pool = ArenaPool::new();
        let mut arena = pool.get(2048).unwrap();
        arena.free();
        pool.put(arena);
        assert_eq!(pool.idle_total(), 0);
        assert_eq!(
            pool.stats(),
            PoolStatsSnapshot {
                misses: 1,
                ..PoolStatsSnapshot::default()
            }
        );
    }

    #[test]
    fn test_retention_cap_frees_surplus() {
        let config = PoolConfig {
            max_retained_per_class: Some(2),
            ..PoolConfig::default()
        };
        let (pool, provider) = tracked_pool(config);

        let arenas: Vec<_> = (0..4).map(|_| pool.get(2048).unwrap()).collect();
        for arena in arenas {
            pool.put(arena);
        }
        assert_eq!(pool.idle_in_class(0), 2);
        assert_eq!(provider.live_buffers(), 2);
        assert_eq!(pool.stats().discarded, 2);
    }

    #[test]
    fn test_acquisition_failure_propagates() {
        let provider = Arc::new(TrackingProvider::with_limit(SystemProvider, 4096));
        let pool = ArenaPool::with_provider(PoolConfig::default(), provider).unwrap();

        let held = pool.get(4096).unwrap();
        let err = pool.get(2048).unwrap_err();
        assert!(matches!(err, PoolError::Arena(_)));
        pool.put(held);

        // The failed miss left nothing behind; the warm 4 KiB class still works.
        let again = pool.get(4096).unwrap();
        pool.put(again);
    }

    #[test]
    fn test_free_releases_idle_and_spares_checked_out() {
        let (pool, provider) = tracked_pool(PoolConfig::default());

        let idle = pool.get(2048).unwrap();
        pool.put(idle);
        let mut out = pool.get(8192).unwrap();
        assert_eq!(provider.live_buffers(), 2);

        pool.free();
        assert!(pool.is_closed());
        assert_eq!(provider.live_buffers(), 1);
        assert!(matches!(pool.get(2048), Err(PoolError::Closed)));

        let value = out.alloc_value(7_u64);
        assert_eq!(*value, 7);
        out.reset();

        pool.put(out);
        assert_eq!(provider.live_buffers(), 0);
        assert_eq!(pool.idle_total(), 0);
        pool.free();
    }

    #[test]
    fn test_put_racing_free_leaves_nothing_idle() {
        for _ in 0..200 {
            let (pool, provider) = tracked_pool(PoolConfig::default());
            let arenas: Vec<_> = (0..64).map(|_| pool.get(2048).unwrap()).collect();

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    for arena in arenas {
                        pool.put(arena);
                    }
                });
                scope.spawn(|| pool.free());
            });

            assert!(pool.is_closed());
            assert_eq!(pool.idle_total(), 0);
            assert_eq!(provider.live_buffers(), 0);
        }
    }

    #[test]
    fn test_put_after_free_frees_class_arena() {
        let (pool, provider) = tracked_pool(PoolConfig::default());
        let arena = pool.get(2048).unwrap();
        pool.free();
        pool.put(arena);

        assert_eq!(pool.idle_total(), 0);
        assert_eq!(provider.live_buffers(), 0);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn test_drop_releases_idle_arenas() {
        let (pool, provider) = tracked_pool(PoolConfig::default());
        for size in [2048, 4096, 8192] {
            let arena = pool.get(size).unwrap();
            pool.put(arena);
        }
        assert_eq!(provider.live_buffers(), 3);
        drop(pool);
        assert_eq!(provider.live_buffers(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PoolConfig {
            min_pooled_size: 3000,
            ..PoolConfig::default()
        };
        assert!(matches!(
            ArenaPool::with_config(config),
            Err(PoolError::InvalidConfig(_))
        ));
    }
}
