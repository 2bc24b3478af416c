//! Scoped checkout that returns its arena to the pool on drop.

use std::ops::{Deref, DerefMut};

use callarena_core::Arena;

use crate::pool::ArenaPool;

/// An [`Arena`] borrowed from an [`ArenaPool`] for one scope.
///
/// Dereferences to the arena. Dropping the guard calls
/// [`ArenaPool::put`], so the arena is reset and recycled even on early
/// return or unwind.
pub struct PooledArena<'p> {
    pool: &'p ArenaPool,
    arena: Option<Arena>,
}

impl<'p> PooledArena<'p> {
    pub(crate) fn new(pool: &'p ArenaPool, arena: Arena) -> Self {
        Self {
            pool,
            arena: Some(arena),
        }
    }

    /// Detaches the arena; the caller becomes responsible for returning or
    /// freeing it.
    #[must_use]
    pub fn into_inner(mut self) -> Arena {
        match self.arena.take() {
            Some(arena) => arena,
            // Only `into_inner` and `drop` take the arena, and both consume the guard.
            None => unreachable!("pooled arena already taken"),
        }
    }

    /// The pool this arena goes back to.
    #[must_use]
    pub const fn pool(&self) -> &'p ArenaPool {
        self.pool
    }
}

impl Deref for PooledArena<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        match &self.arena {
            Some(arena) => arena,
            None => unreachable!("pooled arena already taken"),
        }
    }
}

impl DerefMut for PooledArena<'_> {
    fn deref_mut(&mut self) -> &mut Arena {
        match &mut self.arena {
            Some(arena) => arena,
            None => unreachable!("pooled arena already taken"),
        }
    }
}

impl Drop for PooledArena<'_> {
    fn drop(&mut self) {
        if let Some(arena) = self.arena.take() {
            self.pool.put(arena);
        }
    }
}

impl std::fmt::Debug for PooledArena<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledArena").field(&self.arena).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_returns_arena_on_drop() {
        let pool = ArenaPool::new();
        {
            let arena = pool.checkout(3000).unwrap();
            assert_eq!(arena.capacity(), 4096);
            let dims = arena.alloc_slice_copy(&[2_i64, 3, 4]);
            assert_eq!(dims, &[2, 3, 4]);
        }
        assert_eq!(pool.idle_in_class(1), 1);

        let again = pool.checkout(4096).unwrap();
        assert_eq!(again.used(), 0);
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_guard_returns_arena_on_unwind() {
        let pool = ArenaPool::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let arena = pool.checkout(2048).unwrap();
            let _ = arena.alloc_slice::<u8>(4096);
        }));
        assert!(result.is_err());
        assert_eq!(pool.idle_in_class(0), 1);
    }

    #[test]
    fn test_into_inner_detaches() {
        let pool = ArenaPool::new();
        let guard = pool.checkout(2048).unwrap();
        let mut arena = guard.into_inner();
        assert_eq!(pool.idle_total(), 0);
        arena.free();
        pool.put(arena);
        assert_eq!(pool.idle_total(), 0);
    }
}
