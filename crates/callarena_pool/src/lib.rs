//! # CALLARENA Pool
//!
//! Recycles whole [`Arena`](callarena_core::Arena)s by power-of-two size
//! class, so repeated calls of similar size reuse one warm buffer instead of
//! acquiring a new one every time.
//!
//! ## Architecture
//!
//! ```text
//! ArenaPool
//! ├── SizeClasses        2 KiB .. 16 MiB, O(1) lookup
//! ├── FreeList per class Mutex<Vec<Arena>>
//! ├── PoolStats          hits / misses / oversized / returns
//! └── Reclaimer          optional background release of dropped arenas
//! ```
//!
//! ## Lifecycle
//!
//! 1. `get(size)` pops a reset arena of the right class, or acquires one
//! 2. the caller fills it and makes the foreign call
//! 3. `put(arena)` resets it and pushes it back (or frees it if unmanaged)
//! 4. `free()` releases every idle arena at shutdown
//!
//! ## Example
//!
//! ```rust,ignore
//! use callarena_pool::ArenaPool;
//!
//! let pool = ArenaPool::new();
//! {
//!     let arena = pool.checkout(3000)?;
//!     let dims = arena.alloc_slice_copy(&[2_i64, 3]);
//!     engine.call(dims.as_ptr());
//! } // back in the 4 KiB class
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod guard;
pub mod pool;
pub mod size_class;
pub mod stats;

pub use config::{PoolConfig, MAX_POOLED_ARENA_SIZE, MIN_POOLED_ARENA_SIZE};
pub use error::{PoolError, PoolResult};
pub use guard::PooledArena;
pub use pool::ArenaPool;
pub use size_class::{ceil_log2, class_index, next_power_of_two, SizeClasses};
pub use stats::PoolStatsSnapshot;
