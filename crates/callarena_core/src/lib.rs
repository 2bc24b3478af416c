//! # CALLARENA Core
//!
//! Fixed-capacity bump arenas for batching the small, short-lived
//! allocations that accompany every call into a foreign computation engine.
//!
//! Each off-heap allocation at the foreign boundary is expensive, so one
//! call acquires a single buffer up front, carves every argument structure
//! out of it, and drops the lot in one go afterwards.
//!
//! ## Architecture
//!
//! ```text
//! RawProvider (acquire / release)
//! └── Arena (one buffer + cursor)
//!     ├── alloc::<T>() / alloc_slice::<T>(n)   bump, 8-byte aligned
//!     ├── reset()                               zero used region, cursor = 0
//!     ├── free()                                buffer back to provider
//!     └── Drop                                  backstop via Reclaimer
//! ```
//!
//! ## Rules
//!
//! 1. **Size up front** - overrunning an arena is a caller bug and panics
//! 2. **One owner** - an arena is `Send`, never `Sync`
//! 3. **Free explicitly** - drop-time release exists only as a leak backstop
//!
//! ## Example
//!
//! ```rust,ignore
//! use callarena_core::{Arena, LayoutPlan};
//!
//! let plan = LayoutPlan::new().value::<i64>().slice::<f32>(16);
//! let mut arena = Arena::new(plan.size())?;
//! let rank = arena.alloc_value(2_i64);
//! let data = arena.alloc_slice::<f32>(16);
//! arena.free();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod arena;
pub mod error;
pub mod layout;
pub mod provider;
pub mod reclaim;

pub use arena::Arena;
pub use error::{ArenaError, ArenaResult};
pub use layout::{align_up, LayoutPlan, ARENA_ALIGN};
pub use provider::{RawBuffer, RawProvider, SystemProvider, TrackingProvider, BUFFER_ALIGN};
pub use reclaim::{ReclaimHandle, Reclaimer};
