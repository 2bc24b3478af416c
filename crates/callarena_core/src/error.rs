//! # Arena Error Types
//!
//! Recoverable failures of the arena layer. Capacity overruns on the
//! `alloc` family are fatal and surface as panics built from
//! [`ArenaError::CapacityExceeded`]; only the `try_alloc` probes return it.

use thiserror::Error;

/// Errors that can occur while acquiring or sub-allocating arena memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// The raw provider could not supply a buffer.
    #[error("failed to acquire {requested} bytes from the raw provider: {reason}")]
    AcquisitionFailed {
        /// Number of bytes asked for.
        requested: usize,
        /// Provider-specific explanation.
        reason: String,
    },

    /// A sub-allocation would run past the end of the arena.
    #[error(
        "arena out of memory: {requested} bytes requested for {shape} at offset {cursor} of a {capacity}-byte arena"
    )]
    CapacityExceeded {
        /// Fixed capacity of the arena in bytes.
        capacity: usize,
        /// Cursor position when the request was made.
        cursor: usize,
        /// Bytes requested (`usize::MAX` if the size computation overflowed).
        requested: usize,
        /// Type or array shape that was requested, e.g. `[f64; 512]`.
        shape: String,
    },

    /// The background reclaimer thread could not be started.
    #[error("failed to start arena reclaimer: {0}")]
    ReclaimerUnavailable(String),
}

/// Result type for arena operations.
pub type ArenaResult<T> = Result<T, ArenaError>;
