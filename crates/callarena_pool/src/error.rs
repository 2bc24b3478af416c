//! # Pool Error Types
//!
//! All errors that can occur while building or using an arena pool.

use callarena_core::ArenaError;
use thiserror::Error;

/// Errors that can occur in the arena pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The arena layer failed, typically a buffer acquisition.
    #[error(transparent)]
    Arena(#[from] ArenaError),

    /// Configuration values are out of range.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed.
    #[error("failed to parse pool configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The pool has been freed and hands out no more arenas.
    #[error("arena pool has been freed")]
    Closed,
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
