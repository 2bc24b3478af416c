//! # Pool Configuration
//!
//! Size-class bounds and retention policy, loaded once at startup from a
//! TOML file or built in code.
//!
//! ```toml
//! min_pooled_size = 2048
//! max_pooled_size = 16777216
//! max_retained_per_class = 64
//! deferred_cleanup = true
//! ```

use std::path::Path;

use callarena_core::ARENA_ALIGN;
use serde::Deserialize;

use crate::error::{PoolError, PoolResult};
use crate::size_class::SizeClasses;

/// Minimum size of a pooled arena (2 KiB).
pub const MIN_POOLED_ARENA_SIZE: usize = 2048;

/// Maximum size of a pooled arena (16 MiB). Larger requests bypass the pool.
pub const MAX_POOLED_ARENA_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for an [`ArenaPool`](crate::ArenaPool).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Smallest pooled capacity; smaller requests are rounded up to it.
    /// Must be a power of two and at least 8 bytes.
    pub min_pooled_size: usize,

    /// Largest pooled capacity. Must be a power of two `>= min_pooled_size`.
    pub max_pooled_size: usize,

    /// Cap on idle arenas kept per class; returns beyond it are freed.
    /// `None` keeps every returned arena.
    pub max_retained_per_class: Option<usize>,

    /// Route drop-time release of abandoned pool arenas through a
    /// background reclaim thread instead of releasing inline.
    pub deferred_cleanup: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pooled_size: MIN_POOLED_ARENA_SIZE,
            max_pooled_size: MAX_POOLED_ARENA_SIZE,
            max_retained_per_class: None,
            deferred_cleanup: false,
        }
    }
}

impl PoolConfig {
    /// Parses and validates a TOML document.
    ///
    /// Missing keys take their [`Default`] values.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ConfigParse`] for malformed TOML or unknown keys,
    /// and [`PoolError::InvalidConfig`] for out-of-range values.
    pub fn from_toml_str(source: &str) -> PoolResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if the file cannot be read, plus
    /// everything [`from_toml_str`](Self::from_toml_str) returns.
    pub fn load(path: impl AsRef<Path>) -> PoolResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            PoolError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks the size bounds and retention cap.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> PoolResult<()> {
        if !self.min_pooled_size.is_power_of_two() {
            return Err(PoolError::InvalidConfig(format!(
                "min_pooled_size ({}) must be a power of two",
                self.min_pooled_size
            )));
        }
        if !self.max_pooled_size.is_power_of_two() {
            return Err(PoolError::InvalidConfig(format!(
                "max_pooled_size ({}) must be a power of two",
                self.max_pooled_size
            )));
        }
        if self.min_pooled_size < ARENA_ALIGN {
            return Err(PoolError::InvalidConfig(format!(
                "min_pooled_size ({}) must be at least {ARENA_ALIGN} bytes",
                self.min_pooled_size
            )));
        }
        if self.max_pooled_size < self.min_pooled_size {
            return Err(PoolError::InvalidConfig(format!(
                "max_pooled_size ({}) must be >= min_pooled_size ({})",
                self.max_pooled_size, self.min_pooled_size
            )));
        }
        if self.max_retained_per_class == Some(0) {
            return Err(PoolError::InvalidConfig(
                "max_retained_per_class must be > 0".to_owned(),
            ));
        }
        Ok(())
    }

    /// The size classes these bounds describe.
    #[must_use]
    pub const fn size_classes(&self) -> SizeClasses {
        SizeClasses::new(self.min_pooled_size, self.max_pooled_size)
    }
}
