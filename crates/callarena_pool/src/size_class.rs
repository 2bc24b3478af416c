//! # Size Classes
//!
//! Power-of-two bucketing between a minimum and a maximum pooled size.
//!
//! ```text
//!   index:     0      1      2     ...   13
//!   capacity:  2 KiB  4 KiB  8 KiB ...   16 MiB
//! ```
//!
//! Lookup is O(1): the class of a size is the position of the highest set
//! bit of `size - 1`, offset by the minimum class.

/// Smallest power of two `>= n`, or `None` if it does not fit in `usize`.
///
/// `next_power_of_two(0)` is 1.
#[inline]
#[must_use]
pub const fn next_power_of_two(n: usize) -> Option<usize> {
    n.checked_next_power_of_two()
}

/// `ceil(log2(size))`: the exponent of the power of two that holds `size`.
///
/// Sizes 0 and 1 both map to 0.
#[inline]
#[must_use]
pub const fn ceil_log2(size: usize) -> u32 {
    if size <= 1 {
        0
    } else {
        usize::BITS - (size - 1).leading_zeros()
    }
}

/// Index of the class holding `size` when the smallest class is `2^min_shift`.
///
/// Sizes at or below the smallest class map to index 0.
#[inline]
#[must_use]
pub const fn class_index(size: usize, min_shift: u32) -> usize {
    ceil_log2(size).saturating_sub(min_shift) as usize
}

/// The set of power-of-two classes a pool manages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeClasses {
    min_shift: u32,
    max_shift: u32,
}

impl SizeClasses {
    /// Classes from `min_size` to `max_size` inclusive.
    ///
    /// Both bounds are rounded up to powers of two; `max_size` is raised to
    /// `min_size` if smaller. Validation lives in
    /// [`PoolConfig::validate`](crate::PoolConfig::validate).
    #[must_use]
    pub const fn new(min_size: usize, max_size: usize) -> Self {
        let min_shift = ceil_log2(min_size);
        let max_shift = ceil_log2(max_size);
        Self {
            min_shift,
            max_shift: if max_shift < min_shift { min_shift } else { max_shift },
        }
    }

    /// Number of classes, `log2(max / min) + 1`.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        (self.max_shift - self.min_shift) as usize + 1
    }

    /// Always `false`: there is at least one class.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Capacity of the smallest class.
    #[inline]
    #[must_use]
    pub const fn min_size(&self) -> usize {
        1 << self.min_shift
    }

    /// Capacity of the largest class.
    #[inline]
    #[must_use]
    pub const fn max_size(&self) -> usize {
        1 << self.max_shift
    }

    /// Capacity of class `index`.
    #[inline]
    #[must_use]
    pub const fn capacity_of(&self, index: usize) -> usize {
        1 << (index + self.min_shift as usize)
    }

    /// Whether `index` names one of these classes.
    #[inline]
    #[must_use]
    pub const fn contains(&self, index: usize) -> bool {
        index < self.len()
    }

    /// Class that serves a request of `size` bytes, or `None` when the
    /// rounded size exceeds the largest class.
    #[inline]
    #[must_use]
    pub const fn class_for(&self, size: usize) -> Option<usize> {
        if ceil_log2(size) > self.max_shift {
            return None;
        }
        Some(class_index(size, self.min_shift))
    }
}
