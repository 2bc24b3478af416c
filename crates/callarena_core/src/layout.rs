//! # Cursor Arithmetic
//!
//! The placement rule shared by [`Arena`](crate::Arena) and [`LayoutPlan`]:
//! a request starts at the cursor rounded up to the type's alignment (never
//! less than [`ARENA_ALIGN`]), and the cursor then moves to the end of the
//! request rounded up to the next multiple of [`ARENA_ALIGN`].
//!
//! ```text
//!   cursor=8   alloc::<i32>()        -> start 8,  end 12, cursor 16
//!   cursor=16  alloc_slice::<u8>(9)  -> start 16, end 25, cursor 32
//! ```

/// Alignment of every sub-allocation boundary, in bytes.
///
/// Foreign structures assume natural alignment for 64-bit fields.
pub const ARENA_ALIGN: usize = 8;

/// Rounds `offset` up to a multiple of `align`.
///
/// Returns `None` on overflow, or when `align` is not a power of two.
#[inline]
#[must_use]
pub const fn align_up(offset: usize, align: usize) -> Option<usize> {
    if !align.is_power_of_two() {
        return None;
    }
    match offset.checked_add(align - 1) {
        Some(bumped) => Some(bumped & !(align - 1)),
        None => None,
    }
}

/// Where a single request lands relative to the cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Placement {
    /// First byte of the request.
    pub start: usize,
    /// One past the last byte of the request.
    pub end: usize,
    /// Cursor after the request.
    pub next: usize,
}

/// Places `size` bytes with alignment `align` at `cursor`.
#[inline]
pub(crate) fn place(cursor: usize, size: usize, align: usize) -> Option<Placement> {
    let start = align_up(cursor, align.max(ARENA_ALIGN))?;
    let end = start.checked_add(size)?;
    let next = align_up(end, ARENA_ALIGN)?;
    Some(Placement { start, end, next })
}

/// Size-hint builder that replays the arena's cursor arithmetic.
///
/// Callers describe one foreign call's batch of values up front and size
/// the arena from [`LayoutPlan::size`]; an arena of at least that capacity
/// serves the same sequence of requests without overrunning.
///
/// # Example
///
/// ```rust,ignore
/// let plan = LayoutPlan::new().value::<i64>().slice::<u8>(9);
/// let arena = pool.get(plan.size())?;
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayoutPlan {
    size: usize,
}

impl LayoutPlan {
    /// Creates an empty plan.
    #[must_use]
    pub const fn new() -> Self {
        Self { size: 0 }
    }

    /// Adds one value of type `T`.
    #[must_use]
    pub fn value<T>(self) -> Self {
        self.bytes(std::mem::size_of::<T>(), std::mem::align_of::<T>())
    }

    /// Adds an array of `count` values of type `T`.
    #[must_use]
    pub fn slice<T>(self, count: usize) -> Self {
        self.bytes(
            std::mem::size_of::<T>().saturating_mul(count),
            std::mem::align_of::<T>(),
        )
    }

    /// Adds a raw request of `size` bytes aligned to `align`.
    ///
    /// Zero-sized requests never move the cursor. An `align` that is not a
    /// power of two saturates the plan to `usize::MAX`.
    #[must_use]
    pub fn bytes(self, size: usize, align: usize) -> Self {
        if size == 0 {
            return self;
        }
        let size = place(self.size, size, align).map_or(usize::MAX, |p| p.next);
        Self { size }
    }

    /// Arena capacity required for the planned batch, in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}
