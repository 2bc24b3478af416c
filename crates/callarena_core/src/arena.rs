//! # Arena Allocator
//!
//! A bump allocator over one fixed-size raw buffer, freed all at once.
//!
//! Sub-allocations are handed out as `&mut T` / `&mut [T]` borrowed from the
//! arena, so the borrow checker keeps them from outliving a `reset` or
//! `free` (both take `&mut self`). Raw pointers for a foreign call are
//! taken from those references for the duration of the call.
//!
//! ## Safety Note
//!
//! Handing out disjoint mutable views of one buffer through `&self` needs
//! `unsafe`. The invariants every block relies on:
//!
//! - `cursor <= capacity` and every live view lies inside `[0, cursor)`.
//! - views never overlap: each one starts at or after the previous cursor.
//! - bytes at or past `cursor` are zero, so any `Zeroable` type may be
//!   materialised there (fresh buffers are zeroed, `reset` re-zeroes the
//!   used prefix).

#![allow(unsafe_code)]

use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::error::{ArenaError, ArenaResult};
use crate::layout;
use crate::provider::{RawBuffer, RawProvider, SystemProvider, BUFFER_ALIGN};
use crate::reclaim::{PendingRelease, ReclaimHandle};

/// A bump-pointer arena over one externally owned buffer.
///
/// Allocations are fast (bump a cursor). Memory is released all at once by
/// [`free`](Self::free), or invalidated and kept by [`reset`](Self::reset).
///
/// # Thread Safety
///
/// `Arena` is `Send` but not `Sync`: one owner at a time, handed between
/// threads through a pool.
///
/// # Example
///
/// ```rust,ignore
/// let mut arena = Arena::new(1024)?;
///
/// let count = arena.alloc_value(3_i64);
/// let dims = arena.alloc_slice_copy(&[2_i64, 3, 4]);
/// engine.call(count as *mut i64, dims.as_mut_ptr());
///
/// arena.free();
/// ```
pub struct Arena {
    /// The backing storage, `None` once freed.
    buffer: Option<RawBuffer>,
    /// Fixed capacity in bytes.
    capacity: usize,
    /// Offset of the next free byte.
    cursor: Cell<usize>,
    /// Pool class this arena belongs to, `None` when unmanaged.
    size_class: Option<usize>,
    /// Where the buffer came from and must go back to.
    provider: Arc<dyn RawProvider>,
    /// Drop-time release route, inline when `None`.
    reclaim: Option<ReclaimHandle>,
}

impl Arena {
    /// Creates an unmanaged arena of exactly `capacity` bytes from the
    /// system allocator.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::AcquisitionFailed`] if the buffer cannot be
    /// acquired.
    pub fn new(capacity: usize) -> ArenaResult<Self> {
        Self::with_provider(capacity, Arc::new(SystemProvider))
    }

    /// Creates an unmanaged arena of exactly `capacity` bytes from `provider`.
    ///
    /// # Errors
    ///
    /// Propagates the provider's acquisition failure.
    pub fn with_provider(capacity: usize, provider: Arc<dyn RawProvider>) -> ArenaResult<Self> {
        let buffer = provider.acquire(capacity)?;
        if !provider.zeroes_on_acquire() {
            // SAFETY: the provider contract makes the buffer valid for
            // `capacity` writable bytes.
            unsafe { ptr::write_bytes(buffer.as_ptr(), 0, capacity) };
        }
        tracing::trace!("arena: acquired {} bytes", capacity);
        Ok(Self {
            buffer: Some(buffer),
            capacity,
            cursor: Cell::new(0),
            size_class: None,
            provider,
            reclaim: None,
        })
    }

    /// Tags the arena as belonging to pool size class `index`.
    #[must_use]
    pub fn with_size_class(mut self, index: usize) -> Self {
        self.size_class = Some(index);
        self
    }

    /// Routes the drop-time release of an abandoned arena through `handle`.
    #[must_use]
    pub fn with_reclaimer(mut self, handle: ReclaimHandle) -> Self {
        self.reclaim = Some(handle);
        self
    }

    /// Total capacity in bytes (0 once freed).
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes consumed so far, including alignment padding.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.cursor.get()
    }

    /// Bytes still available.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.used()
    }

    /// Pool size class, or `None` for an unmanaged arena.
    #[inline]
    #[must_use]
    pub const fn size_class(&self) -> Option<usize> {
        self.size_class
    }

    /// Whether the backing buffer has been released.
    #[inline]
    #[must_use]
    pub const fn is_freed(&self) -> bool {
        self.buffer.is_none()
    }

    /// Address of the backing buffer, null once freed.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.buffer
            .as_ref()
            .map_or(ptr::null(), |buffer| buffer.as_ptr().cast_const())
    }

    /// The whole backing buffer, `capacity` bytes, for inspection.
    ///
    /// Takes `&mut self` so no sub-allocation can be alive at the same time.
    #[must_use]
    pub fn as_bytes(&mut self) -> &[u8] {
        match &self.buffer {
            // SAFETY: the buffer is valid for `capacity` bytes and no
            // mutable view into it can be alive while we hold `&mut self`.
            Some(buffer) => unsafe { std::slice::from_raw_parts(buffer.as_ptr(), self.capacity) },
            None => &[],
        }
    }

    /// Allocates one zeroed `T`.
    ///
    /// # Panics
    ///
    /// Panics if the arena cannot fit `T`. Overruns are sizing bugs in the
    /// caller, not conditions to recover from. Also panics if `T` is aligned
    /// beyond [`BUFFER_ALIGN`].
    #[allow(clippy::mut_from_ref)]
    pub fn alloc<T: Zeroable>(&self) -> &mut T {
        match self.try_alloc::<T>() {
            Ok(value) => value,
            Err(err) => overrun(&err),
        }
    }

    /// Allocates `count` zeroed `T`s as one contiguous slice.
    ///
    /// # Panics
    ///
    /// Panics if the arena cannot fit the slice, or if `T` is aligned beyond
    /// [`BUFFER_ALIGN`].
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice<T: Zeroable>(&self, count: usize) -> &mut [T] {
        match self.try_alloc_slice::<T>(count) {
            Ok(slice) => slice,
            Err(err) => overrun(&err),
        }
    }

    /// Allocates a `T` and moves `value` into it.
    ///
    /// # Panics
    ///
    /// Same conditions as [`alloc`](Self::alloc).
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_value<T: Pod>(&self, value: T) -> &mut T {
        let slot = self.alloc::<T>();
        *slot = value;
        slot
    }

    /// Allocates a copy of `values`.
    ///
    /// # Panics
    ///
    /// Same conditions as [`alloc_slice`](Self::alloc_slice).
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_copy<T: Pod>(&self, values: &[T]) -> &mut [T] {
        let slice = self.alloc_slice::<T>(values.len());
        slice.copy_from_slice(values);
        slice
    }

    /// Like [`alloc`](Self::alloc), but reports an overrun instead of panicking.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::CapacityExceeded`] if `T` does not fit. The
    /// cursor is left untouched.
    ///
    /// # Panics
    ///
    /// Panics if `T` is aligned beyond [`BUFFER_ALIGN`].
    #[allow(clippy::mut_from_ref)]
    pub fn try_alloc<T: Zeroable>(&self) -> ArenaResult<&mut T> {
        let size = size_of::<T>();
        if size == 0 {
            // SAFETY: any non-null aligned pointer is a valid zero-sized `T`.
            return Ok(unsafe { &mut *NonNull::<T>::dangling().as_ptr() });
        }
        let ptr = self
            .bump(size, align_of::<T>())
            .ok_or_else(|| self.exceeded(size, type_name::<T>().to_owned()))?;
        // SAFETY: `bump` returned `size` in-bounds, suitably aligned bytes
        // that no other view covers; they are zero, which is a valid `T`.
        Ok(unsafe { &mut *ptr.cast::<T>().as_ptr() })
    }

    /// Like [`alloc_slice`](Self::alloc_slice), but reports an overrun
    /// instead of panicking.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::CapacityExceeded`] if the slice does not fit or
    /// its byte size overflows. The cursor is left untouched.
    ///
    /// # Panics
    ///
    /// Panics if `T` is aligned beyond [`BUFFER_ALIGN`].
    #[allow(clippy::mut_from_ref)]
    pub fn try_alloc_slice<T: Zeroable>(&self, count: usize) -> ArenaResult<&mut [T]> {
        let shape = || format!("[{}; {count}]", type_name::<T>());
        let Some(size) = size_of::<T>().checked_mul(count) else {
            return Err(self.exceeded(usize::MAX, shape()));
        };
        if size == 0 {
            // SAFETY: a dangling aligned pointer is valid for a slice of
            // zero bytes.
            return Ok(unsafe {
                std::slice::from_raw_parts_mut(NonNull::<T>::dangling().as_ptr(), count)
            });
        }
        let ptr = self
            .bump(size, align_of::<T>())
            .ok_or_else(|| self.exceeded(size, shape()))?;
        // SAFETY: as in `try_alloc`, for `count` consecutive `T`s.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.cast::<T>().as_ptr(), count) })
    }

    /// Invalidates every allocation and rewinds the cursor, keeping the buffer.
    ///
    /// The used region is zeroed so stale data is never reinterpreted by the
    /// next batch. Safe to call on a freed arena.
    pub fn reset(&mut self) {
        let used = self.cursor.get().min(self.capacity);
        if let Some(buffer) = &self.buffer {
            if used > 0 {
                // SAFETY: `used <= capacity` bytes of a buffer we own, and
                // `&mut self` rules out any live view.
                unsafe { ptr::write_bytes(buffer.as_ptr(), 0, used) };
            }
        }
        self.cursor.set(0);
    }

    /// Releases the buffer to its provider. Calling it again is a no-op.
    pub fn free(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            tracing::trace!("arena: releasing {} bytes", buffer.len());
            // SAFETY: the buffer came from `self.provider` and was just
            // taken out of the arena, so it is released exactly once.
            unsafe { self.provider.release(buffer) };
        }
        self.capacity = 0;
        self.cursor.set(0);
        self.size_class = None;
    }

    /// Reserves `size > 0` bytes aligned to `align`, advancing the cursor.
    fn bump(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        assert!(
            align <= BUFFER_ALIGN,
            "arena cannot place a type aligned to {align} bytes (maximum {BUFFER_ALIGN})"
        );
        let placement = layout::place(self.cursor.get(), size, align)?;
        if placement.end > self.capacity {
            return None;
        }
        let buffer = self.buffer.as_ref()?;
        self.cursor.set(placement.next.min(self.capacity));
        // SAFETY: `placement.start < placement.end <= capacity`, so the
        // offset stays inside the buffer and the result is non-null.
        Some(unsafe { NonNull::new_unchecked(buffer.as_ptr().add(placement.start)) })
    }

    fn exceeded(&self, requested: usize, shape: String) -> ArenaError {
        ArenaError::CapacityExceeded {
            capacity: self.capacity,
            cursor: self.cursor.get(),
            requested,
            shape,
        }
    }
}

#[cold]
#[inline(never)]
fn overrun(err: &ArenaError) -> ! {
    panic!("{err}")
}

impl Drop for Arena {
    fn drop(&mut self) {
        let Some(buffer) = self.buffer.take() else {
            return;
        };
        tracing::debug!(
            "arena of {} bytes dropped without free, releasing through backstop",
            self.capacity
        );
        let pending = PendingRelease::new(buffer, Arc::clone(&self.provider));
        match &self.reclaim {
            Some(handle) => handle.submit(pending),
            None => drop(pending),
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor.get())
            .field("size_class", &self.size_class)
            .field("freed", &self.is_freed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TrackingProvider;

    fn tracked() -> Arc<TrackingProvider> {
        Arc::new(TrackingProvider::new(SystemProvider))
    }

    /// Hands out 0xFF-filled buffers and keeps the default
    /// `zeroes_on_acquire`, like a recycling foreign allocator would.
    struct DirtyProvider;

    // SAFETY: buffers come from `SystemProvider` and go back to it unchanged;
    // filling them does not affect validity or ownership.
    unsafe impl RawProvider for DirtyProvider {
        fn acquire(&self, size: usize) -> ArenaResult<RawBuffer> {
            let buffer = SystemProvider.acquire(size)?;
            // SAFETY: freshly acquired buffer of `size` writable bytes.
            unsafe { ptr::write_bytes(buffer.as_ptr(), 0xFF, size) };
            Ok(buffer)
        }

        unsafe fn release(&self, buffer: RawBuffer) {
            // SAFETY: forwarded; the buffer came from `SystemProvider`.
            unsafe { SystemProvider.release(buffer) };
        }
    }

    #[test]
    fn test_reference_cursor_progression() {
        let mut arena = Arena::new(1024).unwrap();
        for _ in 0..2 {
            assert_eq!(arena.capacity(), 1024);
            assert_eq!(arena.used(), 0);
            let _ = arena.alloc::<i64>();
            assert_eq!(arena.used(), 8);
            let _ = arena.alloc::<i32>();
            assert_eq!(arena.used(), 16);
            let _ = arena.alloc_slice::<u8>(9);
            assert_eq!(arena.used(), 32);

            assert!(arena.try_alloc::<[i64; 512]>().is_err());
            assert!(arena.try_alloc_slice::<f64>(512).is_err());
            assert_eq!(arena.used(), 32);
            arena.reset();
        }
        arena.free();
    }

    #[test]
    #[should_panic(expected = "arena out of memory")]
    fn test_alloc_overrun_is_fatal() {
        let arena = Arena::new(1024).unwrap();
        let _ = arena.alloc::<i64>();
        let _ = arena.alloc::<[i64; 512]>();
    }

    #[test]
    #[should_panic(expected = "[f64; 512]")]
    fn test_alloc_slice_overrun_names_shape() {
        let arena = Arena::new(1024).unwrap();
        let _ = arena.alloc_slice::<f64>(512);
    }

    #[test]
    fn test_overrun_error_carries_context() {
        let arena = Arena::new(64).unwrap();
        let _ = arena.alloc::<[u64; 4]>();
        let err = arena.try_alloc::<[u64; 8]>().unwrap_err();
        assert_eq!(
            err,
            ArenaError::CapacityExceeded {
                capacity: 64,
                cursor: 32,
                requested: 64,
                shape: "[u64; 8]".to_owned(),
            }
        );
    }

    #[test]
    fn test_slice_size_overflow_is_overrun() {
        let arena = Arena::new(64).unwrap();
        let err = arena.try_alloc_slice::<u64>(usize::MAX).unwrap_err();
        assert!(matches!(err, ArenaError::CapacityExceeded { requested: usize::MAX, .. }));
    }

    #[test]
    fn test_every_address_is_eight_byte_aligned() {
        let arena = Arena::new(4096).unwrap();
        let base = arena.as_ptr() as usize;
        for i in 0..20 {
            let a = arena.alloc::<u8>() as *mut u8 as usize;
            let b = arena.alloc_slice::<u16>(i + 1).as_mut_ptr() as usize;
            let c = arena.alloc::<u32>() as *mut u32 as usize;
            for addr in [a, b, c] {
                assert_eq!(addr % 8, 0);
                assert_eq!((addr - base) % 8, 0);
            }
        }
    }

    #[test]
    fn test_allocations_do_not_overlap() {
        let arena = Arena::new(1024).unwrap();
        let mut ranges = Vec::new();
        for n in 1..12 {
            let slice = arena.alloc_slice::<u8>(n);
            slice.fill(n as u8);
            let start = slice.as_ptr() as usize;
            ranges.push((start, start + n));
        }
        for (i, &(s1, e1)) in ranges.iter().enumerate() {
            for &(s2, e2) in &ranges[i + 1..] {
                assert!(e1 <= s2 || e2 <= s1, "overlap: {s1}..{e1} and {s2}..{e2}");
            }
        }
    }

    #[test]
    fn test_values_are_zeroed_and_copied() {
        let arena = Arena::new(256).unwrap();
        assert_eq!(*arena.alloc::<u64>(), 0);
        assert!(arena.alloc_slice::<u32>(8).iter().all(|&v| v == 0));

        let value = arena.alloc_value(42_i64);
        assert_eq!(*value, 42);
        let dims = arena.alloc_slice_copy(&[2_i64, 3, 4]);
        assert_eq!(dims, &[2, 3, 4]);
    }

    #[test]
    fn test_reset_zeroes_used_region() {
        let mut arena = Arena::new(128).unwrap();
        arena.alloc_slice::<u8>(40).fill(0xAB);
        arena.alloc_value(u64::MAX);
        assert!(arena.as_bytes().iter().any(|&b| b != 0));

        arena.reset();
        assert_eq!(arena.used(), 0);
        assert!(arena.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_overaligned_requests_start_on_their_alignment() {
        #[derive(Clone, Copy, Zeroable)]
        #[repr(C, align(32))]
        struct Wide([u8; 32]);

        let arena = Arena::new(256).unwrap();
        let _ = arena.alloc::<u8>();
        let wide = arena.alloc::<Wide>();
        assert_eq!(wide.0, [0; 32]);
        assert_eq!(wide as *mut Wide as usize % 32, 0);
        assert_eq!(arena.used(), 64);
    }

    #[test]
    fn test_zero_sized_requests_do_not_move_cursor() {
        let arena = Arena::new(64).unwrap();
        let _ = arena.alloc::<()>();
        assert!(arena.alloc_slice::<u64>(0).is_empty());
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_cursor_never_exceeds_odd_capacity() {
        let arena = Arena::new(13).unwrap();
        let _ = arena.alloc_slice::<u8>(13);
        assert_eq!(arena.used(), 13);
        assert_eq!(arena.remaining(), 0);
        assert!(arena.try_alloc::<u8>().is_err());
    }

    #[test]
    fn test_free_is_idempotent() {
        let provider = tracked();
        let mut arena = Arena::with_provider(512, provider.clone()).unwrap();
        assert_eq!(provider.live_buffers(), 1);

        arena.free();
        arena.free();
        assert!(arena.is_freed());
        assert_eq!(arena.capacity(), 0);
        assert_eq!(arena.size_class(), None);
        assert_eq!(provider.released_total(), 1);

        arena.reset();
        assert!(arena.as_ptr().is_null());
        drop(arena);
        assert_eq!(provider.released_total(), 1);
    }

    #[test]
    fn test_allocating_from_freed_arena_overruns() {
        let mut arena = Arena::new(64).unwrap();
        arena.free();
        assert!(arena.try_alloc::<u8>().is_err());
    }

    #[test]
    fn test_drop_without_free_releases_inline() {
        let provider = tracked();
        let arena = Arena::with_provider(1024, provider.clone()).unwrap();
        drop(arena);
        assert_eq!(provider.live_buffers(), 0);
    }

    #[test]
    fn test_acquisition_failure_propagates() {
        let provider = Arc::new(TrackingProvider::with_limit(SystemProvider, 100));
        let err = Arena::with_provider(101, provider).unwrap_err();
        assert!(matches!(err, ArenaError::AcquisitionFailed { requested: 101, .. }));
    }

    #[test]
    fn test_unzeroed_provider_buffers_are_cleared() {
        assert!(!DirtyProvider.zeroes_on_acquire());
        let mut arena = Arena::with_provider(256, Arc::new(DirtyProvider)).unwrap();
        assert!(arena.as_bytes().iter().all(|&b| b == 0));

        assert_eq!(*arena.alloc::<u64>(), 0);
        assert!(arena.alloc_slice::<u32>(16).iter().all(|&v| v == 0));
        arena.free();
    }

    #[test]
    fn test_size_class_tag() {
        let arena = Arena::new(2048).unwrap().with_size_class(0);
        assert_eq!(arena.size_class(), Some(0));
    }
}
