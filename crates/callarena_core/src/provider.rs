//! # Raw Memory Providers
//!
//! The seam between the arena and whoever owns the off-heap memory.
//!
//! A provider exposes two primitives, `acquire` and `release`, both assumed
//! expensive and callable from any thread. The arena never reasons about
//! what happens behind them.
//!
//! ## Safety Note
//!
//! Buffers are raw pointers handed across threads, so this module contains
//! the `unsafe` needed to describe them. Every block carries a SAFETY note.

#![allow(unsafe_code)]

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{ArenaError, ArenaResult};

/// Minimum alignment of every buffer a provider hands out.
///
/// Types aligned beyond this cannot be placed in an arena.
pub const BUFFER_ALIGN: usize = 64;

/// A contiguous block of raw bytes owned by exactly one holder.
///
/// `RawBuffer` has no destructor: it must be given back to the provider that
/// produced it through [`RawProvider::release`].
pub struct RawBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: a RawBuffer is a unique handle to memory nobody else references;
// moving it to another thread moves that ownership with it.
unsafe impl Send for RawBuffer {}

impl RawBuffer {
    /// Wraps a raw allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes, aligned to
    /// [`BUFFER_ALIGN`], and not referenced by anything else until the buffer
    /// is released.
    #[must_use]
    pub const unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// An empty buffer that owns no memory.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
        }
    }

    /// Pointer to the first byte.
    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer owns no bytes.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Source of raw arena buffers.
///
/// # Safety
///
/// Implementors guarantee that every buffer returned by `acquire(size)` is
/// valid for `size` bytes, aligned to [`BUFFER_ALIGN`], exclusively owned by
/// the caller, and stays valid until passed back to `release`. If
/// [`zeroes_on_acquire`](Self::zeroes_on_acquire) returns `true`, the bytes
/// must also be zero-filled.
pub unsafe trait RawProvider: Send + Sync {
    /// Acquires a buffer of at least `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::AcquisitionFailed`] when the memory cannot be
    /// supplied. Callers propagate this; nothing retries internally.
    fn acquire(&self, size: usize) -> ArenaResult<RawBuffer>;

    /// Releases a buffer.
    ///
    /// # Safety
    ///
    /// `buffer` must have come from `acquire` on this same provider and must
    /// not be used afterwards.
    unsafe fn release(&self, buffer: RawBuffer);

    /// Whether acquired buffers are already zero-filled.
    ///
    /// When `false` the arena clears a fresh buffer itself.
    fn zeroes_on_acquire(&self) -> bool {
        false
    }
}

/// Provider backed by the global allocator.
///
/// Buffers are zero-filled and aligned to [`BUFFER_ALIGN`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProvider;

// SAFETY: buffers come straight from `alloc_zeroed` with a BUFFER_ALIGN
// layout of exactly `size` bytes and are released with the same layout.
unsafe impl RawProvider for SystemProvider {
    fn acquire(&self, size: usize) -> ArenaResult<RawBuffer> {
        if size == 0 {
            return Ok(RawBuffer::empty());
        }
        let layout = Layout::from_size_align(size, BUFFER_ALIGN).map_err(|err| {
            ArenaError::AcquisitionFailed {
                requested: size,
                reason: err.to_string(),
            }
        })?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| ArenaError::AcquisitionFailed {
            requested: size,
            reason: "system allocator returned null".to_owned(),
        })?;
        // SAFETY: fresh allocation of `size` bytes at BUFFER_ALIGN, unaliased.
        Ok(unsafe { RawBuffer::from_raw_parts(ptr, size) })
    }

    unsafe fn release(&self, buffer: RawBuffer) {
        if buffer.is_empty() {
            return;
        }
        // SAFETY: the caller passes a buffer from `acquire`, which validated
        // this exact size/alignment pair when allocating.
        unsafe {
            let layout = Layout::from_size_align_unchecked(buffer.len(), BUFFER_ALIGN);
            dealloc(buffer.as_ptr(), layout);
        }
    }

    fn zeroes_on_acquire(&self) -> bool {
        true
    }
}

/// Provider wrapper that counts live buffers and bytes.
///
/// Optionally enforces a budget on live bytes, turning requests past it into
/// acquisition failures. Useful for capping off-heap memory per engine
/// connection and for observing release behaviour.
#[derive(Debug, Default)]
pub struct TrackingProvider<P = SystemProvider> {
    inner: P,
    byte_limit: Option<usize>,
    live_buffers: AtomicUsize,
    live_bytes: AtomicUsize,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
}

impl<P: RawProvider> TrackingProvider<P> {
    /// Wraps `inner` without a byte budget.
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            byte_limit: None,
            live_buffers: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            acquired_total: AtomicU64::new(0),
            released_total: AtomicU64::new(0),
        }
    }

    /// Wraps `inner`, failing acquisitions that would exceed `limit` live bytes.
    #[must_use]
    pub fn with_limit(inner: P, limit: usize) -> Self {
        Self {
            byte_limit: Some(limit),
            ..Self::new(inner)
        }
    }

    /// Buffers currently acquired and not yet released.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::Acquire)
    }

    /// Bytes currently acquired and not yet released.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    /// Total successful acquisitions.
    #[must_use]
    pub fn acquired_total(&self) -> u64 {
        self.acquired_total.load(Ordering::Relaxed)
    }

    /// Total releases.
    #[must_use]
    pub fn released_total(&self) -> u64 {
        self.released_total.load(Ordering::Relaxed)
    }

    fn reserve(&self, size: usize) -> ArenaResult<()> {
        let Some(limit) = self.byte_limit else {
            self.live_bytes.fetch_add(size, Ordering::AcqRel);
            return Ok(());
        };
        self.live_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                live.checked_add(size).filter(|&total| total <= limit)
            })
            .map(|_| ())
            .map_err(|live| ArenaError::AcquisitionFailed {
                requested: size,
                reason: format!("byte budget exhausted: {live} of {limit} bytes live"),
            })
    }
}

// SAFETY: every buffer is produced and released by `inner`, which upholds
// the provider contract; the wrapper only updates counters.
unsafe impl<P: RawProvider> RawProvider for TrackingProvider<P> {
    fn acquire(&self, size: usize) -> ArenaResult<RawBuffer> {
        self.reserve(size)?;
        match self.inner.acquire(size) {
            Ok(buffer) => {
                self.live_buffers.fetch_add(1, Ordering::AcqRel);
                self.acquired_total.fetch_add(1, Ordering::Relaxed);
                Ok(buffer)
            }
            Err(err) => {
                self.live_bytes.fetch_sub(size, Ordering::AcqRel);
                Err(err)
            }
        }
    }

    unsafe fn release(&self, buffer: RawBuffer) {
        let len = buffer.len();
        // SAFETY: forwarded from our caller; the buffer came from `inner`.
        unsafe { self.inner.release(buffer) };
        self.live_bytes.fetch_sub(len, Ordering::AcqRel);
        self.live_buffers.fetch_sub(1, Ordering::AcqRel);
        self.released_total.fetch_add(1, Ordering::Relaxed);
    }

    fn zeroes_on_acquire(&self) -> bool {
        self.inner.zeroes_on_acquire()
    }
}
