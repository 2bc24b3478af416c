//! # Deferred Buffer Reclamation
//!
//! Leak backstop for arenas dropped without an explicit `free`.
//!
//! ```text
//!   Thread 1 (drop Arena) ──┐
//!   Thread 2 (drop Arena) ──┼──> [crossbeam channel] ──> [Reclaim Thread] ──> provider.release
//!   Thread N (drop Arena) ──┘
//! ```
//!
//! A queued release frees its buffer when it is dropped, wherever that
//! happens: on the reclaim thread, inline when the thread has gone away, or
//! with the channel's queue at shutdown. Nothing queued is ever leaked, but
//! no timing is promised either. Explicit `free` stays the primary path.

#![allow(unsafe_code)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, unbounded, Receiver, Sender};

use crate::error::{ArenaError, ArenaResult};
use crate::provider::{RawBuffer, RawProvider};

/// A buffer waiting to be given back to its provider.
pub(crate) struct PendingRelease {
    buffer: Option<RawBuffer>,
    provider: Arc<dyn RawProvider>,
}

impl PendingRelease {
    /// Pairs a buffer with the provider that produced it.
    ///
    /// Only the arena builds these, and only from buffers it acquired from
    /// `provider`.
    pub(crate) fn new(buffer: RawBuffer, provider: Arc<dyn RawProvider>) -> Self {
        Self {
            buffer: Some(buffer),
            provider,
        }
    }

    /// Size of the pending buffer in bytes.
    fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, RawBuffer::len)
    }
}

impl Drop for PendingRelease {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            // SAFETY: `new` is only called with a buffer acquired from
            // `self.provider`, and the Option makes this run once.
            unsafe { self.provider.release(buffer) };
        }
    }
}

impl fmt::Debug for PendingRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRelease").field("len", &self.len()).finish()
    }
}

/// Cheap, cloneable sender side of a [`Reclaimer`].
#[derive(Clone, Debug)]
pub struct ReclaimHandle {
    sender: Sender<PendingRelease>,
}

impl ReclaimHandle {
    /// Queues a release on the reclaim thread.
    ///
    /// Falls back to releasing inline when the thread has shut down.
    pub(crate) fn submit(&self, pending: PendingRelease) {
        if let Err(rejected) = self.sender.send(pending) {
            tracing::trace!("reclaimer gone, releasing {} bytes inline", rejected.0.len());
            drop(rejected.0);
        }
    }
}

/// Background thread that releases abandoned arena buffers.
///
/// Dropping the reclaimer stops and joins the thread.
pub struct Reclaimer {
    handle: ReclaimHandle,
    stop: Sender<()>,
    worker: Option<JoinHandle<()>>,
    released: Arc<AtomicU64>,
}

impl Reclaimer {
    /// Starts the reclaim thread.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::ReclaimerUnavailable`] if the OS refuses to
    /// spawn the thread.
    pub fn spawn() -> ArenaResult<Self> {
        let (sender, jobs) = unbounded::<PendingRelease>();
        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let released = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&released);
        let worker = thread::Builder::new()
            .name("callarena-reclaim".to_owned())
            .spawn(move || reclaim_loop(&jobs, &stop_rx, &counter))
            .map_err(|err| ArenaError::ReclaimerUnavailable(err.to_string()))?;

        tracing::debug!("arena reclaimer started");
        Ok(Self {
            handle: ReclaimHandle { sender },
            stop,
            worker: Some(worker),
            released,
        })
    }

    /// Returns a handle arenas can carry to route their drop-time release here.
    #[must_use]
    pub fn handle(&self) -> ReclaimHandle {
        self.handle.clone()
    }

    /// Number of buffers released by the reclaim thread so far.
    #[must_use]
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Stops the thread after it drains the queue, returning the final count.
    #[must_use]
    pub fn shutdown(mut self) -> u64 {
        self.stop_and_join();
        self.released()
    }

    fn stop_and_join(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.stop.try_send(());
        if worker.join().is_err() {
            tracing::warn!("arena reclaimer thread panicked");
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

impl fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reclaimer")
            .field("running", &self.worker.is_some())
            .field("released", &self.released())
            .finish()
    }
}

fn reclaim_loop(jobs: &Receiver<PendingRelease>, stop: &Receiver<()>, released: &AtomicU64) {
    loop {
        select! {
            recv(jobs) -> job => match job {
                Ok(pending) => {
                    drop(pending);
                    released.fetch_add(1, Ordering::AcqRel);
                }
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }
    for pending in jobs.try_iter() {
        drop(pending);
        released.fetch_add(1, Ordering::AcqRel);
    }
    tracing::debug!("arena reclaimer stopped");
}
