//! An asynchronous I/O request queue that off-loads blocking filesystem
//! operations — `close`, directory open, directory close — from the
//! driver thread onto a pool of background workers, returning completions
//! through a concurrent channel.
//!
//! # Concurrency
//!
//! One "driver" thread at a time owns the API surface: submission
//! ([`Ioq::close`]/[`Ioq::opendir`]/[`Ioq::closedir`]), completion
//! ([`Ioq::pop`]/[`Ioq::trypop`]), [`Ioq::free`], [`Ioq::cancel`], and
//! [`Ioq::destroy`]. The driver role may move between threads as long as a
//! happens-before relation links the handoff; it must never be held by two
//! threads at once. In debug builds, concurrent calls to [`Ioq::pop`]/
//! [`Ioq::trypop`] from different threads panic rather than silently
//! racing — see the module's open-question resolution in `DESIGN.md`.
//!
//! # Entry lifecycle
//!
//! ```text
//! FREE ──submit──▶ SUBMITTED ──dispatch──▶ INFLIGHT ──publish──▶ COMPLETED ──ioq_free──▶ FREE
//!                      │                                │
//!                      └────ioq_cancel────▶ COMPLETED(error=ECANCELED)
//! ```

mod entry;
mod ring;
mod worker;

use std::ffi::CString;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use entry::{DirSlot, IoqEnt, IoqOp};

use crate::config::IoqConfig;
use crate::error::{QueueError, QueueResult};
use entry::{EntryPool, EntryPtr};
use ring::Ring;
use worker::WorkerPool;

fn path_to_cstring(path: &Path) -> QueueResult<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| QueueError::invalid_config("path contains an interior NUL byte"))
}

/// Owns the submission ring, the completion ring, the `depth`-entry free
/// pool, and the worker pool draining one ring into the other.
pub struct Ioq {
    pool: EntryPool,
    submission: Arc<Ring>,
    completion: Arc<Ring>,
    workers: Option<WorkerPool>,
    shut_down: AtomicBool,
    #[cfg(debug_assertions)]
    driver_busy: AtomicBool,
}

impl Ioq {
    /// `ioq_create(depth, nthreads)`.
    pub fn create(config: IoqConfig) -> QueueResult<Self> {
        let depth = config.depth();
        let submission = Arc::new(Ring::new(depth));
        let completion = Arc::new(Ring::new(depth));
        let workers = WorkerPool::spawn(config.workers(), Arc::clone(&submission), Arc::clone(&completion))?;

        Ok(Self {
            pool: EntryPool::new(depth),
            submission,
            completion,
            workers: Some(workers),
            shut_down: AtomicBool::new(false),
            #[cfg(debug_assertions)]
            driver_busy: AtomicBool::new(false),
        })
    }

    /// `ioq_capacity(queue)`: the current free-slot count. Bounded by the
    /// configured `depth`; never negative, never above it.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.free_count()
    }

    fn submit(&self, op: IoqOp, cookie: usize) -> QueueResult<()> {
        let Some(slot) = self.pool.try_get() else {
            #[cfg(feature = "logging")]
            tracing::warn!(depth = self.pool.depth(), "ioq submission ring full, entry pool exhausted");
            return Err(QueueError::pool_exhausted(self.pool.depth()));
        };

        // SAFETY: `slot` was just taken from the free pool — no other
        // thread observes it until `try_push` below publishes it.
        let entry = unsafe { slot.as_mut() };
        entry.op = op;
        entry.ret = 0;
        entry.error = 0;
        entry.ptr = cookie;

        if let Err(back) = self.submission.try_push(slot) {
            // SAFETY: `back` was never published to any ring; we are
            // still its sole owner.
            unsafe { self.pool.release(back) };
            return Err(QueueError::Destroyed);
        }
        Ok(())
    }

    /// `ioq_close(queue, fd, cookie)`. `fd` becomes owned by the queue on
    /// successful submission and must not be used by the caller again.
    pub fn close(&self, fd: RawFd, cookie: usize) -> QueueResult<()> {
        self.submit(IoqOp::Close { fd }, cookie)
    }

    /// `ioq_opendir(queue, dir, dfd, path, cookie)`.
    pub fn opendir(&self, dir: NonNull<DirSlot>, dfd: RawFd, path: &Path, cookie: usize) -> QueueResult<()> {
        let path = path_to_cstring(path)?;
        self.submit(IoqOp::OpenDir { dfd, path, dir }, cookie)
    }

    /// `ioq_closedir(queue, dir, cookie)`. `dir` becomes owned by the
    /// queue on successful submission.
    pub fn closedir(&self, dir: NonNull<DirSlot>, cookie: usize) -> QueueResult<()> {
        self.submit(IoqOp::CloseDir { dir }, cookie)
    }

    /// `ioq_pop(queue) -> entry or null`: blocks until a completion is
    /// available or the queue has been destroyed.
    #[must_use]
    pub fn pop(&self) -> Option<NonNull<IoqEnt>> {
        self.enter_driver();
        let popped = self.completion.pop().map(EntryPtr::as_public);
        self.exit_driver();
        popped
    }

    /// `ioq_trypop(queue) -> entry or null`: never blocks.
    #[must_use]
    pub fn trypop(&self) -> Option<NonNull<IoqEnt>> {
        self.enter_driver();
        let popped = self.completion.try_pop().map(EntryPtr::as_public);
        self.exit_driver();
        popped
    }

    /// `ioq_free(queue, entry)`: returns a popped entry to the free pool.
    ///
    /// # Safety
    ///
    /// `entry` must be a pointer returned by [`Self::pop`]/[`Self::trypop`]
    /// on this queue and must not already have been freed.
    pub unsafe fn free(&self, entry: NonNull<IoqEnt>) {
        // SAFETY: `EntryPtr` and `NonNull<IoqEnt>` share representation;
        // the caller's obligations are restated in this fn's own doc.
        unsafe { self.pool.release(EntryPtr(entry)) };
    }

    /// `ioq_cancel(queue)`: idempotent. Transitions not-yet-dispatched
    /// submissions to cancelled completions without aborting in-flight
    /// syscalls. The queue remains usable afterward — new submissions
    /// still succeed.
    pub fn cancel(&self) {
        #[cfg(feature = "logging")]
        tracing::info!("ioq entering cancelled state");
        worker::cancel_pending(&self.submission, &self.completion);
    }

    /// `ioq_destroy(queue)`: terminal. Cancels, stops and joins every
    /// worker, drains and frees whatever remains on the completion ring,
    /// and returns the entry pool to fully free.
    pub fn destroy(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel();
        self.submission.close();
        if let Some(mut workers) = self.workers.take() {
            workers.stop_and_join();
        }
        self.completion.close();
        while let Some(entry) = self.completion.try_pop() {
            // SAFETY: just drained from the completion ring; referenced
            // nowhere else.
            unsafe { self.pool.release(entry) };
        }
        debug_assert_eq!(
            self.pool.free_count(),
            self.pool.depth(),
            "ioq destroyed with entries the driver popped but never freed"
        );
    }

    #[cfg(debug_assertions)]
    fn enter_driver(&self) {
        assert!(
            !self.driver_busy.swap(true, Ordering::AcqRel),
            "ioq: pop/trypop called concurrently from two threads; the driver role is single-threaded at a time"
        );
    }
    #[cfg(not(debug_assertions))]
    fn enter_driver(&self) {}

    #[cfg(debug_assertions)]
    fn exit_driver(&self) {
        self.driver_busy.store(false, Ordering::Release);
    }
    #[cfg(not(debug_assertions))]
    fn exit_driver(&self) {}
}

impl Drop for Ioq {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::os::fd::{AsRawFd, IntoRawFd};

    fn config(depth: usize, workers: usize) -> IoqConfig {
        IoqConfig::new(
            NonZeroUsize::new(depth).unwrap(),
            NonZeroUsize::new(workers).unwrap(),
        )
    }

    // S4: create(depth=4, nthreads=2); open a file; ioq_close with
    // cookie=0xAA; ioq_pop returns op=IOQ_CLOSE, ret=0, error=0, ptr=0xAA.
    #[test]
    fn s4_close_reports_success_with_cookie() {
        let ioq = Ioq::create(config(4, 2)).unwrap();
        let file = tempfile::tempfile().unwrap();
        let fd = file.into_raw_fd();

        ioq.close(fd, 0xAA).unwrap();
        let popped = ioq.pop().unwrap();
        // SAFETY: just popped; sole owner until `free` below.
        let entry = unsafe { popped.as_ref() };
        assert!(matches!(entry.op, IoqOp::Close { .. }));
        assert_eq!(entry.ret, 0);
        assert_eq!(entry.error, 0);
        assert_eq!(entry.ptr, 0xAA);

        // SAFETY: `popped` came from this queue's `pop` and is freed once.
        unsafe { ioq.free(popped) };
        ioq.destroy();
    }

    // S5: depth=2; submit two opendirs; capacity is 0; pop one, free one;
    // capacity is 1. `capacity` tracks the free pool, so this holds
    // regardless of whether the two entries have reached the completion
    // ring yet.
    #[test]
    fn s5_capacity_tracks_outstanding_entries() {
        let ioq = Ioq::create(config(2, 1)).unwrap();
        let dir = std::env::temp_dir();
        let slot_a = Box::new(DirSlot::empty());
        let slot_b = Box::new(DirSlot::empty());
        let fd = nix::fcntl::AT_FDCWD;

        ioq.opendir(NonNull::from(slot_a.as_ref()), fd, &dir, 1).unwrap();
        ioq.opendir(NonNull::from(slot_b.as_ref()), fd, &dir, 2).unwrap();
        assert_eq!(ioq.capacity(), 0);

        let popped = ioq.pop().unwrap();
        assert_eq!(ioq.capacity(), 0);

        // SAFETY: popped from this queue's completion ring, freed once.
        unsafe { ioq.free(popped) };
        assert_eq!(ioq.capacity(), 1);

        ioq.destroy();
    }

    #[test]
    fn opendir_then_closedir_round_trips_a_real_directory() {
        let ioq = Ioq::create(config(4, 1)).unwrap();
        let dir = std::env::temp_dir();
        let slot = Box::new(DirSlot::empty());
        let fd = nix::fcntl::AT_FDCWD;

        ioq.opendir(NonNull::from(slot.as_ref()), fd, &dir, 7).unwrap();
        let opened = ioq.pop().unwrap();
        // SAFETY: just popped.
        let opened_ref = unsafe { opened.as_ref() };
        assert!(opened_ref.is_ok());
        assert_eq!(opened_ref.ptr, 7);
        // SAFETY: freed exactly once.
        unsafe { ioq.free(opened) };

        ioq.closedir(NonNull::from(slot.as_ref()), 8).unwrap();
        let closed = ioq.pop().unwrap();
        // SAFETY: just popped.
        let closed_ref = unsafe { closed.as_ref() };
        assert!(closed_ref.is_ok());
        assert_eq!(closed_ref.ptr, 8);
        // SAFETY: freed exactly once.
        unsafe { ioq.free(closed) };

        ioq.destroy();
    }

    // Invariant 5: for M <= depth submissions followed by M pops then M
    // frees, the multiset of popped cookies equals the multiset submitted.
    #[test]
    fn invariant5_completions_preserve_cookie_multiset() {
        let ioq = Ioq::create(config(8, 4)).unwrap();
        let mut fds = Vec::new();
        for _ in 0..8 {
            fds.push(tempfile::tempfile().unwrap().into_raw_fd());
        }

        for (i, &fd) in fds.iter().enumerate() {
            ioq.close(fd, i).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..8 {
            let popped = ioq.pop().unwrap();
            // SAFETY: just popped.
            seen.push(unsafe { popped.as_ref() }.ptr);
            // SAFETY: freed exactly once per entry.
            unsafe { ioq.free(popped) };
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());

        ioq.destroy();
    }

    // Cancellation is idempotent and leaves the queue usable.
    #[test]
    fn cancel_is_idempotent_and_queue_stays_usable() {
        let ioq = Ioq::create(config(4, 1)).unwrap();
        ioq.cancel();
        ioq.cancel();

        let file = tempfile::tempfile().unwrap();
        ioq.close(file.as_raw_fd(), 99).unwrap();
        std::mem::forget(file); // ownership passed to the queue above
        let popped = ioq.pop().unwrap();
        // SAFETY: just popped.
        assert!(unsafe { popped.as_ref() }.is_ok());
        // SAFETY: freed exactly once.
        unsafe { ioq.free(popped) };

        ioq.destroy();
    }

    #[test]
    fn destroy_is_idempotent_via_drop() {
        let ioq = Ioq::create(config(2, 1)).unwrap();
        ioq.destroy();
        // The second shutdown (via Drop, already run above through
        // `destroy`) is exercised implicitly when `ioq` goes out of
        // scope; `shutdown`'s `shut_down` flag makes the repeat a no-op.
    }

    #[test]
    fn submission_fails_once_pool_exhausted() {
        let ioq = Ioq::create(config(1, 1)).unwrap();
        let a = tempfile::tempfile().unwrap().into_raw_fd();
        let b = tempfile::tempfile().unwrap().into_raw_fd();
        ioq.close(a, 0).unwrap();
        let err = ioq.close(b, 1);
        assert!(err.is_err());
        // SAFETY: `b` was never submitted, so the queue never took
        // ownership of it; closing it ourselves avoids leaking the fd.
        let _ = nix::unistd::close(b);

        let popped = ioq.pop().unwrap();
        // SAFETY: freed exactly once.
        unsafe { ioq.free(popped) };
        ioq.destroy();
    }
}
