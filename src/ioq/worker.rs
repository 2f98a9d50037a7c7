//! The worker pool and dispatcher: `nthreads` background threads, each
//! running `e = submission.pop(); if stop return; dispatch(e);
//! completion.push(e);`, plus `ioq_cancel`'s drain of not-yet-dispatched
//! submissions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use nix::dir::Dir;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

use super::entry::{EntryPtr, IoqEnt, IoqOp};
use super::ring::Ring;
use crate::error::QueueError;

/// `nthreads` background dispatch threads sharing one `stop` flag.
pub(crate) struct WorkerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers draining `submission` into `completion`. On
    /// a spawn failure, already-spawned workers are stopped and joined
    /// before returning the error — `ioq_create` either fully succeeds or
    /// leaves nothing running.
    pub(crate) fn spawn(
        count: usize,
        submission: Arc<Ring>,
        completion: Arc<Ring>,
    ) -> Result<Self, QueueError> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(count);

        for id in 0..count {
            let submission = Arc::clone(&submission);
            let completion = Arc::clone(&completion);
            let stop = Arc::clone(&stop);

            let spawned = std::thread::Builder::new()
                .name(format!("ioq-worker-{id}"))
                .spawn(move || run(id, &submission, &completion, &stop));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    stop.store(true, Ordering::Release);
                    submission.close();
                    for handle in handles.drain(..) {
                        let _ = handle.join();
                    }
                    return Err(QueueError::WorkerSpawnFailed { index: id, source });
                }
            }
        }

        #[cfg(feature = "logging")]
        tracing::info!(workers = count, "ioq worker pool started");

        Ok(Self { stop, handles })
    }

    /// Signals every worker to stop after its current `submission.pop()`
    /// and joins them. Idempotent: a second call joins an already-empty
    /// handle list.
    pub(crate) fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }

        #[cfg(feature = "logging")]
        tracing::info!("ioq worker pool stopped");
    }
}

fn run(id: usize, submission: &Ring, completion: &Ring, stop: &AtomicBool) {
    #[cfg(feature = "logging")]
    let _span = tracing::info_span!("ioq_worker", id).entered();

    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }

        let Some(entry) = submission.pop() else {
            // Ring closed (queue being destroyed) and drained: no more
            // work will ever arrive.
            return;
        };

        // SAFETY: this worker is the sole owner of `entry` between the
        // `pop` above and the `completion.push` below (INFLIGHT state);
        // no other thread touches it in that window.
        dispatch(unsafe { entry.as_mut() });
        publish(completion, entry);
    }
}

/// Performs the syscall encoded by `entry.op`, recording `ret`/`error`.
fn dispatch(entry: &mut IoqEnt) {
    match &entry.op {
        IoqOp::Close { fd } => match nix::unistd::close(*fd) {
            Ok(()) => {
                entry.ret = 0;
                entry.error = 0;
            }
            Err(errno) => {
                entry.ret = -1;
                entry.error = errno as i32;
            }
        },
        IoqOp::OpenDir { dfd, path, dir } => {
            match Dir::openat(*dfd, path.as_c_str(), OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty()) {
                Ok(opened) => {
                    // SAFETY: `dir` points at caller-owned storage that
                    // outlives this entry until the driver observes the
                    // matching completion; this worker is its only writer.
                    unsafe { dir.as_ref() }.set(opened);
                    entry.ret = 0;
                    entry.error = 0;
                }
                Err(errno) => {
                    entry.ret = -1;
                    entry.error = errno as i32;
                }
            }
        }
        IoqOp::CloseDir { dir } => {
            // SAFETY: the driver only submits `IOQ_CLOSEDIR` for a slot
            // whose matching `IOQ_OPENDIR` completion it has already
            // observed, so `take` runs after that write is visible.
            let handle = unsafe { dir.as_ref().take() };
            match handle {
                Some(opened) => {
                    drop(opened);
                    entry.ret = 0;
                    entry.error = 0;
                }
                None => {
                    entry.ret = -1;
                    entry.error = nix::errno::Errno::EBADF as i32;
                }
            }
        }
    }
}

/// Publishes a dispatched (or cancelled) entry to `completion`. The
/// completion ring is sized to `depth`, the same bound as the entry pool,
/// so a non-blocking push only fails under pathological contention; the
/// blocking `push` is the fallback rather than the common case.
fn publish(completion: &Ring, entry: EntryPtr) {
    if let Err(entry) = completion.try_push(entry) {
        let _ = completion.push(entry);
    }
}

/// `ioq_cancel`: drains not-yet-dispatched submissions into `completion`
/// marked as cancelled, without touching in-flight work. Idempotent —
/// calling it again after the submission ring is already empty is a no-op.
pub(crate) fn cancel_pending(submission: &Ring, completion: &Ring) {
    while let Some(entry) = submission.try_pop() {
        // SAFETY: just removed from the submission ring; no worker holds
        // it concurrently (workers only ever pop it once, and this is
        // that pop).
        let e = unsafe { entry.as_mut() };
        e.ret = -1;
        e.error = nix::errno::Errno::ECANCELED as i32;
        publish(completion, entry);
    }
}
