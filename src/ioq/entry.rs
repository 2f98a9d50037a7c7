//! `IoqEnt`: the pooled, tagged-union work item exchanged between the
//! driver and the worker pool, plus the free-list pool that hands them
//! out (`depth` entries, allocated once at `ioq_create`, never returned to
//! the allocator until the queue is destroyed).

use std::ffi::CString;
use std::os::fd::RawFd;
use std::ptr::NonNull;

use parking_lot::Mutex;

/// Pre-allocated storage for a directory stream, filled in by an
/// `IOQ_OPENDIR` dispatch and consumed by the driver once the matching
/// completion has been observed.
///
/// Mirrors the source contract's "opens the directory ... into the
/// pre-allocated `bfs_dir`": the caller owns this storage (typically part
/// of a directory record carved from a [`crate::varena::VArena`]) and
/// passes a pointer to it at submission time. The worker that dispatches
/// the matching entry is its sole writer; the driver is its sole reader,
/// and only after popping that entry's completion — the completion ring
/// is what establishes the happens-before edge between the two.
pub struct DirSlot(std::cell::UnsafeCell<Option<nix::dir::Dir>>);

impl DirSlot {
    /// An empty slot, ready to be passed to [`crate::ioq::Ioq::opendir`].
    #[must_use]
    pub fn empty() -> Self {
        Self(std::cell::UnsafeCell::new(None))
    }

    /// Takes the directory handle out of the slot, if one was opened.
    ///
    /// # Safety
    ///
    /// Must only be called after observing the completion of the
    /// `IOQ_OPENDIR` (or a later `IOQ_CLOSEDIR`) entry that targeted this
    /// slot; calling it concurrently with a worker still writing the slot
    /// is undefined behavior.
    #[must_use]
    pub unsafe fn take(&self) -> Option<nix::dir::Dir> {
        // SAFETY: caller guarantees no concurrent writer per this fn's doc.
        unsafe { (*self.0.get()).take() }
    }

    pub(crate) fn set(&self, dir: nix::dir::Dir) {
        // SAFETY: this worker is the slot's only writer for the duration
        // of one dispatch; the driver cannot observe the slot until the
        // matching completion is published after this call returns.
        unsafe { *self.0.get() = Some(dir) };
    }
}

// SAFETY: all access to the inner `Option<Dir>` is sequenced by the
// queue's submission/completion handoff (see `set`/`take` docs above), so
// the slot is never touched by two threads at once despite the `UnsafeCell`.
unsafe impl Send for DirSlot {}
unsafe impl Sync for DirSlot {}

/// The operation encoded by an [`IoqEnt`].
///
/// A plain enum stands in for the source contract's tag-and-union struct:
/// the discriminant *is* the tag, so there is nothing to keep in sync by
/// hand.
pub enum IoqOp {
    /// `IOQ_CLOSE`: close a bare file descriptor.
    Close { fd: RawFd },
    /// `IOQ_OPENDIR`: open the directory at `(dfd, path)` into `dir`.
    OpenDir {
        dfd: RawFd,
        path: CString,
        dir: NonNull<DirSlot>,
    },
    /// `IOQ_CLOSEDIR`: close a directory handle previously opened into `dir`.
    CloseDir { dir: NonNull<DirSlot> },
}

// SAFETY: the `NonNull<DirSlot>` fields point at caller-owned storage the
// caller guarantees outlives the entry (same contract as a `varena_free`
// pointer outliving its last use); `DirSlot` is itself `Send`/`Sync`.
unsafe impl Send for IoqOp {}

/// One pooled request/response slot.
///
/// Lifecycle: `FREE -> SUBMITTED -> INFLIGHT -> COMPLETED -> FREE` (see the
/// `ioq` module docs). `op` is populated at submission; `ret`/`error` are
/// written once, by the worker that dispatches this entry; `ptr` is the
/// caller's cookie and is never inspected by the queue itself.
pub struct IoqEnt {
    pub op: IoqOp,
    pub ret: i32,
    pub error: i32,
    /// Opaque value supplied at submission, returned unchanged at
    /// completion. Named `ptr` for parity with the source contract; it is
    /// plain data here, not a pointer the queue dereferences.
    pub ptr: usize,
}

impl IoqEnt {
    fn empty() -> Self {
        Self {
            op: IoqOp::Close { fd: -1 },
            ret: 0,
            error: 0,
            ptr: 0,
        }
    }

    /// Whether the operation succeeded (`ret == 0`).
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.ret == 0
    }

    /// The per-operation failure as a [`std::io::Error`], or `None` if it
    /// succeeded. `error` is a raw errno (or [`nix::errno::Errno::ECANCELED`]
    /// for a cancelled submission), which is exactly what
    /// [`std::io::Error::from_raw_os_error`] expects.
    #[must_use]
    pub fn io_error(&self) -> Option<std::io::Error> {
        if self.ret == 0 {
            None
        } else {
            Some(std::io::Error::from_raw_os_error(self.error))
        }
    }
}

/// A raw pointer to a pooled [`IoqEnt`], threaded through the submission
/// and completion rings.
///
/// Exclusive access to the pointee is guaranteed by the state machine
/// above, not by the type system: at any instant exactly one owner (the
/// free pool, the driver, a ring, or a dispatching worker) holds a given
/// pointer. Every dereference site carries its own SAFETY justification
/// tied to that protocol.
#[derive(Clone, Copy)]
pub(crate) struct EntryPtr(pub(crate) NonNull<IoqEnt>);

// SAFETY: see `EntryPtr`'s doc comment — the queue's handoff protocol
// ensures at most one thread dereferences a given pointer at a time, so
// moving the pointer itself across threads is sound.
unsafe impl Send for EntryPtr {}

impl EntryPtr {
    /// # Safety
    ///
    /// The caller must currently hold exclusive logical ownership of this
    /// entry per the state machine documented on [`EntryPtr`].
    pub(crate) unsafe fn as_mut(&self) -> &mut IoqEnt {
        // SAFETY: forwarded to the caller via this fn's own safety doc.
        unsafe { &mut *self.0.as_ptr() }
    }

    pub(crate) fn as_public(self) -> NonNull<IoqEnt> {
        self.0
    }
}

/// The `depth`-sized block of entries allocated at `ioq_create`, plus the
/// free stack they start threaded onto.
///
/// No entry lives outside three owners: this pool's free stack, a ring, or
/// a dispatching worker's local variable (see `ioq` module docs).
pub(crate) struct EntryPool {
    // Backing storage, kept alive for the pool's lifetime so every
    // `EntryPtr` handed out above stays valid; never resized after
    // construction.
    storage: Vec<Box<IoqEnt>>,
    free: Mutex<Vec<EntryPtr>>,
}

impl EntryPool {
    pub(crate) fn new(depth: usize) -> Self {
        let storage: Vec<Box<IoqEnt>> = (0..depth).map(|_| Box::new(IoqEnt::empty())).collect();
        let free = storage
            .iter()
            .map(|entry| EntryPtr(NonNull::from(entry.as_ref())))
            .collect();
        Self {
            storage,
            free: Mutex::new(free),
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.storage.len()
    }

    pub(crate) fn try_get(&self) -> Option<EntryPtr> {
        self.free.lock().pop()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    /// # Safety
    ///
    /// `ptr` must have been produced by this pool (via [`Self::try_get`])
    /// and must not already be on the free stack.
    pub(crate) unsafe fn release(&self, ptr: EntryPtr) {
        self.free.lock().push(ptr);
    }
}
