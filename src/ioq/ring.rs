//! Bounded rings carrying entry pointers between the driver and the
//! worker pool: the submission ring is single-producer (the driver
//! thread)/multi-consumer (the workers); the completion ring is
//! multi-producer (the workers)/single-consumer (the driver). Both share
//! one implementation — the direction only changes which side calls
//! `push` versus `pop`.
//!
//! The non-blocking core is a lock-free [`ArrayQueue`]; `push`/`pop`
//! layer blocking semantics on top with a `parking_lot` condvar, per the
//! source contract's "a mutex+condvar implementation is acceptable so
//! long as the API guarantees hold."

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

use super::entry::EntryPtr;

/// Upper bound on how long a blocking `push`/`pop` can wait before
/// rechecking the lock-free queue directly. The queue is always the
/// source of truth; this just bounds the latency of a wakeup that races
/// the `Mutex` rendezvous below, since pushes/pops against `ArrayQueue`
/// happen without holding `gate`.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A bounded ring of entry pointers with blocking and non-blocking
/// push/pop.
pub(crate) struct Ring {
    queue: ArrayQueue<EntryPtr>,
    gate: Mutex<()>,
    not_empty: Condvar,
    not_full: Condvar,
    closed: AtomicBool,
}

impl Ring {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            gate: Mutex::new(()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wakes every blocked `push`/`pop` so they observe [`Self::is_closed`]
    /// and return; already-queued items are left in place for a final
    /// drain. Idempotent.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.gate.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// `try_push`: non-blocking; fails (handing the item back) when full.
    pub(crate) fn try_push(&self, item: EntryPtr) -> Result<(), EntryPtr> {
        let result = self.queue.push(item);
        if result.is_ok() {
            let _guard = self.gate.lock();
            self.not_empty.notify_one();
        }
        result
    }

    /// `push`: blocks until the item is accepted or the ring is closed, in
    /// which case the item is handed back to the caller.
    pub(crate) fn push(&self, mut item: EntryPtr) -> Result<(), EntryPtr> {
        loop {
            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(back) => {
                    item = back;
                    if self.is_closed() {
                        return Err(item);
                    }
                    let mut guard = self.gate.lock();
                    if !self.queue.is_full() || self.is_closed() {
                        continue;
                    }
                    self.not_full.wait_for(&mut guard, POLL_INTERVAL);
                }
            }
        }
    }

    /// `try_pop`: non-blocking; returns `None` when empty.
    pub(crate) fn try_pop(&self) -> Option<EntryPtr> {
        let item = self.queue.pop();
        if item.is_some() {
            let _guard = self.gate.lock();
            self.not_full.notify_one();
        }
        item
    }

    /// `pop`: blocks until an item is available or the ring is closed and
    /// drained.
    pub(crate) fn pop(&self) -> Option<EntryPtr> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            let mut guard = self.gate.lock();
            if !self.queue.is_empty() || self.is_closed() {
                continue;
            }
            self.not_empty.wait_for(&mut guard, POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioq::entry::{IoqEnt, IoqOp};
    use std::ptr::NonNull;
    use std::sync::Arc;

    fn dummy_entry() -> EntryPtr {
        let boxed = Box::new(IoqEnt {
            op: IoqOp::Close { fd: -1 },
            ret: 0,
            error: 0,
            ptr: 0,
        });
        EntryPtr(NonNull::from(Box::leak(boxed)))
    }

    #[test]
    fn try_push_fails_when_full() {
        let ring = Ring::new(1);
        assert!(ring.try_push(dummy_entry()).is_ok());
        assert!(ring.try_push(dummy_entry()).is_err());
    }

    #[test]
    fn try_pop_empty_returns_none() {
        let ring = Ring::new(4);
        assert!(ring.try_pop().is_none());
    }

    #[test]
    fn push_then_pop_preserves_fifo_order() {
        let ring = Ring::new(4);
        let entries: Vec<_> = (0..3)
            .map(|i| {
                let e = dummy_entry();
                // SAFETY: just allocated above, sole owner.
                unsafe { e.as_mut() }.ptr = i;
                e
            })
            .collect();
        for e in &entries {
            ring.push(*e).unwrap();
        }
        for i in 0..3 {
            let popped = ring.pop().unwrap();
            // SAFETY: sole owner after `pop` returns it.
            assert_eq!(unsafe { popped.as_mut() }.ptr, i);
        }
    }

    #[test]
    fn blocking_pop_wakes_on_push_from_another_thread() {
        let ring = Arc::new(Ring::new(4));
        let r2 = Arc::clone(&ring);
        let handle = std::thread::spawn(move || r2.pop());

        std::thread::sleep(Duration::from_millis(20));
        ring.push(dummy_entry()).unwrap();

        let popped = handle.join().unwrap();
        assert!(popped.is_some());
    }

    #[test]
    fn close_wakes_blocked_pop_with_none() {
        let ring = Arc::new(Ring::new(4));
        let r2 = Arc::clone(&ring);
        let handle = std::thread::spawn(move || r2.pop());

        std::thread::sleep(Duration::from_millis(20));
        ring.close();

        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn blocking_push_wakes_on_pop_from_another_thread() {
        let ring = Arc::new(Ring::new(1));
        ring.try_push(dummy_entry()).unwrap();

        let r2 = Arc::clone(&ring);
        let handle = std::thread::spawn(move || r2.push(dummy_entry()));

        std::thread::sleep(Duration::from_millis(20));
        assert!(ring.pop().is_some());

        handle.join().unwrap().unwrap();
    }
}
