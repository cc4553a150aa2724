//! Timer port
//!
//! The coordinator schedules continuations (debounced passes, surface attach
//! retries) through [`TimerPort`]. When a handle elapses, whoever drives the
//! timer calls `Coordinator::on_timer(handle)`. Cancelled or unknown handles
//! are ignored by the coordinator, so a late delivery is harmless.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::time::Duration;

/// Handle to a scheduled continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// Anything able to deliver a handle back after a delay: an event loop,
/// a timer wheel, an actor mailbox.
pub trait TimerPort {
    fn schedule(&mut self, delay: Duration) -> TimerHandle;
    fn cancel(&mut self, handle: TimerHandle);
}

#[derive(Debug, Default)]
struct TimerQueue {
    now_ms: u64,
    next_id: u64,
    /// (deadline, id) in firing order
    queue: BTreeSet<(u64, u64)>,
    deadlines: HashMap<u64, u64>,
}

impl TimerQueue {
    fn pop_due(&mut self, up_to: u64) -> Option<TimerHandle> {
        let &(deadline, id) = self.queue.first()?;
        if deadline > up_to {
            return None;
        }
        self.queue.remove(&(deadline, id));
        self.deadlines.remove(&id);
        Some(TimerHandle(id))
    }
}

/// Timer running on virtual milliseconds.
///
/// Cloning shares the same queue, so one clone can be handed to the
/// coordinator while the driver keeps another to advance time.
#[derive(Debug, Clone, Default)]
pub struct VirtualTimer {
    inner: Rc<RefCell<TimerQueue>>,
}

impl VirtualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.borrow().now_ms
    }

    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.inner.borrow().queue.first().map(|&(deadline, _)| deadline)
    }

    /// Move the clock forward by `ms` and return every handle that came due.
    pub fn advance(&self, ms: u64) -> Vec<TimerHandle> {
        let target = self.now_ms().saturating_add(ms);
        self.advance_to(target)
    }

    /// Move the clock to `target_ms` (never backwards) and return every
    /// handle that came due, in deadline order.
    pub fn advance_to(&self, target_ms: u64) -> Vec<TimerHandle> {
        let mut inner = self.inner.borrow_mut();
        inner.now_ms = inner.now_ms.max(target_ms);
        let now = inner.now_ms;
        let mut fired = Vec::new();
        while let Some(handle) = inner.pop_due(now) {
            fired.push(handle);
        }
        fired
    }

    /// Advance to `target_ms`, delivering each due handle to `on_fire` at its
    /// own deadline. Handles scheduled from inside `on_fire` that fall before
    /// `target_ms` are delivered too.
    pub fn run_until(&self, target_ms: u64, mut on_fire: impl FnMut(TimerHandle)) {
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                match inner.queue.first().copied() {
                    Some((deadline, _)) if deadline <= target_ms => {
                        inner.now_ms = inner.now_ms.max(deadline);
                        let now = inner.now_ms;
                        inner.pop_due(now)
                    }
                    _ => None,
                }
            };
            match next {
                Some(handle) => on_fire(handle),
                None => break,
            }
        }
        let mut inner = self.inner.borrow_mut();
        inner.now_ms = inner.now_ms.max(target_ms);
    }
}

impl TimerPort for VirtualTimer {
    fn schedule(&mut self, delay: Duration) -> TimerHandle {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let deadline = inner.now_ms.saturating_add(delay_ms);
        inner.queue.insert((deadline, id));
        inner.deadlines.insert(id, deadline);
        TimerHandle(id)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        let mut inner = self.inner.borrow_mut();
        if let Some(deadline) = inner.deadlines.remove(&handle.0) {
            inner.queue.remove(&(deadline, handle.0));
        }
    }
}
