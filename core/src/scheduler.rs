//! Debounced pass scheduling
//!
//! Bursts of registration churn collapse into one arbitration pass. A dirty
//! signal arms a single timer; further signals while it is pending are
//! absorbed and never push the deadline out.

use std::time::Duration;

use crate::timer::{TimerHandle, TimerPort};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct PassScheduler {
    window: Duration,
    pending: Option<TimerHandle>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl PassScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Arm the debounce timer unless one is already pending.
    /// Returns `true` when a new timer was armed.
    pub fn mark_dirty(&mut self, timer: &mut dyn TimerPort) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(timer.schedule(self.window));
        true
    }

    /// Whether `handle` is the pending pass timer. Consumes it if so.
    pub fn take_due(&mut self, handle: TimerHandle) -> bool {
        if self.pending == Some(handle) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Drop any pending timer. The caller runs the pass itself.
    pub fn cancel(&mut self, timer: &mut dyn TimerPort) {
        if let Some(handle) = self.pending.take() {
            timer.cancel(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::VirtualTimer;

    #[test]
    fn test_burst_arms_one_timer_without_extending_it() {
        let mut timer = VirtualTimer::new();
        let mut scheduler = PassScheduler::new(Duration::from_millis(100));

        assert!(scheduler.mark_dirty(&mut timer));
        timer.advance(60);
        assert!(!scheduler.mark_dirty(&mut timer));
        assert!(!scheduler.mark_dirty(&mut timer));
        assert_eq!(timer.pending(), 1);

        let fired = timer.advance(40);
        assert_eq!(fired.len(), 1);
        assert!(scheduler.take_due(fired[0]));
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn test_cancel_drops_pending_timer() {
        let mut timer = VirtualTimer::new();
        let mut scheduler = PassScheduler::default();

        scheduler.mark_dirty(&mut timer);
        scheduler.cancel(&mut timer);
        assert!(!scheduler.is_pending());
        assert!(timer.advance(1_000).is_empty());
    }

    #[test]
    fn test_foreign_handle_is_not_ours() {
        let mut timer = VirtualTimer::new();
        let mut scheduler = PassScheduler::default();
        let foreign = timer.schedule(Duration::from_millis(1));
        scheduler.mark_dirty(&mut timer);

        assert!(!scheduler.take_due(foreign));
        assert!(scheduler.is_pending());
    }
}
