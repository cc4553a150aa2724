//! Per-view re-entrancy guard
//!
//! An overlay update can span several timer turns (a surface waiting for
//! layout). Requests that arrive meanwhile collapse into one trailing pass.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateState {
    #[default]
    Idle,
    Updating,
    UpdatePending,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Updating => "updating",
            Self::UpdatePending => "update_pending",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardEvent {
    /// A pass wants to mutate the view's overlay
    Request,
    /// An update that could not complete synchronously has started
    Suspend,
    /// The in-flight update finished (successfully or not)
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    /// Mutate the overlay now
    Proceed,
    /// Leave the overlay alone; the request is remembered
    Defer,
    /// Nothing further to do
    Settled,
    /// Run exactly one follow-up pass
    RunTrailing,
}

/// Pure transition function of the guard.
pub fn transition(state: UpdateState, event: GuardEvent) -> (UpdateState, GuardAction) {
    use GuardAction::*;
    use UpdateState::*;

    match (state, event) {
        (Idle, GuardEvent::Request) => (Idle, Proceed),
        (Updating | UpdatePending, GuardEvent::Request) => (UpdatePending, Defer),
        (Idle, GuardEvent::Suspend) => (Updating, Settled),
        (s @ (Updating | UpdatePending), GuardEvent::Suspend) => (s, Settled),
        (Idle | Updating, GuardEvent::Finish) => (Idle, Settled),
        (UpdatePending, GuardEvent::Finish) => (Idle, RunTrailing),
    }
}
