//! Bounded retry helper
//!
//! Used wherever a resource's readiness cannot be observed synchronously,
//! such as a freshly created render surface that has not been laid out yet.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    /// Delay doubles after each attempt, clamped to `max_delay_ms`
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff: Backoff,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 16,
            backoff: Backoff::Fixed,
            max_delay_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// policy is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let ms = match self.backoff {
            Backoff::Fixed => self.initial_delay_ms,
            Backoff::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                self.initial_delay_ms.saturating_mul(factor)
            }
        };
        Some(Duration::from_millis(ms.min(self.max_delay_ms.max(self.initial_delay_ms))))
    }
}

/// What to do after a failed readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    Wait(Duration),
    GiveUp { attempts: u32 },
}

/// Attempt counter for one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
}

impl RetryState {
    /// Record a failed check and decide the next step.
    pub fn next(&mut self, policy: &RetryPolicy) -> RetryStep {
        self.attempts += 1;
        match policy.delay_for(self.attempts) {
            Some(delay) => RetryStep::Wait(delay),
            None => RetryStep::GiveUp {
                attempts: self.attempts - 1,
            },
        }
    }
}
