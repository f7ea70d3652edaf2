//! # Give-up policy for crashing workers.
//!
//! [`FailurePolicy`] bounds how many *rapid consecutive* abnormal terminations an
//! instance may accumulate before the supervisor stops retrying the declaration.
//!
//! - A normal script completion resets the count.
//! - A failure more than [`FailurePolicy::window`] after the previous one starts
//!   a new streak at 1.
//! - Reaching [`FailurePolicy::max_consecutive`] is fatal for the declaration.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::ConfigError;

/// Threshold of rapid consecutive failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Failures in one streak that make the declaration fatal (`>= 1`).
    pub max_consecutive: u32,
    /// Maximum gap between two failures of the same streak.
    pub window: Duration,
}

impl Default for FailurePolicy {
    /// `max_consecutive = 6`, `window = 60s`.
    fn default() -> Self {
        Self {
            max_consecutive: 6,
            window: Duration::from_secs(60),
        }
    }
}

impl FailurePolicy {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_consecutive == 0 {
            return Err(ConfigError::invalid(
                "worker failure threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Per-instance streak counter.
#[derive(Debug)]
pub(crate) struct FailureTracker {
    policy: FailurePolicy,
    streak: u32,
    last: Option<Instant>,
}

impl FailureTracker {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            streak: 0,
            last: None,
        }
    }

    /// Records a failure at `now`; returns the current streak length.
    pub fn record(&mut self, now: Instant) -> u32 {
        let rapid = self
            .last
            .is_some_and(|last| now.saturating_duration_since(last) <= self.policy.window);
        self.streak = if rapid { self.streak.saturating_add(1) } else { 1 };
        self.last = Some(now);
        self.streak
    }

    /// Clears the streak after a normal completion.
    pub fn reset(&mut self) {
        self.streak = 0;
        self.last = None;
    }

    pub fn exhausted(&self) -> bool {
        self.streak >= self.policy.max_consecutive
    }
}
