//! Connection health tracking and grace-period policy
//!
//! A lost connection is tolerated for a bounded grace period: the first
//! recoverable failure marks the connection degraded with a sticky
//! timestamp, later failures compare against that same timestamp, and a
//! success at any point restores full health. Once the grace period is
//! exhausted the state is fatal and stays fatal.

use std::time::{Duration, Instant};

/// Connection health state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Operating normally
    Healthy,
    /// Recoverable failures observed; `since` is the first failure time
    Degraded { since: Instant },
    /// Grace period exhausted
    Fatal,
}

/// Decision for one observed failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Keep retrying under the grace period
    Retry,
    /// Escalate to a supervisory fault
    Escalate,
}

/// Grace-period failure tracker.
///
/// Time is passed in explicitly so the policy is testable without waiting
/// out real grace periods.
#[derive(Debug)]
pub struct FailureTracker {
    grace_period: Duration,
    health: Health,
}

impl FailureTracker {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            health: Health::Healthy,
        }
    }

    pub fn health(&self) -> Health {
        self.health
    }

    /// How long the connection has been degraded, if it is
    pub fn degraded_for(&self, now: Instant) -> Option<Duration> {
        match self.health {
            Health::Degraded { since } => Some(now.saturating_duration_since(since)),
            _ => None,
        }
    }

    /// Record a recoverable failure observed at `now`
    pub fn observe_failure(&mut self, now: Instant) -> FailureAction {
        match self.health {
            Health::Healthy => {
                self.health = Health::Degraded { since: now };
                FailureAction::Retry
            }
            Health::Degraded { since } => {
                if now.saturating_duration_since(since) >= self.grace_period {
                    self.health = Health::Fatal;
                    FailureAction::Escalate
                } else {
                    FailureAction::Retry
                }
            }
            Health::Fatal => FailureAction::Escalate,
        }
    }

    /// Record a successful operation, restoring health unless already fatal
    pub fn observe_success(&mut self) {
        if self.health != Health::Fatal {
            self.health = Health::Healthy;
        }
    }
}
