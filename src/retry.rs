//! Retry decisions for adapter failures.
//!
//! `decide` is a pure function of the attempt count and failure class so the
//! same policy object can be shared by every destination task.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::FailureClass;

/// Outcome of consulting a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Exponential backoff with a cap and a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Decide what to do after `attempts` attempts have been made.
    ///
    /// Permanent failures always give up. Transient failures retry after
    /// `min(base * 2^attempts, max_delay)` until `attempts` reaches
    /// `max_attempts`.
    pub fn decide(&self, attempts: u32, class: FailureClass) -> RetryDecision {
        match class {
            FailureClass::Permanent => RetryDecision::GiveUp,
            FailureClass::Transient if attempts >= self.max_attempts => RetryDecision::GiveUp,
            FailureClass::Transient => RetryDecision::Retry(self.delay_for(attempts)),
        }
    }

    /// Backoff delay for a given attempt count, capped at `max_delay`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}
