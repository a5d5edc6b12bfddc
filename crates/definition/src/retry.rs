//! Retry policy and its pure evaluator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on any computed retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Exponential backoff retry policy for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Multiplier applied per subsequent attempt.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Creates a retry policy.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Decides what to do after a failed attempt.
    ///
    /// `attempt_number` is 1-based: passing 1 means the first attempt
    /// failed. The computed delay is `base_delay *
    /// backoff_multiplier^(attempt_number - 1)`, capped at
    /// [`MAX_RETRY_DELAY`]. Pure function; the engine owns scheduling.
    pub fn next_action(&self, attempt_number: u32) -> RetryDecision {
        if attempt_number >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let factor = self
            .backoff_multiplier
            .powi(attempt_number.saturating_sub(1) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        let delay = if secs.is_finite() && secs >= 0.0 {
            Duration::from_secs_f64(secs.min(MAX_RETRY_DELAY.as_secs_f64()))
        } else {
            MAX_RETRY_DELAY
        };

        RetryDecision::Retry(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0)
    }
}

/// Outcome of consulting a retry policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-invoke the step after the given delay.
    Retry(Duration),
    /// Retries are exhausted; escalate to compensation.
    GiveUp,
}
