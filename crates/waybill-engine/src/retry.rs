//! Bounded retry with backoff and jitter for outbound notifications.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// How a failed call is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied to each delay.
    pub jitter_factor: f64,

    /// Strategy for growing delays.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.25,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed,
    /// Delay doubles each attempt.
    Exponential,
    /// Delay grows by the base amount each attempt.
    Linear,
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry {
        /// Time to wait before the next attempt
        delay: Duration,
    },
    /// Stop retrying.
    GiveUp {
        /// Why no further attempt is made
        reason: String,
    },
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Decides what to do after attempt number `attempt` (1-based) failed
    /// with `error`.
    pub fn decide(&self, attempt: u32, error: &EngineError) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts),
            };
        }

        if !error.is_retryable() {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {error}") };
        }

        RetryDecision::Retry { delay: self.delay_for(attempt) }
    }

    /// Delay to wait after attempt number `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay * attempt,
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(20);
                self.base_delay * 2_u32.saturating_pow(exponent)
            },
        };

        let capped_delay = std::cmp::min(base_delay, self.max_delay);
        std::cmp::min(apply_jitter(capped_delay, self.jitter_factor), self.max_delay)
    }
}

/// Randomizes `duration` by up to ±`jitter_factor`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    if jitter_range <= 0.0 {
        return duration;
    }

    let jitter_offset = rand::rng().random_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((duration.as_secs_f64() + jitter_offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.0,
            backoff_strategy: strategy,
        }
    }

    #[test]
    fn exponential_backoff_doubles_until_capped() {
        let policy = no_jitter(BackoffStrategy::Exponential);
        let delays: Vec<_> = (1..=5).map(|attempt| policy.delay_for(attempt)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_secs(1),
            ]
        );
    }

    #[test]
    fn linear_and_fixed_strategies() {
        let linear = no_jitter(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for(3), Duration::from_millis(300));

        let fixed = no_jitter(BackoffStrategy::Fixed);
        assert_eq!(fixed.delay_for(4), Duration::from_millis(100));
    }

    #[test]
    fn gives_up_at_max_attempts() {
        let policy = RetryPolicy { max_attempts: 3, ..RetryPolicy::default() };

        assert!(matches!(
            policy.decide(2, &EngineError::timeout(10)),
            RetryDecision::Retry { .. }
        ));
        match policy.decide(3, &EngineError::timeout(10)) {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("maximum attempts")),
            RetryDecision::Retry { .. } => unreachable!("retried past max attempts"),
        }
    }

    #[test]
    fn non_retryable_errors_give_up_immediately() {
        let decision =
            RetryPolicy::default().decide(1, &EngineError::unexpected_status(400, "bad"));
        assert!(matches!(decision, RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..20 {
            let jittered = apply_jitter(base, 0.5);
            assert!(jittered >= Duration::from_secs(5));
            assert!(jittered <= Duration::from_secs(15));
        }
    }
}
