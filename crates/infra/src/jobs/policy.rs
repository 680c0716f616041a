//! Retry / dead-letter policy.
//!
//! Pure decision logic: given the attempt number of a delivery and how it
//! failed, decide between a delayed retry and the dead-letter sink. Nothing
//! here reads the clock, so the state machine is testable without waiting.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::types::ProcessError;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    #[default]
    Exponential,
    /// Linear backoff: base * (attempt + 1)
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of processing invocations per job (the attempt ceiling).
    pub max_attempts: u32,
    /// Delay after the first failure (attempt 0)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0): up to this fraction is subtracted from each delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

/// What to do with a delivery that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nack; the queue redelivers no sooner than `delay`.
    Retry { delay: Duration },
    /// Route to the dead-letter sink and stop.
    DeadLetter(DeadLetterReason),
}

/// Why a job ended up in the dead-letter sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The processor classified the failure as non-retryable.
    Permanent { error: String },
    /// The attempt ceiling was reached, whatever the last error was.
    PoisonPill {
        attempts: u32,
        last_error: Option<String>,
    },
}

impl core::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeadLetterReason::Permanent { error } => write!(f, "permanent failure: {error}"),
            DeadLetterReason::PoisonPill {
                attempts,
                last_error: Some(error),
            } => write!(f, "poison pill after {attempts} attempts: {error}"),
            DeadLetterReason::PoisonPill {
                attempts,
                last_error: None,
            } => write!(f, "poison pill after {attempts} attempts"),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries: the first failure dead-letters.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff and no jitter.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deterministic backoff for a failure on `attempt` (0-indexed), capped at
    /// `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_nanos();
        let max = self.max_delay.as_nanos();

        let raw = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => base.saturating_mul(2u128.saturating_pow(attempt)),
            BackoffStrategy::Linear => base.saturating_mul(u128::from(attempt) + 1),
        };

        if raw >= max {
            return self.max_delay;
        }
        // raw < max <= Duration::MAX nanos, and both are below u64::MAX in practice.
        u64::try_from(raw)
            .map(Duration::from_nanos)
            .unwrap_or(self.max_delay)
    }

    /// Backoff with jitter applied. Never exceeds `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let spread = delay.mul_f64(self.jitter.min(1.0));
        let cut = rand::rng().random_range(Duration::ZERO..=spread);
        delay.saturating_sub(cut)
    }

    /// True once a delivery with this attempt number must not be processed.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Decide what happens after a failed invocation on `attempt`.
    ///
    /// Attempts are 0-indexed, so an always-transient job gets exactly
    /// `max_attempts` invocations before it is dead-lettered.
    pub fn decide(&self, attempt: u32, error: &ProcessError) -> Decision {
        if !error.is_retryable() {
            return Decision::DeadLetter(DeadLetterReason::Permanent {
                error: error.message().to_string(),
            });
        }

        if self.is_exhausted(attempt.saturating_add(1)) {
            return Decision::DeadLetter(DeadLetterReason::PoisonPill {
                attempts: attempt.saturating_add(1),
                last_error: Some(error.message().to_string()),
            });
        }

        Decision::Retry {
            delay: self.delay_for_attempt(attempt),
        }
    }
}
