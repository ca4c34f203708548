//! Exponential backoff with jitter for fetch retries.

use crate::error::ConfigError;
use rand::Rng;
use std::time::Duration;

/// Backoff policy: the delay after a failed attempt is
/// `clamp(prev * factor * (1 +/- jitter * rand), min_delay, max_delay)`,
/// reset to `min_delay` on success.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay for the first retry, and the reset point after a success.
    pub min_delay: Duration,
    /// Upper clamp for the delay.
    pub max_delay: Duration,
    /// Multiplicative growth per attempt, `>= 1.0`.
    pub factor: f64,
    /// Relative jitter, `0.0 <= jitter < 1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A fast policy for tests (millisecond-scale delays).
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            factor: 2.0,
            jitter: 0.1,
        }
    }

    /// Validate field ranges eagerly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.factor < 1.0 {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "factor must be >= 1.0, got {}",
                self.factor
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.min_delay > self.max_delay {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "min_delay {:?} exceeds max_delay {:?}",
                self.min_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Stateful backoff driver. One per fetch loop.
#[derive(Debug)]
pub struct RetryManager {
    policy: RetryPolicy,
    prev_delay: Option<Duration>,
}

impl RetryManager {
    /// Create a manager for a validated policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            prev_delay: None,
        }
    }

    /// Delay to sleep before the next attempt.
    ///
    /// The first call after construction or [`RetryManager::reset`] returns
    /// `min_delay`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.prev_delay {
            None => self.policy.min_delay,
            Some(prev) => {
                let spread = rand::thread_rng().gen_range(-self.policy.jitter..=self.policy.jitter);
                let scaled = prev.as_secs_f64() * self.policy.factor * (1.0 + spread);
                Duration::from_secs_f64(scaled)
                    .clamp(self.policy.min_delay, self.policy.max_delay)
            }
        };
        self.prev_delay = Some(delay);
        delay
    }

    /// Reset to `min_delay` after a successful attempt.
    pub fn reset(&mut self) {
        self.prev_delay = None;
    }

    /// The policy this manager runs.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}
