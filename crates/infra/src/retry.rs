//! Bounded retry of optimistic read-decide-commit cycles.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ServiceError;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    /// `base * 2^(retry - 1)`, capped at `max_delay`.
    #[default]
    Exponential,
    /// `base * retry`, capped at `max_delay`.
    Linear,
}

/// Retry policy for operations that may lose a version race.
///
/// Only [`ServiceError::VersionConflict`] is retried; every other outcome
/// returns immediately. After `max_retries` retries the operation fails with
/// [`ServiceError::ConcurrentUpdateExceeded`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (`0` = single attempt).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) added on top of the computed delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(retry.saturating_sub(1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * f64::from(retry)).min(max_ms),
        };

        // Deterministic spread so contending callers do not retry in lockstep.
        let spread = if self.jitter > 0.0 {
            let factor = f64::from(retry.wrapping_mul(17) % 100) / 100.0;
            delay_ms * self.jitter.clamp(0.0, 1.0) * factor
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + spread) as u64)
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent.
    ///
    /// The closure receives the 1-based attempt number and must redo the full
    /// read-decide-commit cycle on every call.
    pub fn run<T, F>(&self, operation: &'static str, mut attempt: F) -> Result<T, ServiceError>
    where
        F: FnMut(u32) -> Result<T, ServiceError>,
    {
        let mut n = 1;
        loop {
            match attempt(n) {
                Err(err @ ServiceError::VersionConflict(_)) => {
                    if n > self.max_retries {
                        warn!(operation, attempts = n, error = %err, "giving up after repeated version conflicts");
                        return Err(ServiceError::ConcurrentUpdateExceeded {
                            operation,
                            attempts: n,
                        });
                    }

                    let delay = self.delay_for_retry(n);
                    debug!(operation, attempt = n, ?delay, error = %err, "version conflict; retrying");
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    n += 1;
                }
                other => return other,
            }
        }
    }
}
