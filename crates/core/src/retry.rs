//! Bounded retry with a pluggable delay schedule.
//!
//! Every retry loop in the session core goes through [`RetryPolicy`]: capture
//! restarts, playback attempts and completion-service calls. Most failures
//! here are platform-event races rather than server overload, so the default
//! schedule grows linearly (`500ms * attempt`) instead of exponentially.

use crate::error::RetryError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// One invocation of a retried action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 1-based number of this attempt.
    pub attempt_number: u32,
    pub max_attempts: u32,
    /// The wait applied before the next attempt if this one fails.
    pub delay: Duration,
}

impl RetryAttempt {
    pub fn is_last(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }
}

/// How long to wait after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Constant(Duration),
    /// `step * attempt`.
    Linear(Duration),
    /// `initial * factor^(attempt - 1)`.
    Exponential { initial: Duration, factor: f64 },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            Backoff::Constant(delay) => delay,
            Backoff::Linear(step) => step.saturating_mul(attempt),
            Backoff::Exponential { initial, factor } => {
                initial.mul_f64(factor.powi(attempt as i32 - 1))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, Backoff::Constant(delay))
    }

    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self::new(max_attempts, Backoff::Linear(step))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// The schedule entry for attempt `number`, or `None` once the budget is
    /// spent. Used by callers that drive retries from events instead of
    /// awaiting [`RetryPolicy::execute`].
    pub fn attempt(&self, number: u32) -> Option<RetryAttempt> {
        if number == 0 || number > self.max_attempts {
            return None;
        }
        Some(RetryAttempt {
            attempt_number: number,
            max_attempts: self.max_attempts,
            delay: self.backoff.delay(number),
        })
    }

    /// Runs `action` until it succeeds or the attempts are used up.
    pub async fn execute<T, E, F, Fut>(&self, action: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(RetryAttempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_while(action, |_| true).await
    }

    /// Like [`RetryPolicy::execute`], but gives up immediately on errors for
    /// which `retryable` returns false.
    pub async fn execute_while<T, E, F, Fut, P>(
        &self,
        mut action: F,
        mut retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(RetryAttempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut number = 1;
        loop {
            let attempt = RetryAttempt {
                attempt_number: number,
                max_attempts: self.max_attempts,
                delay: self.backoff.delay(number),
            };
            match action(attempt).await {
                Ok(value) => {
                    if number > 1 {
                        debug!(attempt = number, "succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) if attempt.is_last() || !retryable(&err) => {
                    warn!(attempt = number, max_attempts = self.max_attempts, error = %err, "giving up");
                    return Err(RetryError {
                        attempts: number,
                        last: err,
                    });
                }
                Err(err) => {
                    warn!(
                        attempt = number,
                        max_attempts = self.max_attempts,
                        delay_ms = attempt.delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(attempt.delay).await;
                    number += 1;
                }
            }
        }
    }
}
