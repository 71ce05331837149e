//! Explicit retry policies for calls to external collaborators.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant(Duration),
    /// `multiplier * 2^(attempt - 1)`, clamped to `[min, max]`.
    Exponential {
        multiplier: Duration,
        min: Duration,
        max: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// A single attempt.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Constant(Duration::ZERO),
        }
    }

    /// Storage existence checks: 5 attempts, exponential 1s..10s.
    pub const fn exists_check() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Exponential {
                multiplier: Duration::from_secs(1),
                min: Duration::from_secs(1),
                max: Duration::from_secs(10),
            },
        }
    }

    /// Upstream HTTP calls: 3 attempts, 2s apart.
    pub const fn http() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Constant(Duration::from_secs(2)),
        }
    }

    /// Same schedule, without any waiting. Handy in tests.
    pub fn without_delay(self) -> Self {
        Self {
            backoff: Backoff::Constant(Duration::ZERO),
            ..self
        }
    }

    /// Wait before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Constant(delay) => delay,
            Backoff::Exponential {
                multiplier,
                min,
                max,
            } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                multiplier.saturating_mul(factor).max(min).min(max)
            }
        }
    }

    /// Runs `call` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, E, F, Fut, P>(&self, operation: &str, is_retryable: P, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && is_retryable(&err) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
