//! Bounded retry with backoff.
//!
//! Retries are an explicit policy chosen at the call site. When the retried
//! operation goes through a [`CircuitBreaker`], an open circuit stops the
//! loop immediately so retries never hammer a dependency the breaker has
//! already given up on.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use crate::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::names;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * 2^(retry - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the given retry (1-based: the first retry is 1).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                base.saturating_mul(factor).min(*max)
            }
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(10),
            },
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given operation name and default schedule.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `operation` until it succeeds, `should_retry` rejects the error,
    /// or the attempt budget is spent. The last error is returned.
    pub async fn run<F, Fut, T, E, R>(&self, mut operation: F, should_retry: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && should_retry(&e) => {
                    let delay = self.backoff.delay_for_retry(attempt);
                    counter!(names::RETRY_ATTEMPTS_TOTAL, "operation" => self.operation_name.clone())
                        .increment(1);
                    debug!(
                        operation = %self.operation_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        warn!(
                            operation = %self.operation_name,
                            attempts = attempt,
                            error = %e,
                            "Giving up after retries"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Retry `operation` through `breaker`.
    ///
    /// `is_failure` classifies errors for the breaker; only classified
    /// failures are retried, and an open circuit ends the loop at once.
    pub async fn run_through_breaker<F, Fut, T, E, P>(
        &self,
        breaker: &CircuitBreaker,
        mut operation: F,
        is_failure: P,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            let result = breaker
                .execute_classified(&mut operation, &is_failure)
                .await;

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let retryable = match &error {
                BreakerError::Open { .. } => false,
                BreakerError::Inner(inner) => is_failure(inner),
            };
            if !retryable || attempt >= max_attempts {
                if attempt > 1 {
                    warn!(
                        operation = %self.operation_name,
                        attempts = attempt,
                        error = %error,
                        "Giving up after retries"
                    );
                }
                return Err(error);
            }

            let delay = self.backoff.delay_for_retry(attempt);
            counter!(names::RETRY_ATTEMPTS_TOTAL, "operation" => self.operation_name.clone())
                .increment(1);
            debug!(
                operation = %self.operation_name,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying through breaker"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
