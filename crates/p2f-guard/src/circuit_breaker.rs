//! Circuit breaker for upstream calls.
//!
//! Provides fault isolation for unreliable dependencies (the code-generation
//! provider in particular). Recovery is lazy: there is no background timer,
//! the `Open -> HalfOpen` transition happens on the first call attempted
//! after the recovery timeout has elapsed.
//!
//! While half-open, every caller that arrives before the first trial result
//! is recorded is let through. Trial volume is low in practice, so this race
//! is accepted rather than serialized behind a dedicated trial lock.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::counter;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{lock, names};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing fast
    Open,
    /// Trial calls allowed to probe recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive classified failures that open the circuit
    pub failure_threshold: u32,
    /// Time to wait after the last failure before probing again
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not invoked.
    Open { breaker: String, remaining: Duration },
    /// The operation ran and failed.
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// Remaining cooldown when the circuit was open.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            BreakerError::Open { remaining, .. } => Some(*remaining),
            BreakerError::Inner(_) => None,
        }
    }

    pub fn inner(&self) -> Option<&E> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(e) => Some(e),
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { breaker, remaining } => write!(
                f,
                "Circuit breaker '{}' is open, retry in {}s",
                breaker,
                remaining.as_secs().max(1)
            ),
            BreakerError::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

/// Monitoring snapshot of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    /// Seconds left before a trial call is allowed (open circuits only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_cooldown_secs: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker around one protected dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under the breaker, counting every error as a failure.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(operation, |_| true).await
    }

    /// Run `operation` under the breaker.
    ///
    /// Only errors for which `is_failure` returns true affect breaker state;
    /// other errors propagate untouched.
    pub async fn execute_classified<F, Fut, T, E, P>(
        &self,
        operation: F,
        is_failure: P,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        self.try_acquire(Instant::now())?;

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                if is_failure(&e) {
                    self.on_failure(Instant::now());
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Force the breaker closed, discarding any cooldown.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        info!(breaker = %self.name, "Circuit breaker manually reset to closed");
    }

    /// Current state. An open breaker whose cooldown has elapsed still
    /// reports `Open` until the next call attempt.
    pub fn state(&self) -> CircuitState {
        lock(&self.inner).state
    }

    pub fn failure_count(&self) -> u32 {
        lock(&self.inner).failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = lock(&self.inner);
        let remaining_cooldown_secs = match inner.state {
            CircuitState::Open => Some(self.remaining_cooldown(&inner, Instant::now()).as_secs()),
            _ => None,
        };

        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
            remaining_cooldown_secs,
        }
    }

    fn try_acquire<E>(&self, now: Instant) -> Result<(), BreakerError<E>> {
        let mut inner = lock(&self.inner);
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let remaining = self.remaining_cooldown(&inner, now);
        if remaining.is_zero() {
            self.transition(&mut inner, CircuitState::HalfOpen);
            info!(breaker = %self.name, "Circuit breaker entering half-open state");
            return Ok(());
        }

        counter!(names::BREAKER_REJECTIONS_TOTAL, "breaker" => self.name.clone()).increment(1);
        Err(BreakerError::Open {
            breaker: self.name.clone(),
            remaining,
        })
    }

    fn on_success(&self) {
        let mut inner = lock(&self.inner);
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            self.transition(&mut inner, CircuitState::Closed);
            info!(breaker = %self.name, "Circuit breaker recovered, now closed");
        }
    }

    fn on_failure(&self, now: Instant) {
        let mut inner = lock(&self.inner);
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
                warn!(breaker = %self.name, "Trial call failed, circuit breaker re-opened");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                self.transition(&mut inner, CircuitState::Open);
                error!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    fn remaining_cooldown(&self, inner: &BreakerInner, now: Instant) -> Duration {
        match inner.last_failure {
            Some(at) => self
                .config
                .recovery_timeout
                .saturating_sub(now.duration_since(at)),
            None => Duration::ZERO,
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        inner.state = to;
        counter!(
            names::BREAKER_TRANSITIONS_TOTAL,
            "breaker" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
    }
}
