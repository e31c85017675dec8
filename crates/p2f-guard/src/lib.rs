//! Reliability primitives for the generation pipeline.
//!
//! This crate provides:
//! - Per-client sliding-window admission control
//! - A lazily-recovering circuit breaker for upstream calls
//! - A bounded retry policy that composes with the breaker

pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    BreakerError, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use error::{GuardError, GuardResult};
pub use rate_limiter::{Admission, RateLimiterStats, SlidingWindowRateLimiter, WindowLimit};
pub use retry::{Backoff, RetryPolicy};

/// Metric names emitted by this crate.
pub mod names {
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "p2f_rate_limit_rejections_total";
    pub const BREAKER_TRANSITIONS_TOTAL: &str = "p2f_breaker_transitions_total";
    pub const BREAKER_REJECTIONS_TOTAL: &str = "p2f_breaker_rejections_total";
    pub const RETRY_ATTEMPTS_TOTAL: &str = "p2f_retry_attempts_total";
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Critical sections in this crate are a handful of comparisons and pushes,
/// so a poisoned lock never leaves the protected state half-updated.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
