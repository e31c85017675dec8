//! Error types for admission control.

use thiserror::Error;

/// Result type for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;

/// Errors raised by the guard primitives themselves.
///
/// Breaker rejections are carried by [`crate::BreakerError`] so that the
/// wrapped operation's own error type is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("Rate limit exceeded for window '{window}', retry after {retry_after_secs}s")]
    RateLimited {
        window: String,
        retry_after_secs: u64,
    },

    #[error("Invalid guard configuration: {0}")]
    InvalidConfig(String),
}

impl GuardError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Seconds the client should wait before retrying, if applicable.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GuardError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            GuardError::InvalidConfig(_) => None,
        }
    }
}
