//! Cache error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised while loading or persisting cache metadata.
///
/// Callers treat these as degraded caching, never as request failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to read cache metadata {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write cache metadata {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
