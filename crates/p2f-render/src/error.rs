//! Error types for render operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Coarse failure class of a [`RenderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderErrorKind {
    /// Malformed or unsafe input. Terminal, never retried.
    ValidationFailed,
    /// An external tool failed, timed out, or produced nothing.
    ExternalToolFailure,
    /// The render completed but its result is unacceptable.
    ResourceBoundExceeded,
}

impl RenderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderErrorKind::ValidationFailed => "validation_failed",
            RenderErrorKind::ExternalToolFailure => "external_tool_failure",
            RenderErrorKind::ResourceBoundExceeded => "resource_bound_exceeded",
        }
    }
}

/// Errors that can occur while rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Invalid render input: {0}")]
    InvalidInput(String),

    #[error("Source rejected by safety scan: {0}")]
    UnsafeSource(String),

    #[error("No scene entry points found in source")]
    NoScenes,

    #[error("{tool} not found: {}", program.display())]
    ToolNotFound { tool: String, program: PathBuf },

    #[error("{tool} failed: {message}")]
    ToolFailed {
        tool: String,
        message: String,
        stdout: Option<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: String, secs: u64 },

    #[error("Renderer produced no video output")]
    MissingOutput,

    #[error("Renderer produced {count} clips, limit is {max}")]
    TooManyClips { count: usize, max: usize },

    #[error("Video duration {duration:.1}s exceeds limit of {max:.0}s")]
    DurationExceeded { duration: f64, max: f64 },

    #[error("Video is too small ({size} bytes, minimum {min})")]
    ArtifactTooSmall { size: u64, min: u64 },

    #[error("Concatenation failed: {0}")]
    ConcatFailed(String),

    #[error("Duration probe failed: {0}")]
    ProbeFailed(String),

    #[error("Render task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a tool failure error.
    pub fn tool_failed(
        tool: impl Into<String>,
        message: impl Into<String>,
        stdout: Option<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
            stdout,
            stderr,
            exit_code,
        }
    }

    pub fn kind(&self) -> RenderErrorKind {
        match self {
            RenderError::InvalidInput(_) | RenderError::UnsafeSource(_) | RenderError::NoScenes => {
                RenderErrorKind::ValidationFailed
            }
            RenderError::TooManyClips { .. }
            | RenderError::DurationExceeded { .. }
            | RenderError::ArtifactTooSmall { .. } => RenderErrorKind::ResourceBoundExceeded,
            RenderError::ToolNotFound { .. }
            | RenderError::ToolFailed { .. }
            | RenderError::Timeout { .. }
            | RenderError::MissingOutput
            | RenderError::ConcatFailed(_)
            | RenderError::ProbeFailed(_)
            | RenderError::TaskFailed(_)
            | RenderError::Io(_) => RenderErrorKind::ExternalToolFailure,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RenderError::Timeout { .. })
    }

    /// Captured tool stderr, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            RenderError::ToolFailed { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }
}
