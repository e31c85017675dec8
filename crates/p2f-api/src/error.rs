//! API error types.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use p2f_guard::GuardError;
use p2f_render::{RenderError, RenderErrorKind};
use serde::Serialize;
use thiserror::Error;

use crate::generator::GenerationError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limit exceeded for the {window} window")]
    RateLimited { window: String, retry_after_secs: u64 },

    #[error("Code generation is temporarily unavailable, retry in {retry_after_secs}s")]
    ServiceUnavailable { retry_after_secs: u64 },

    #[error("Render rejected: {0}")]
    ResourceBound(String),

    #[error("Upstream failure: {message}")]
    Upstream {
        message: String,
        diagnostics: Option<String>,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ResourceBound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Validation(_) => "validation_failed",
            ApiError::RateLimited { .. } => "admission_denied",
            ApiError::ServiceUnavailable { .. } => "dependency_unavailable",
            ApiError::ResourceBound(_) => "resource_bound_exceeded",
            ApiError::Upstream { .. } | ApiError::Timeout(_) => "external_tool_failure",
            ApiError::Internal(_) => "internal",
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ApiError::RateLimited { retry_after_secs, .. }
            | ApiError::ServiceUnavailable { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::RateLimited {
                window,
                retry_after_secs,
            } => ApiError::RateLimited {
                window,
                retry_after_secs,
            },
            GuardError::InvalidConfig(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        if err.is_timeout() {
            return ApiError::Timeout(err.to_string());
        }
        match err.kind() {
            RenderErrorKind::ValidationFailed => ApiError::Validation(err.to_string()),
            RenderErrorKind::ResourceBoundExceeded => ApiError::ResourceBound(err.to_string()),
            RenderErrorKind::ExternalToolFailure => ApiError::Upstream {
                message: err.to_string(),
                diagnostics: err.stderr().map(str::to_string),
            },
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Timeout => ApiError::Timeout(err.to_string()),
            GenerationError::NotConfigured(_) => ApiError::Internal(err.to_string()),
            _ => ApiError::Upstream {
                message: err.to_string(),
                diagnostics: None,
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let production = std::env::var("ENVIRONMENT")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        // Don't expose internal error details in production
        let detail = match &self {
            ApiError::Internal(_) if production => "An internal error occurred".to_string(),
            _ => self.to_string(),
        };
        let diagnostics = match &self {
            ApiError::Upstream { diagnostics, .. } if !production => diagnostics.clone(),
            _ => None,
        };
        let window = match &self {
            ApiError::RateLimited { window, .. } => Some(window.clone()),
            _ => None,
        };
        let retry_after = self.retry_after_secs();

        let body = ErrorResponse {
            detail,
            code: self.code(),
            window,
            retry_after,
            diagnostics,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            window: "minute".to_string(),
            retry_after_secs: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_render_error_mapping() {
        assert_eq!(
            ApiError::from(RenderError::NoScenes).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RenderError::TooManyClips { count: 12, max: 10 }).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(RenderError::Timeout { tool: "renderer".into(), secs: 60 }).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(RenderError::MissingOutput).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
