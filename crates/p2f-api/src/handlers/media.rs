//! Serving of retained render artifacts.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, Request};
use axum::response::Response;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const CACHE_CONTROL: &str = "public, max-age=3600";

/// Single path segment made of safe characters, never hidden or relative.
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= 128
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Serve `<media_root>/<run_id>/<file>` with range support.
pub async fn serve_media(
    State(state): State<AppState>,
    Path((run_id, file)): Path<(String, String)>,
    request: Request<Body>,
) -> ApiResult<Response> {
    if !is_safe_segment(&run_id) || !is_safe_segment(&file) {
        return Err(ApiError::not_found("Video not found"));
    }

    let path = state.config.media_root().join(&run_id).join(&file);
    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ApiError::not_found("Video not found"));
    }

    let response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let mut response = response.map(Body::new);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_segments() {
        assert!(is_safe_segment("20260101_120000_abcd1234"));
        assert!(is_safe_segment("final_animation.mp4"));
        assert!(!is_safe_segment(".."));
        assert!(!is_safe_segment(".hidden"));
        assert!(!is_safe_segment("a/b"));
        assert!(!is_safe_segment("cache metadata.json"));
        assert!(!is_safe_segment(""));
    }
}
