//! Generation endpoint DTOs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::quality::QualityTier;

/// Default wall-clock budget for a single render.
pub const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 300;

/// Request body for `POST /api/generate`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GenerateRequest {
    /// Natural-language description of the animation
    pub prompt: String,
    /// Requested quality tier
    #[serde(default)]
    pub quality: QualityTier,
    /// Render timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_RENDER_TIMEOUT_SECS
}

/// Response body for `POST /api/generate`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Public URL of the rendered video
    pub video_url: String,
    /// Whether the video was served from the durable cache
    pub cached: bool,
    /// Wall-clock time spent rendering, in seconds (0 on cache hits)
    pub render_time: f64,
    /// Length of the generated scene source, in bytes (0 on cache hits)
    pub code_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: GenerateRequest = serde_json::from_str(r#"{"prompt":"a circle"}"#).unwrap();
        assert_eq!(req.quality, QualityTier::Medium);
        assert_eq!(req.timeout, DEFAULT_RENDER_TIMEOUT_SECS);
    }

    #[test]
    fn test_response_uses_camel_case() {
        let resp = GenerateResponse {
            video_url: "/media/run/final_animation.mp4".to_string(),
            cached: false,
            render_time: 1.5,
            code_length: 42,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("videoUrl").is_some());
        assert!(json.get("codeLength").is_some());
    }
}
