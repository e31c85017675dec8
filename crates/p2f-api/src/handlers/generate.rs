//! Generation handler.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::{Extension, Json};
use p2f_models::{GenerateRequest, GenerateResponse};
use tracing::info;

use crate::config::clamp_render_timeout;
use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientId;
use crate::state::AppState;
use crate::validation::{sanitize_prompt, validate_prompt};

/// Turn a prompt into a rendered video.
pub async fn generate(
    State(state): State<AppState>,
    Extension(client): Extension<ClientId>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<Json<GenerateResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    validate_prompt(&request.prompt)?;
    let prompt = sanitize_prompt(&request.prompt);
    let timeout = Duration::from_secs(clamp_render_timeout(request.timeout));

    info!(
        client = %client.as_str(),
        quality = %request.quality,
        timeout_secs = timeout.as_secs(),
        prompt_chars = prompt.chars().count(),
        "Generation requested"
    );

    let response = state
        .pipeline
        .generate(client.as_str(), &prompt, request.quality, timeout)
        .await?;

    Ok(Json(response))
}
