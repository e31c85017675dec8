//! Admin handlers for operating the reliability layer.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use p2f_guard::BreakerSnapshot;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Debug, Deserialize)]
pub struct RateLimitResetRequest {
    pub client_id: String,
}

#[derive(Serialize)]
pub struct RateLimitResetResponse {
    pub client_id: String,
    /// Whether the client had any tracked history
    pub cleared: bool,
}

/// Reject the request unless it carries the configured admin token.
fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Ok(());
    };
    let supplied = headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok());
    if supplied == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("Admin token required"))
    }
}

/// Force the generation breaker closed.
pub async fn reset_breaker(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<BreakerSnapshot>> {
    authorize(&state, &headers)?;
    state.breaker.reset();
    info!(breaker = %state.breaker.name(), "Circuit breaker reset by admin");
    Ok(Json(state.breaker.snapshot()))
}

/// Clear one client's admission history.
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RateLimitResetRequest>,
) -> ApiResult<Json<RateLimitResetResponse>> {
    authorize(&state, &headers)?;
    let client_id = request.client_id.trim().to_string();
    if client_id.is_empty() {
        return Err(ApiError::bad_request("client_id is required"));
    }

    let cleared = state.limiter.reset_client(&client_id);
    info!(client = %client_id, cleared, "Rate limit reset by admin");
    Ok(Json(RateLimitResetResponse { client_id, cleared }))
}
