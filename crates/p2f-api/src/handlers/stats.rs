//! Service statistics.

use axum::extract::State;
use axum::Json;
use p2f_cache::{DurableCacheStats, MemoryCacheStats};
use p2f_guard::{BreakerSnapshot, RateLimiterStats};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct CacheStats {
    pub scene_source: MemoryCacheStats,
    pub videos: DurableCacheStats,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub rate_limiter: RateLimiterStats,
    pub circuit_breaker: BreakerSnapshot,
    pub cache: CacheStats,
    pub available_render_slots: usize,
    pub max_concurrent_renders: usize,
}

/// Monitoring snapshot of the reliability layer.
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        rate_limiter: state.limiter.stats(),
        circuit_breaker: state.breaker.snapshot(),
        cache: CacheStats {
            scene_source: state.pipeline.code_cache().stats(),
            videos: state.video_cache.stats().await,
        },
        available_render_slots: state.pipeline.available_render_slots(),
        max_concurrent_renders: state.config.max_concurrent_renders,
    })
}
