//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::admin::{reset_breaker, reset_rate_limit};
use crate::handlers::generate::generate;
use crate::handlers::media::serve_media;
use crate::handlers::stats::stats;
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{client_identity, cors_layer, request_id, request_logging, security_headers};
use crate::pipeline::MEDIA_URL_PREFIX;
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let api_routes = Router::new()
        .route("/generate", post(generate))
        .route("/stats", get(stats))
        .route("/admin/breaker/reset", post(reset_breaker))
        .route("/admin/rate-limit/reset", post(reset_rate_limit))
        .layer(middleware::from_fn(client_identity));

    let media_routes = Router::new().route(
        &format!("{MEDIA_URL_PREFIX}/:run_id/:file"),
        get(serve_media),
    );

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(media_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
