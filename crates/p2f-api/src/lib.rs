//! Axum HTTP API server for prompt-to-video generation.
//!
//! This crate provides:
//! - Environment-driven configuration
//! - The code-generation client and the generation pipeline
//! - REST endpoints for generation, monitoring and administration
//! - Background housekeeping of retained renders

pub mod config;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod housekeeping;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod validation;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use generator::{ChatCompletionsGenerator, CodeGenerator, GenerationError};
pub use pipeline::GenerationPipeline;
pub use routes::create_router;
pub use state::AppState;
