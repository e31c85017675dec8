//! Shared types for the Prompt2Frame service.
//!
//! This crate provides:
//! - Render quality tiers and their tool/cache encodings
//! - Request/response DTOs for the generation endpoint
//! - Render summaries returned by the orchestrator

pub mod generate;
pub mod quality;
pub mod render;

pub use generate::{GenerateRequest, GenerateResponse, DEFAULT_RENDER_TIMEOUT_SECS};
pub use quality::{ParseQualityError, QualityTier};
pub use render::RenderSummary;
