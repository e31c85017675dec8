//! Render outcome summaries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::quality::QualityTier;

/// Summary of a successful render.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RenderSummary {
    /// Unique identifier of the render (also the output directory name)
    pub run_id: String,
    /// Path of the final, retained artifact
    pub artifact_path: PathBuf,
    /// Quality tier the render used
    pub quality: QualityTier,
    /// Scene entry points that were rendered, in declaration order
    pub scenes: Vec<String>,
    /// Number of raw clips produced by the renderer
    pub clip_count: usize,
    /// Probed duration of the final artifact, in seconds
    pub duration_secs: f64,
    /// Size of the final artifact, in bytes
    pub size_bytes: u64,
    /// Wall-clock time spent on the whole render, in seconds
    pub elapsed_secs: f64,
    pub finished_at: DateTime<Utc>,
}

impl RenderSummary {
    /// File name of the final artifact.
    pub fn file_name(&self) -> Option<String> {
        self.artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }
}
