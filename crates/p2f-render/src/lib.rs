//! Supervised rendering of generated scene source.
//!
//! This crate provides:
//! - An advisory safety scan over generated source (not a sandbox)
//! - Structural enumeration of scene entry points
//! - A process runner with hard timeouts and process-group termination
//! - Clip collection, concatenation and duration probing
//! - The [`RenderOrchestrator`] tying those steps together
//! - A retention sweep for retained render directories

pub mod artifacts;
pub mod command;
pub mod concat;
pub mod error;
pub mod orchestrator;
pub mod probe;
pub mod retention;
pub mod safety;
pub mod scenes;

pub use artifacts::collect_videos;
pub use command::{ProcessOutput, ProcessRunner, RenderCommand};
pub use concat::{concat_videos, ConcatStrategy};
pub use error::{RenderError, RenderErrorKind, RenderResult};
pub use orchestrator::{RenderConfig, RenderOrchestrator, FINAL_ARTIFACT_NAME};
pub use probe::probe_duration;
pub use retention::{cleanup_old_renders, RetentionPolicy, RetentionReport};
pub use safety::{SafetyFinding, SafetyPolicy, SafetyReport, SafetyScanner};
pub use scenes::{enumerate_scenes, DEFAULT_SCENE_BASES};

/// Metric names emitted by this crate.
pub mod names {
    pub const RENDERS_TOTAL: &str = "p2f_renders_total";
    pub const RENDER_FAILURES_TOTAL: &str = "p2f_render_failures_total";
    pub const RENDER_DURATION_SECONDS: &str = "p2f_render_duration_seconds";
    pub const RENDERS_IN_PROGRESS: &str = "p2f_renders_in_progress";
    pub const SAFETY_FINDINGS_TOTAL: &str = "p2f_safety_findings_total";
    pub const PROCESS_TIMEOUTS_TOTAL: &str = "p2f_process_timeouts_total";
    pub const RETENTION_REMOVED_TOTAL: &str = "p2f_retention_removed_total";
}
