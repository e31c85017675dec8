//! End-to-end supervision of one render.
//!
//! Each render gets a private temporary work directory (always removed) and a
//! unique output directory under the media root (removed unless the render
//! succeeds). Steps run strictly in order; the first failure ends the job.
//! The timeout is a single wall-clock budget shared by every external tool.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use p2f_models::{QualityTier, RenderSummary};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::artifacts::collect_videos;
use crate::command::{ProcessRunner, RenderCommand};
use crate::concat::{concat_videos, ConcatStrategy};
use crate::error::{RenderError, RenderResult};
use crate::names;
use crate::probe::probe_duration;
use crate::safety::{SafetyPolicy, SafetyScanner};
use crate::scenes::{enumerate_scenes, DEFAULT_SCENE_BASES};

/// File name of the retained artifact in each output directory.
pub const FINAL_ARTIFACT_NAME: &str = "final_animation.mp4";

const SCRIPT_NAME: &str = "scene.py";
const VIDEO_EXTENSION: &str = "mp4";
const WORKDIR_LABEL: &str = "<workdir>";

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Root under which each successful render keeps its output directory
    pub media_root: PathBuf,
    /// Root for temporary per-render work directories
    pub work_root: PathBuf,
    pub renderer_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    /// Maximum raw clips a render may produce
    pub max_clips: usize,
    /// Maximum duration of the final artifact, in seconds
    pub max_duration_secs: f64,
    /// Minimum size of the final artifact, in bytes
    pub min_video_bytes: u64,
    /// Time between SIGTERM and SIGKILL on timeout
    pub kill_grace: Duration,
    pub safety_policy: SafetyPolicy,
    /// Base types that mark a class as a scene entry point
    pub scene_bases: Vec<String>,
    pub renderer_verbosity: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("media/videos"),
            work_root: std::env::temp_dir(),
            renderer_bin: PathBuf::from("manim"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            max_clips: 10,
            max_duration_secs: 60.0,
            min_video_bytes: 1024,
            kill_grace: Duration::from_secs(5),
            safety_policy: SafetyPolicy::Reject,
            scene_bases: DEFAULT_SCENE_BASES.iter().map(|s| s.to_string()).collect(),
            renderer_verbosity: "WARNING".to_string(),
        }
    }
}

/// Supervises the external render toolchain.
#[derive(Debug, Clone)]
pub struct RenderOrchestrator {
    config: RenderConfig,
    scanner: SafetyScanner,
}

impl RenderOrchestrator {
    pub fn new(config: RenderConfig) -> Self {
        let scanner = SafetyScanner::new(config.safety_policy);
        Self { config, scanner }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render `source` at `quality`, bounded by `timeout`.
    ///
    /// The render runs on its own task. Dropping the returned future does not
    /// stop it; it still runs to its deadline and cleans up after itself.
    pub async fn render(
        &self,
        source: &str,
        quality: QualityTier,
        timeout: Duration,
    ) -> RenderResult<RenderSummary> {
        let run_id = new_run_id();
        let span = info_span!("render", run_id = %run_id, quality = %quality);
        let orchestrator = self.clone();
        let source = source.to_string();

        let task = tokio::spawn(
            async move { orchestrator.supervise(&run_id, &source, quality, timeout).await }.instrument(span),
        );
        task.await.map_err(|e| RenderError::TaskFailed(e.to_string()))?
    }

    async fn supervise(
        &self,
        run_id: &str,
        source: &str,
        quality: QualityTier,
        timeout: Duration,
    ) -> RenderResult<RenderSummary> {
        let started = Instant::now();
        gauge!(names::RENDERS_IN_PROGRESS).increment(1.0);
        let result = self.render_run(run_id, source, quality, timeout, started).await;
        gauge!(names::RENDERS_IN_PROGRESS).decrement(1.0);

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(summary) => {
                counter!(names::RENDERS_TOTAL, "status" => "success").increment(1);
                histogram!(names::RENDER_DURATION_SECONDS, "quality" => quality.as_str()).record(elapsed);
                info!(
                    clips = summary.clip_count,
                    duration_secs = summary.duration_secs,
                    size_bytes = summary.size_bytes,
                    elapsed_secs = elapsed,
                    "Render completed"
                );
            }
            Err(e) => {
                counter!(names::RENDERS_TOTAL, "status" => "failure").increment(1);
                counter!(names::RENDER_FAILURES_TOTAL, "kind" => e.kind().as_str()).increment(1);
                warn!(error = %e, kind = e.kind().as_str(), elapsed_secs = elapsed, "Render failed");
            }
        }
        result
    }

    async fn render_run(
        &self,
        run_id: &str,
        source: &str,
        quality: QualityTier,
        timeout: Duration,
        started: Instant,
    ) -> RenderResult<RenderSummary> {
        // Validation happens before anything touches the filesystem.
        if source.trim().is_empty() {
            return Err(RenderError::invalid_input("source is empty"));
        }
        if timeout.is_zero() {
            return Err(RenderError::invalid_input("timeout must be positive"));
        }
        self.scanner.check(source)?;

        let scenes = enumerate_scenes(source, self.config.scene_bases.as_slice());
        if scenes.is_empty() {
            return Err(RenderError::NoScenes);
        }
        info!(scenes = ?scenes, "Enumerated scene entry points");

        tokio::fs::create_dir_all(&self.config.work_root).await?;
        let workdir = tempfile::Builder::new()
            .prefix("p2f-render-")
            .tempdir_in(&self.config.work_root)?;

        let output_dir = self.config.media_root.join(run_id);
        tokio::fs::create_dir_all(&output_dir).await?;

        let result = self
            .render_in(workdir.path(), &output_dir, run_id, source, &scenes, quality, timeout, started)
            .await;

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_dir_all(&output_dir).await {
                warn!(path = %output_dir.display(), error = %e, "Failed to remove output directory");
            }
        }
        // The work directory is removed when `workdir` drops, on every path.
        drop(workdir);

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_in(
        &self,
        workdir: &Path,
        output_dir: &Path,
        run_id: &str,
        source: &str,
        scenes: &[String],
        quality: QualityTier,
        timeout: Duration,
        started: Instant,
    ) -> RenderResult<RenderSummary> {
        let script_dir = workdir.join("script");
        let media_dir = workdir.join("media");
        tokio::fs::create_dir_all(&script_dir).await?;
        tokio::fs::create_dir_all(&media_dir).await?;

        let script_path = script_dir.join(SCRIPT_NAME);
        tokio::fs::write(&script_path, source).await?;

        // One budget for every tool: renderer, concatenation and probe.
        let runner = ProcessRunner::new()
            .with_timeout(timeout)
            .with_working_dir(workdir)
            .with_kill_grace(self.config.kill_grace)
            .with_redaction(workdir, WORKDIR_LABEL);
        let runner = match started.checked_add(timeout) {
            Some(deadline) => runner.with_deadline(deadline),
            None => runner,
        };

        let command = RenderCommand::new(&script_path, &media_dir)
            .scenes(scenes.iter().cloned())
            .quality(quality)
            .verbosity(self.config.renderer_verbosity.clone());

        runner
            .run("renderer", &self.config.renderer_bin, &command.build_args())
            .await?
            .check("renderer")?;

        let clips = collect_videos(&media_dir, VIDEO_EXTENSION).await?;
        if clips.is_empty() {
            return Err(RenderError::MissingOutput);
        }
        if clips.len() > self.config.max_clips {
            return Err(RenderError::TooManyClips {
                count: clips.len(),
                max: self.config.max_clips,
            });
        }

        let final_path = output_dir.join(FINAL_ARTIFACT_NAME);
        let strategy = if clips.len() == 1 {
            tokio::fs::copy(&clips[0], &final_path).await?;
            ConcatStrategy::Single
        } else {
            concat_videos(&runner, &self.config.ffmpeg_bin, &clips, &final_path, workdir).await?
        };
        info!(clips = clips.len(), strategy = strategy.as_str(), "Assembled final artifact");

        let size_bytes = match tokio::fs::metadata(&final_path).await {
            Ok(meta) => meta.len(),
            Err(_) => return Err(RenderError::MissingOutput),
        };
        if size_bytes < self.config.min_video_bytes {
            return Err(RenderError::ArtifactTooSmall {
                size: size_bytes,
                min: self.config.min_video_bytes,
            });
        }

        let duration_secs = probe_duration(&runner, &self.config.ffprobe_bin, &final_path).await?;
        if duration_secs > self.config.max_duration_secs {
            return Err(RenderError::DurationExceeded {
                duration: duration_secs,
                max: self.config.max_duration_secs,
            });
        }

        Ok(RenderSummary {
            run_id: run_id.to_string(),
            artifact_path: final_path,
            quality,
            scenes: scenes.to_vec(),
            clip_count: clips.len(),
            duration_secs,
            size_bytes,
            elapsed_secs: started.elapsed().as_secs_f64(),
            finished_at: Utc::now(),
        })
    }
}

/// Time-ordered, collision-free render identifier.
fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}
