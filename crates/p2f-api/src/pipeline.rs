//! Prompt-to-video pipeline.
//!
//! Admission, durable-cache lookup, guarded code generation, bounded
//! rendering and cache registration, in that order.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use p2f_cache::{DurableCache, MemoryCache, MemoryCacheConfig};
use p2f_guard::{BreakerError, CircuitBreaker, RetryPolicy, SlidingWindowRateLimiter};
use p2f_models::{GenerateResponse, QualityTier};
use p2f_render::RenderOrchestrator;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::generator::{CodeGenerator, GenerationError};
use crate::metrics::names;

/// Public prefix under which retained artifacts are served.
pub const MEDIA_URL_PREFIX: &str = "/media";

/// Collaborators of the pipeline, owned by the composition root.
pub struct PipelineParts {
    pub limiter: Arc<SlidingWindowRateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryPolicy,
    pub generator: Arc<dyn CodeGenerator>,
    pub code_cache: MemoryCacheConfig,
    pub video_cache: Arc<DurableCache>,
    pub orchestrator: RenderOrchestrator,
    pub max_concurrent_renders: usize,
}

pub struct GenerationPipeline {
    limiter: Arc<SlidingWindowRateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    generator: Arc<dyn CodeGenerator>,
    code_cache: MemoryCache<String>,
    video_cache: Arc<DurableCache>,
    orchestrator: RenderOrchestrator,
    render_slots: Arc<Semaphore>,
}

impl GenerationPipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            limiter: parts.limiter,
            breaker: parts.breaker,
            retry: parts.retry,
            generator: parts.generator,
            code_cache: MemoryCache::new(parts.code_cache),
            video_cache: parts.video_cache,
            orchestrator: parts.orchestrator,
            render_slots: Arc::new(Semaphore::new(parts.max_concurrent_renders.max(1))),
        }
    }

    pub fn code_cache(&self) -> &MemoryCache<String> {
        &self.code_cache
    }

    /// Renders waiting for or holding a render slot are not counted here.
    pub fn available_render_slots(&self) -> usize {
        self.render_slots.available_permits()
    }

    /// Turn `prompt` into a served video for `client`.
    ///
    /// `prompt` must already be validated and sanitized.
    pub async fn generate(
        &self,
        client: &str,
        prompt: &str,
        quality: QualityTier,
        timeout: Duration,
    ) -> ApiResult<GenerateResponse> {
        self.limiter.admit(client).into_result()?;

        let tag = quality.tag();
        if let Some(path) = self.video_cache.get(prompt, tag).await {
            if let Some(video_url) = self.media_url(&path) {
                info!(client = %client, quality = %quality, "Serving cached video");
                counter!(names::GENERATIONS_TOTAL, "outcome" => "cached").increment(1);
                return Ok(GenerateResponse {
                    video_url,
                    cached: true,
                    render_time: 0.0,
                    code_length: 0,
                });
            }
            warn!(path = %path.display(), "Cached video lies outside the media root, ignoring");
        }

        let code = self.scene_source(prompt, quality).await?;

        let started = Instant::now();
        let slot = Arc::clone(&self.render_slots)
            .acquire_owned()
            .await
            .map_err(|_| ApiError::internal("render slots closed"))?;
        // The slot lives with the render task, not with this request.
        let orchestrator = self.orchestrator.clone();
        let source = code.clone();
        let summary = tokio::spawn(async move {
            let _slot = slot;
            orchestrator.render(&source, quality, timeout).await
        })
        .await
        .map_err(|e| ApiError::internal(format!("render task failed: {e}")))?;
        let summary = match summary {
            Ok(summary) => summary,
            Err(e) => {
                counter!(names::GENERATIONS_TOTAL, "outcome" => "failed").increment(1);
                return Err(e.into());
            }
        };

        if let Err(e) = self.video_cache.set(prompt, &summary.artifact_path, tag).await {
            warn!(error = %e, run_id = %summary.run_id, "Failed to register video in cache");
        }
        self.code_cache.set(prompt, tag, code.clone());

        let video_url = self
            .media_url(&summary.artifact_path)
            .ok_or_else(|| ApiError::internal("render output lies outside the media root"))?;

        counter!(names::GENERATIONS_TOTAL, "outcome" => "rendered").increment(1);
        info!(
            client = %client,
            run_id = %summary.run_id,
            scenes = summary.scenes.len(),
            "Generated video"
        );

        Ok(GenerateResponse {
            video_url,
            cached: false,
            render_time: started.elapsed().as_secs_f64(),
            code_length: code.len(),
        })
    }

    /// Scene source for the prompt, from the code cache or the generator.
    async fn scene_source(&self, prompt: &str, quality: QualityTier) -> ApiResult<String> {
        if let Some(code) = self.code_cache.get(prompt, quality.tag()) {
            debug!(quality = %quality, "Reusing cached scene source");
            return Ok(code);
        }

        let generator = Arc::clone(&self.generator);
        let result = self
            .retry
            .run_through_breaker(
                &self.breaker,
                || {
                    let generator = Arc::clone(&generator);
                    async move { generator.generate(prompt, quality).await }
                },
                GenerationError::is_transient,
            )
            .await;

        result.map_err(|e| match e {
            BreakerError::Open { remaining, .. } => ApiError::ServiceUnavailable {
                retry_after_secs: remaining.as_secs().max(1),
            },
            BreakerError::Inner(inner) => inner.into(),
        })
    }

    fn media_url(&self, artifact: &Path) -> Option<String> {
        let relative = artifact.strip_prefix(&self.orchestrator.config().media_root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_str().map(str::to_string))
            .collect::<Option<_>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(format!("{}/{}", MEDIA_URL_PREFIX, parts.join("/")))
    }
}
