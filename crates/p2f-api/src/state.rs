//! Application state.

use std::sync::Arc;

use p2f_cache::{DurableCache, DurableCacheConfig, MemoryCacheConfig};
use p2f_guard::{CircuitBreaker, SlidingWindowRateLimiter};
use p2f_render::RenderOrchestrator;

use crate::config::ApiConfig;
use crate::generator::{ChatCompletionsGenerator, CodeGenerator};
use crate::pipeline::{GenerationPipeline, PipelineParts};

/// Name of the breaker guarding the code-generation provider.
pub const GENERATION_BREAKER: &str = "code_generation";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub limiter: Arc<SlidingWindowRateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub video_cache: Arc<DurableCache>,
    pub pipeline: Arc<GenerationPipeline>,
}

impl AppState {
    /// Create state backed by the chat-completions generator.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let generator = ChatCompletionsGenerator::new(&config.llm)?;
        Self::with_generator(config, Arc::new(generator)).await
    }

    /// Create state around an explicit generator.
    pub async fn with_generator(
        config: ApiConfig,
        generator: Arc<dyn CodeGenerator>,
    ) -> anyhow::Result<Self> {
        let limiter = Arc::new(SlidingWindowRateLimiter::new(config.rate_limits())?);
        let breaker = Arc::new(CircuitBreaker::new(GENERATION_BREAKER, config.breaker.clone()));

        let video_cache = Arc::new(
            DurableCache::open(
                DurableCacheConfig::new(config.media_root().clone()).with_ttl(config.video_cache_ttl),
            )
            .await,
        );

        let pipeline = GenerationPipeline::new(PipelineParts {
            limiter: Arc::clone(&limiter),
            breaker: Arc::clone(&breaker),
            retry: config.llm.retry_policy(),
            generator,
            code_cache: MemoryCacheConfig {
                max_size: config.prompt_cache_max_size,
                ttl: config.prompt_cache_ttl,
                name: "scene_source".to_string(),
            },
            video_cache: Arc::clone(&video_cache),
            orchestrator: RenderOrchestrator::new(config.render.clone()),
            max_concurrent_renders: config.max_concurrent_renders,
        });

        Ok(Self {
            config,
            limiter,
            breaker,
            video_cache,
            pipeline: Arc::new(pipeline),
        })
    }
}
