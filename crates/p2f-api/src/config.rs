//! API configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use p2f_guard::{Backoff, CircuitBreakerConfig, RetryPolicy, WindowLimit};
use p2f_render::{RenderConfig, RetentionPolicy, SafetyPolicy};

/// Default OpenAI-compatible chat-completions endpoint.
pub const DEFAULT_LLM_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_LLM_MODEL: &str = "llama3-70b-8192";

/// Render timeouts accepted from clients are clamped to this range.
pub const MIN_RENDER_TIMEOUT_SECS: u64 = 60;
pub const MAX_RENDER_TIMEOUT_SECS: u64 = 600;

/// Code-generation client settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
    /// Total attempts per generation, including the first
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff
    pub retry_base: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_LLM_API_BASE.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_base: Duration::from_millis(1000),
        }
    }
}

impl LlmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new("code_generation")
            .with_max_attempts(self.max_attempts)
            .with_backoff(Backoff::Exponential {
                base: self.retry_base,
                max: self.retry_base.saturating_mul(8),
            })
    }
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    pub metrics_enabled: bool,
    /// Shared secret for admin routes; admin routes are open when unset
    pub admin_token: Option<String>,

    /// Generation requests per client per minute
    pub rate_limit_per_minute: u32,
    /// Generation requests per client per hour
    pub rate_limit_per_hour: u32,

    pub breaker: CircuitBreakerConfig,
    pub llm: LlmConfig,

    pub prompt_cache_max_size: usize,
    pub prompt_cache_ttl: Duration,
    pub video_cache_ttl: Duration,

    pub render: RenderConfig,
    /// Render timeout used when a request does not specify one
    pub default_render_timeout_secs: u64,
    pub max_concurrent_renders: usize,

    pub retention: RetentionPolicy,
    pub housekeeping_interval: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_body_size: 64 * 1024,
            environment: "development".to_string(),
            metrics_enabled: true,
            admin_token: None,
            rate_limit_per_minute: 5,
            rate_limit_per_hour: 20,
            breaker: CircuitBreakerConfig::default(),
            llm: LlmConfig::default(),
            prompt_cache_max_size: 100,
            prompt_cache_ttl: Duration::from_secs(24 * 3600),
            video_cache_ttl: Duration::from_secs(7 * 24 * 3600),
            render: RenderConfig::default(),
            default_render_timeout_secs: 300,
            max_concurrent_renders: 2,
            retention: RetentionPolicy::default(),
            housekeeping_interval: Duration::from_secs(600),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let render_defaults = RenderConfig::default();

        let render = RenderConfig {
            media_root: env_parse("MEDIA_ROOT", render_defaults.media_root),
            work_root: env_parse("RENDER_WORK_DIR", render_defaults.work_root),
            renderer_bin: env_parse("RENDERER_BIN", render_defaults.renderer_bin),
            ffmpeg_bin: env_parse("FFMPEG_BIN", render_defaults.ffmpeg_bin),
            ffprobe_bin: env_parse("FFPROBE_BIN", render_defaults.ffprobe_bin),
            max_clips: env_parse("MAX_RENDER_CLIPS", render_defaults.max_clips),
            max_duration_secs: env_parse("MAX_VIDEO_DURATION_SECS", render_defaults.max_duration_secs),
            min_video_bytes: env_parse("MIN_VIDEO_BYTES", render_defaults.min_video_bytes),
            kill_grace: Duration::from_secs(env_parse("RENDER_KILL_GRACE_SECS", 5)),
            safety_policy: if env_bool("SAFETY_SCAN_REJECT", true) {
                SafetyPolicy::Reject
            } else {
                SafetyPolicy::LogOnly
            },
            ..render_defaults
        };

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: env_parse("MAX_BODY_SIZE", defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            metrics_enabled: env_bool("METRICS_ENABLED", true),
            admin_token: std::env::var("ADMIN_TOKEN").ok().filter(|s| !s.is_empty()),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            rate_limit_per_hour: env_parse("RATE_LIMIT_PER_HOUR", defaults.rate_limit_per_hour),
            breaker: CircuitBreakerConfig {
                failure_threshold: env_parse("LLM_BREAKER_THRESHOLD", 5),
                recovery_timeout: Duration::from_secs(env_parse("LLM_BREAKER_RECOVERY_SECS", 60)),
            },
            llm: LlmConfig {
                api_key: std::env::var("LLM_API_KEY").ok().filter(|s| !s.is_empty()),
                api_base: std::env::var("LLM_API_BASE")
                    .unwrap_or_else(|_| DEFAULT_LLM_API_BASE.to_string()),
                model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
                timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 60)),
                max_attempts: env_parse("LLM_MAX_ATTEMPTS", 3),
                retry_base: Duration::from_millis(env_parse("LLM_RETRY_BASE_MS", 1000)),
            },
            prompt_cache_max_size: env_parse("PROMPT_CACHE_MAX_SIZE", defaults.prompt_cache_max_size),
            prompt_cache_ttl: Duration::from_secs(env_parse::<u64>("PROMPT_CACHE_TTL_HOURS", 24) * 3600),
            video_cache_ttl: Duration::from_secs(env_parse::<u64>("VIDEO_CACHE_TTL_DAYS", 7) * 24 * 3600),
            render,
            default_render_timeout_secs: clamp_render_timeout(env_parse(
                "RENDER_TIMEOUT_SECS",
                defaults.default_render_timeout_secs,
            )),
            max_concurrent_renders: env_parse("MAX_CONCURRENT_RENDERS", defaults.max_concurrent_renders)
                .max(1),
            retention: RetentionPolicy::new(
                env_parse("VIDEO_CLEANUP_AGE_HOURS", 24),
                env_parse("MAX_VIDEO_STORAGE_GB", 5.0),
            ),
            housekeeping_interval: Duration::from_secs(env_parse("HOUSEKEEPING_INTERVAL_SECS", 600)),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    /// Admission windows for the generation endpoint.
    pub fn rate_limits(&self) -> Vec<WindowLimit> {
        vec![
            WindowLimit::new(60, self.rate_limit_per_minute, "minute"),
            WindowLimit::new(3600, self.rate_limit_per_hour, "hour"),
        ]
    }

    pub fn media_root(&self) -> &PathBuf {
        &self.render.media_root
    }
}

/// Clamp a requested render timeout into the accepted range.
pub fn clamp_render_timeout(secs: u64) -> u64 {
    secs.clamp(MIN_RENDER_TIMEOUT_SECS, MAX_RENDER_TIMEOUT_SECS)
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}
