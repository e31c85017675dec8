//! Scene-source generation through an OpenAI-compatible chat-completions API.

use std::time::Duration;

use async_trait::async_trait;
use p2f_models::QualityTier;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;

const SYSTEM_PROMPT: &str = r#"You are a Manim 2D animation code generator. Your input is a single
descriptive paragraph. Output only valid Python code (no markdown, no
commentary) that begins with:

    from manim import *
    import random

You may define several `class Xxx(Scene):` blocks to stage parts of the
animation. Follow these rules strictly:

- Use only the imports above, plus `import numpy as np` and `import math`
- Never read or write files, use the network, or spawn processes
- Position with `.move_to()`, `.shift()`, `.next_to()`
- Animate via `self.play(...)`, keep the whole animation under 20 seconds
- Include subtitles via `self.add(Text("...", font_size=24).to_edge(DOWN))`
- Close all parentheses and brackets, use 4-space indents
"#;

const MAX_TOKENS: u32 = 1500;
const TEMPERATURE: f32 = 0.25;

/// Errors from a code generator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Code generation timed out")]
    Timeout,

    #[error("Code generation transport error: {0}")]
    Transport(String),

    #[error("Code generation provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Malformed generation response: {0}")]
    Malformed(String),

    #[error("Code generation is not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    /// Whether the failure says something about provider health.
    ///
    /// Transient failures count toward the breaker and are retried; client
    /// errors and malformed output are not.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Timeout | GenerationError::Transport(_) => true,
            GenerationError::Provider { status, .. } => *status >= 500 || *status == 429,
            GenerationError::Malformed(_) | GenerationError::NotConfigured(_) => false,
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout
        } else if err.is_decode() {
            GenerationError::Malformed(err.to_string())
        } else {
            GenerationError::Transport(err.to_string())
        }
    }
}

/// Produces renderable scene source for a prompt.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, quality: QualityTier) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client.
pub struct ChatCompletionsGenerator {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsGenerator {
    /// Create a generator from config. Fails when no API key is set.
    pub fn new(config: &LlmConfig) -> Result<Self, GenerationError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| GenerationError::NotConfigured("LLM_API_KEY not set".to_string()))?;

        Self::with_endpoint(&config.api_base, api_key, &config.model, config.timeout)
    }

    pub fn with_endpoint(
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl CodeGenerator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &str, quality: QualityTier) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        debug!(model = %self.model, quality = %quality, "Requesting scene source");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Code generation provider returned an error");
            return Err(GenerationError::Provider {
                status: status.as_u16(),
                message: provider_message(status, &body),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Malformed("response has no choices".to_string()))?;

        let code = clean_generated_code(&content);
        if code.is_empty() {
            return Err(GenerationError::Malformed("response content is empty".to_string()));
        }
        Ok(code)
    }
}

fn provider_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status.canonical_reason().unwrap_or("unknown error").to_string();
    }
    body.chars().take(300).collect()
}

/// Strip markdown fences and trailing whitespace from generated code.
pub fn clean_generated_code(raw: &str) -> String {
    let lines: Vec<&str> = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .map(str::trim_end)
        .collect();

    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_empty()).map_or(start, |i| i + 1);

    let mut code = lines[start..end].join("\n");
    if !code.is_empty() {
        code.push('\n');
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(server: &MockServer) -> ChatCompletionsGenerator {
        ChatCompletionsGenerator::with_endpoint(&server.uri(), "test-key", "test-model", Duration::from_secs(2))
            .unwrap()
    }

    #[test]
    fn test_clean_generated_code() {
        let raw = "```python\nfrom manim import *   \n\nclass A(Scene):\n    pass\n```\n";
        assert_eq!(clean_generated_code(raw), "from manim import *\n\nclass A(Scene):\n    pass\n");
        assert_eq!(clean_generated_code("```\n```"), "");
    }

    #[test]
    fn test_transient_classification() {
        assert!(GenerationError::Timeout.is_transient());
        assert!(GenerationError::Provider { status: 503, message: String::new() }.is_transient());
        assert!(GenerationError::Provider { status: 429, message: String::new() }.is_transient());
        assert!(!GenerationError::Provider { status: 400, message: String::new() }.is_transient());
        assert!(!GenerationError::Malformed(String::new()).is_transient());
    }

    #[test]
    fn test_missing_api_key() {
        let err = ChatCompletionsGenerator::new(&LlmConfig::default()).err().unwrap();
        assert!(matches!(err, GenerationError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_generate_returns_cleaned_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "```python\nfrom manim import *\n```"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let code = generator(&server).generate("a circle", QualityTier::Medium).await.unwrap();
        assert_eq!(code, "from manim import *\n");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = generator(&server).generate("a circle", QualityTier::Low).await.unwrap_err();
        assert!(matches!(err, GenerationError::Provider { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_client_error_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = generator(&server).generate("a circle", QualityTier::Low).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = generator(&server).generate("a circle", QualityTier::Low).await.unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let generator =
            ChatCompletionsGenerator::with_endpoint(&server.uri(), "k", "m", Duration::from_millis(200)).unwrap();
        let err = generator.generate("a circle", QualityTier::Low).await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout));
    }
}
