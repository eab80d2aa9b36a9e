//! Post-processor trait and the OpenAI-compatible API implementation.
//!
//! Post-processing is strictly best-effort: the orchestrator catches every
//! error at its boundary and passes the raw transcript through unchanged.
//! For that reason [`PostProcessError`] carries no [`ErrorCategory`] mapping
//! — these failures are never classified and never reach the recovery
//! supervisor.
//!
//! [`ApiSummarizer`] calls any OpenAI-compatible `/v1/chat/completions`
//! endpoint — Ollama (OpenAI mode), OpenAI, Groq, LM Studio, vLLM, etc.
//! All connection details come from [`PostConfig`]; nothing is hardcoded.
//!
//! [`ErrorCategory`]: crate::report::ErrorCategory

use async_trait::async_trait;
use thiserror::Error;

use crate::config::PostConfig;

/// System prompt for the summarization processing type.
const SUMMARIZE_PROMPT: &str = "You are a concise editor. Summarize the \
following transcribed speech in a few sentences, preserving the speaker's \
meaning. Reply with the summary only.";

// ---------------------------------------------------------------------------
// PostProcessError
// ---------------------------------------------------------------------------

/// Errors that can occur during post-processing.
#[derive(Debug, Error)]
pub enum PostProcessError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("post-processing request timed out")]
    Timeout,

    /// The HTTP response could not be parsed as expected JSON.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The endpoint returned a response with no usable text content.
    #[error("endpoint returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for PostProcessError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PostProcessError::Timeout
        } else {
            PostProcessError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// PostProcessor trait
// ---------------------------------------------------------------------------

/// Async trait for best-effort text transforms.
///
/// Implementors must be `Send + Sync` so they can be shared across tasks
/// (e.g. wrapped in `Arc<dyn PostProcessor>`).
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Transform `text` (e.g. summarize it).
    ///
    /// Callers treat any error as "use `text` unchanged".
    async fn process(&self, text: &str) -> Result<String, PostProcessError>;
}

// ---------------------------------------------------------------------------
// ApiSummarizer
// ---------------------------------------------------------------------------

/// Summarizes transcripts via an OpenAI-compatible chat-completions API.
///
/// # No hardcoded URLs
/// All connection details (`base_url`, `api_key`, `model`) come exclusively
/// from the [`PostConfig`] passed to [`ApiSummarizer::from_config`].
pub struct ApiSummarizer {
    client: reqwest::Client,
    config: PostConfig,
}

impl ApiSummarizer {
    /// Build an `ApiSummarizer` from application config.
    ///
    /// The HTTP client is pre-configured with the per-request timeout from
    /// `config.timeout_secs`.  A default (no-timeout) client is used as a
    /// last-resort fallback if the builder fails (should never happen in
    /// practice).
    pub fn from_config(config: &PostConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl PostProcessor for ApiSummarizer {
    /// Send `text` to the configured endpoint for summarization.
    ///
    /// The `Authorization: Bearer …` header is attached **only** when
    /// `config.api_key` is `Some(key)` and `key` is non-empty — safe for
    /// Ollama and other local providers that require no authentication.
    async fn process(&self, text: &str) -> Result<String, PostProcessError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);

        let body = serde_json::json!({
            "model":       self.config.model,
            "messages": [
                { "role": "system", "content": SUMMARIZE_PROMPT },
                { "role": "user",   "content": text             }
            ],
            "stream":      false,
            "temperature": self.config.temperature,
            "max_tokens":  256
        });

        let mut req = self.client.post(&url).json(&body);

        // Attach Authorization header only when api_key is a non-empty string.
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PostProcessError::Parse(e.to_string()))?;

        let processed = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(PostProcessError::EmptyResponse)?
            .trim()
            .to_string();

        if processed.is_empty() {
            return Err(PostProcessError::EmptyResponse);
        }

        Ok(processed)
    }
}

// ---------------------------------------------------------------------------
// MockPostProcessor  (test-only)
// ---------------------------------------------------------------------------

/// Test double with a fixed response or a fixed failure.
#[cfg(test)]
pub struct MockPostProcessor {
    response: Option<String>,
    calls: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl MockPostProcessor {
    /// Always succeeds with `text`.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            response: Some(text.into()),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Always fails.
    pub fn failing() -> Self {
        Self {
            response: None,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl PostProcessor for MockPostProcessor {
    async fn process(&self, _text: &str) -> Result<String, PostProcessError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &self.response {
            Some(text) => Ok(text.clone()),
            None => Err(PostProcessError::Request("connection refused".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(api_key: Option<&str>) -> PostConfig {
        PostConfig {
            enabled: true,
            base_url: "http://localhost:11434".into(),
            api_key: api_key.map(|s| s.to_string()),
            model: "qwen2.5:3b".into(),
            temperature: 0.3,
            timeout_secs: 10,
        }
    }

    #[test]
    fn from_config_builds_without_panic() {
        let config = make_config(None);
        let _summarizer = ApiSummarizer::from_config(&config);
    }

    #[test]
    fn from_config_accepts_empty_api_key() {
        let config = make_config(Some(""));
        let _summarizer = ApiSummarizer::from_config(&config);
    }

    #[test]
    fn from_config_accepts_real_api_key() {
        let config = make_config(Some("sk-test-1234"));
        let _summarizer = ApiSummarizer::from_config(&config);
    }

    /// Verify that `ApiSummarizer` is object-safe (usable as
    /// `dyn PostProcessor`).
    #[test]
    fn summarizer_is_object_safe() {
        let config = make_config(None);
        let processor: Box<dyn PostProcessor> = Box::new(ApiSummarizer::from_config(&config));
        drop(processor);
    }

    #[tokio::test]
    async fn mock_ok_returns_configured_text() {
        let mock = MockPostProcessor::ok("a summary");
        assert_eq!(mock.process("long transcript").await.unwrap(), "a summary");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn mock_failing_returns_err() {
        let mock = MockPostProcessor::failing();
        assert!(mock.process("text").await.is_err());
    }
}
