//! Pluggable external scoring backend.
//!
//! The engine never talks HTTP directly; it goes through `ScoringBackend`,
//! whose only capability is `evaluate(prompt) -> text`. The default
//! `NullBackend` keeps the whole system offline and deterministic; the
//! `HttpBackend` forwards the prompt to a configured language-model endpoint
//! with a short timeout and a single attempt. No retries are performed: a
//! failed call reports the error and the call site falls back synchronously.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no scoring backend configured")]
    Disabled,
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned status {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Send a prompt and return the raw text of the reply.
    async fn evaluate(&self, prompt: &str) -> Result<String, BackendError>;

    /// Whether this backend can produce verdicts at all. Callers use this to
    /// skip advisory checks instead of paying for a call that always fails.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Offline default. Every evaluation reports `Disabled`, so scoring stays on
/// the rule-based path and advisory checks are skipped.
pub struct NullBackend;

#[async_trait]
impl ScoringBackend for NullBackend {
    async fn evaluate(&self, _prompt: &str) -> Result<String, BackendError> {
        Err(BackendError::Disabled)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Timeout-bounded HTTP backend for a text-generation endpoint.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpBackend {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl ScoringBackend for HttpBackend {
    async fn evaluate(&self, prompt: &str) -> Result<String, BackendError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(BackendError::Status(response.status()));
        }

        let body: serde_json::Value = response.json().await?;
        Ok(reply_text(&body))
    }
}

/// Pull the generated text out of a backend reply. Different backends wrap it
/// differently ("response" for Ollama-style APIs, "text", or an array of
/// {"generated_text"} objects), so try the known shapes before giving up and
/// returning the raw body.
fn reply_text(body: &serde_json::Value) -> String {
    if let Some(text) = body.get("response").and_then(|v| v.as_str()) {
        return text.to_string();
    }
    if let Some(text) = body.get("text").and_then(|v| v.as_str()) {
        return text.to_string();
    }
    if let Some(text) = body
        .get(0)
        .and_then(|v| v.get("generated_text"))
        .and_then(|v| v.as_str())
    {
        return text.to_string();
    }
    body.to_string()
}

/// Extract the JSON object embedded in a model reply.
///
/// Models routinely wrap JSON in Markdown code fences or surround it with
/// prose. Prefer a ```json fenced block; otherwise slice from the first `{`
/// to the last `}`.
pub fn extract_json(reply: &str) -> Option<String> {
    if let Some(start) = reply.find("```json") {
        let content = &reply[start + 7..];
        if let Some(end) = content.find("```") {
            return Some(content[..end].trim().to_string());
        }
    }
    let open = reply.find('{')?;
    let close = reply.rfind('}')?;
    if close > open {
        Some(reply[open..=close].to_string())
    } else {
        None
    }
}
