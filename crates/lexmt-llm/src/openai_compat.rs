//! OpenAI-compatible chat completion provider.
//!
//! [`OpenAiCompatProvider`] talks to any endpoint that accepts the OpenAI
//! `POST /chat/completions` request format. The endpoint URL, model, and
//! credentials all come from [`ProviderSettings`].

use async_trait::async_trait;
use tracing::{debug, warn};

use lexmt_types::config::ProviderSettings;

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::types::{ChatRequest, ChatResponse};

/// A chat provider backed by an OpenAI-compatible HTTP API.
pub struct OpenAiCompatProvider {
    base_url: String,
    api_key_env: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider from run configuration. The API key is resolved
    /// from the configured environment variable at request time.
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            api_key_env: settings.api_key_env.clone(),
            api_key: None,
            http: reqwest::Client::new(),
        }
    }

    /// Create a provider with an explicit API key, bypassing the
    /// environment lookup.
    pub fn with_api_key(settings: &ProviderSettings, api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::new(settings)
        }
    }

    fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Explicit key wins over the environment variable.
    fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env)
            .map_err(|_| ProviderError::NotConfigured(format!("set {} env var", self.api_key_env)))
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let api_key = self.resolve_api_key()?;

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );

        let response = self
            .http
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                let header_ms = parse_retry_after_header(&response);
                let body = response.text().await.unwrap_or_default();

                // Some providers use 429 for exhausted credits, which no
                // amount of waiting will fix.
                if is_quota_exhausted(&body) {
                    warn!("quota exhausted (not retryable)");
                    return Err(ProviderError::RequestFailed(
                        extract_error_message(&body)
                            .unwrap_or_else(|| "credits exhausted or spending limit reached".into()),
                    ));
                }

                let retry_ms = header_ms
                    .or_else(|| parse_retry_after_ms(&body))
                    .unwrap_or(1000);
                warn!(retry_after_ms = retry_ms, "rate limited");
                return Err(ProviderError::RateLimited {
                    retry_after_ms: retry_ms,
                });
            }

            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ProviderError::AuthFailed(body),
                404 => ProviderError::ModelNotFound(format!("model '{}': {body}", request.model)),
                _ => ProviderError::RequestFailed(format!("HTTP {status}: {body}")),
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse response: {e}")))?;

        debug!(
            model = %chat_response.model,
            choices = chat_response.choices.len(),
            "chat completion response received"
        );

        Ok(chat_response)
    }
}

/// A 429 body that signals billing exhaustion rather than throttling.
fn is_quota_exhausted(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["exhausted", "spending limit", "billing", "insufficient_quota"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Pull a human-readable message out of a JSON error body, accepting both
/// `{"error": {"message": "..."}}` and `{"error": "..."}` shapes.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let err = value.get("error")?;
    err.get("message")
        .and_then(|m| m.as_str())
        .or_else(|| err.as_str())
        .map(String::from)
}

/// Numeric `Retry-After` header in milliseconds. HTTP-date form is rare for
/// API providers and is not handled.
fn parse_retry_after_header(response: &reqwest::Response) -> Option<u64> {
    let value = response
        .headers()
        .get("retry-after")
        .or_else(|| response.headers().get("x-ratelimit-reset-after"))
        .and_then(|v| v.to_str().ok())?;
    value
        .parse::<f64>()
        .ok()
        .map(|secs| (secs * 1000.0).max(0.0) as u64)
}

/// `retry_after_ms` or `retry_after` (seconds) from a JSON error body.
fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("retry_after_ms")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            value
                .get("retry_after")
                .and_then(|v| v.as_f64())
                .map(|secs| (secs * 1000.0) as u64)
        })
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}
