//! The chat client facade used by every agent in the pipeline.
//!
//! [`ChatClient`] owns the pieces the spec requires of the LLM client:
//! a global semaphore capping in-flight calls, a per-call timeout, a low
//! default temperature for evaluator/selector calls, and JSON-structured
//! completion with a single model-side repair retry.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use lexmt_types::config::ProviderSettings;

use crate::error::{ProviderError, Result};
use crate::json::parse_with_repair;
use crate::provider::Provider;
use crate::types::{ChatMessage, ChatRequest};

/// Per-call overrides. Unset fields fall back to the client defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Sampling temperature override (candidate generation uses a higher
    /// one than the default).
    pub temperature: Option<f64>,
    /// Max-token override.
    pub max_tokens: Option<i32>,
}

impl CallOptions {
    /// Options with only a temperature override.
    pub fn with_temperature(temperature: f64) -> Self {
        Self {
            temperature: Some(temperature),
            ..Self::default()
        }
    }
}

/// Shared chat completion client.
///
/// Cheap to clone; all clones share the same provider and semaphore, so the
/// in-flight cap is global to the run.
#[derive(Clone)]
pub struct ChatClient {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f64,
    max_tokens: i32,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl ChatClient {
    /// Build a client over `provider` with `max_concurrent` in-flight calls.
    pub fn new(provider: Arc<dyn Provider>, settings: &ProviderSettings, max_concurrent: usize) -> Self {
        Self {
            provider,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout: Duration::from_secs(settings.timeout_secs),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Unused permits; observable in tests that probe the concurrency cap.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Issue a completion and return the raw text of the first choice.
    pub async fn complete_text(&self, messages: &[ChatMessage], opts: CallOptions) -> Result<String> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ProviderError::RequestFailed("client semaphore closed".into()))?;

        let mut request = ChatRequest::new(&self.model, messages.to_vec());
        request.temperature = Some(opts.temperature.unwrap_or(self.temperature));
        request.max_tokens = Some(opts.max_tokens.unwrap_or(self.max_tokens));

        let result = tokio::time::timeout(self.timeout, self.provider.complete(&request)).await;
        drop(permit);

        match result {
            Ok(Ok(response)) => Ok(response.text().to_string()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProviderError::Timeout),
        }
    }

    /// Issue a completion and parse the reply into `T`.
    ///
    /// On a parse or shape mismatch, the prompt is reissued once with the
    /// model's original output appended plus a corrective instruction. A
    /// second failure is [`ProviderError::MalformedOutput`].
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        messages: &[ChatMessage],
        opts: CallOptions,
    ) -> Result<T> {
        let text = self.complete_text(messages, opts).await?;

        match decode::<T>(&text) {
            Ok(value) => Ok(value),
            Err(parse_err) => {
                warn!(error = %parse_err, "model output failed to parse, issuing repair retry");

                let mut repair_messages = messages.to_vec();
                repair_messages.push(ChatMessage::assistant(&text));
                repair_messages.push(ChatMessage::user(format!(
                    "Your previous reply could not be parsed: {parse_err}. \
                     Reply again with ONLY the corrected JSON object, no prose, no code fences."
                )));

                let repaired = self
                    .complete_text(&repair_messages, CallOptions::default())
                    .await?;

                decode::<T>(&repaired).map_err(|second_err| {
                    ProviderError::MalformedOutput(format!(
                        "repair retry failed: {second_err}; original error: {parse_err}"
                    ))
                })
            }
        }
    }
}

/// Parse text (with the local repair pass) and deserialize into `T`.
fn decode<T: DeserializeOwned>(text: &str) -> std::result::Result<T, String> {
    let value = parse_with_repair(text).map_err(|e| format!("invalid JSON: {e}"))?;
    serde_json::from_value(value).map_err(|e| format!("unexpected shape: {e}"))
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Log a prompt at debug level with its agent attribution. Used by the
/// agent kernel; lives here so tracing stays consistent across crates.
pub fn trace_prompt(agent: &str, messages: &[ChatMessage]) {
    debug!(
        agent,
        messages = messages.len(),
        chars = messages.iter().map(|m| m.content.len()).sum::<usize>(),
        "issuing agent prompt"
    );
}
