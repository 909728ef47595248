//! Provider error types for lexmt-llm.
//!
//! All chat and embedding operations return [`Result<T>`] with
//! [`ProviderError`] as the error type. Errors convert upward into
//! [`lexmt_types::PipelineError`] at the client boundary.

use thiserror::Error;

/// Errors that can occur when talking to an LLM or embedding provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The HTTP request to the provider failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Authentication with the provider was rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The provider returned a rate-limit response (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait time before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// The requested model does not exist on the provider.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The provider has not been configured (e.g. missing API key).
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The provider returned a response that could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The model's text could not be parsed into the requested structure,
    /// even after the repair retry.
    #[error("malformed output: {0}")]
    MalformedOutput(String),

    /// The request timed out.
    #[error("timeout")]
    Timeout,

    /// The embedding response width did not match the registered dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Registered embedding width.
        expected: usize,
        /// Width the provider actually returned.
        actual: usize,
    },

    /// An HTTP-level error from reqwest.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A convenience type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

impl From<ProviderError> for lexmt_types::PipelineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MalformedOutput(msg) => {
                lexmt_types::PipelineError::MalformedModelOutput(msg)
            }
            other => lexmt_types::PipelineError::UpstreamUnavailable(other.to_string()),
        }
    }
}
