//! Exponential backoff retry for provider calls.
//!
//! [`RetryPolicy`] wraps any [`Provider`] and retries transient failures
//! (HTTP 429, 5xx, network errors, timeouts) with exponential backoff and
//! jitter. Non-transient failures (auth, config, malformed output) are
//! returned immediately.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::types::{ChatRequest, ChatResponse};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retries.
    pub base_delay: Duration,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Random 0..jitter_fraction of the delay is added on top.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.25,
        }
    }
}

impl RetryConfig {
    /// A config with the given retry count and the default delays.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Whether a [`ProviderError`] is worth retrying.
pub fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimited { .. } => true,
        ProviderError::Timeout => true,
        ProviderError::Http(_) => true,
        ProviderError::RequestFailed(msg) => {
            msg.starts_with("HTTP 500")
                || msg.starts_with("HTTP 502")
                || msg.starts_with("HTTP 503")
                || msg.starts_with("HTTP 504")
        }
        ProviderError::AuthFailed(_)
        | ProviderError::ModelNotFound(_)
        | ProviderError::NotConfigured(_)
        | ProviderError::InvalidResponse(_)
        | ProviderError::MalformedOutput(_)
        | ProviderError::DimensionMismatch { .. }
        | ProviderError::Json(_) => false,
    }
}

/// Delay for attempt `n` (0-indexed): `min(base * 2^n, max)` plus jitter.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let base_ms = config.base_delay.as_millis() as u64;
    let capped_ms = base_ms
        .saturating_mul(exp)
        .min(config.max_delay.as_millis() as u64);

    let jitter_max_ms = (capped_ms as f64 * config.jitter_fraction) as u64;
    let jitter_ms = if jitter_max_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_max_ms)
    } else {
        0
    };

    Duration::from_millis(capped_ms + jitter_ms)
}

/// A provider wrapper that retries transient failures.
pub struct RetryPolicy<P> {
    inner: P,
    config: RetryConfig,
}

impl<P: Provider> RetryPolicy<P> {
    /// Wrap a provider with retry logic.
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// The retry configuration in effect.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<P: Provider> Provider for RetryPolicy<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            match self.inner.complete(request).await {
                Ok(response) => {
                    if attempt > 0 {
                        debug!(provider = %self.inner.name(), attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if !is_retryable(&err) || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    // When rate limited, honor the provider's suggested
                    // delay if it is larger than ours.
                    let delay = if let ProviderError::RateLimited { retry_after_ms } = &err {
                        compute_delay(&self.config, attempt)
                            .max(Duration::from_millis(*retry_after_ms))
                    } else {
                        compute_delay(&self.config, attempt)
                    };

                    warn!(
                        provider = %self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProviderError::RequestFailed("retry loop exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, Choice};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        failures_left: AtomicU32,
        calls: Arc<AtomicU32>,
        error: fn() -> ProviderError,
    }

    impl FlakyProvider {
        fn new(failures: u32, error: fn() -> ProviderError) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    failures_left: AtomicU32::new(failures),
                    calls: calls.clone(),
                    error,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err((self.error)());
            }
            Ok(ChatResponse {
                id: "resp-1".into(),
                choices: vec![Choice {
                    index: 0,
                    message: ChatMessage::assistant("ok"),
                    finish_reason: Some("stop".into()),
                }],
                usage: None,
                model: "test-model".into(),
            })
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter_fraction: 0.0,
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new("test-model", vec![ChatMessage::user("hi")])
    }

    #[test]
    fn delay_is_exponential_and_capped() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter_fraction: 0.0,
        };
        assert_eq!(compute_delay(&config, 0).as_millis(), 100);
        assert_eq!(compute_delay(&config, 1).as_millis(), 200);
        assert_eq!(compute_delay(&config, 2).as_millis(), 400);
        assert_eq!(compute_delay(&config, 8).as_millis(), 2000);
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.25,
        };
        for _ in 0..50 {
            let ms = compute_delay(&config, 0).as_millis();
            assert!((1000..=1250).contains(&ms), "delay {ms} outside [1000, 1250]");
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(is_retryable(&ProviderError::Timeout));
        assert!(is_retryable(&ProviderError::RateLimited { retry_after_ms: 1 }));
        assert!(is_retryable(&ProviderError::RequestFailed("HTTP 503: x".into())));
        assert!(!is_retryable(&ProviderError::RequestFailed("HTTP 400: x".into())));
        assert!(!is_retryable(&ProviderError::AuthFailed("x".into())));
        assert!(!is_retryable(&ProviderError::MalformedOutput("x".into())));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let (provider, calls) = FlakyProvider::new(2, || {
            ProviderError::RequestFailed("HTTP 503: unavailable".into())
        });
        let policy = RetryPolicy::new(provider, fast_config());
        let resp = policy.complete(&request()).await.unwrap();
        assert_eq!(resp.text(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let (provider, _) =
            FlakyProvider::new(99, || ProviderError::RequestFailed("HTTP 500: x".into()));
        let policy = RetryPolicy::new(
            provider,
            RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter_fraction: 0.0,
            },
        );
        let err = policy.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let (provider, calls) = FlakyProvider::new(99, || ProviderError::AuthFailed("bad".into()));
        let policy = RetryPolicy::new(provider, fast_config());
        let err = policy.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
