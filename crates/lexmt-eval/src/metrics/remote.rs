//! Remote neural scorers (BERTScore, COMET) behind a black-box HTTP
//! endpoint.
//!
//! The scorer service exposes `POST {base}/score` accepting
//! `{metric, source, prediction, reference}` and returning `{score}`.
//! Model loading, batching, and GPU placement are the service's problem;
//! the harness treats it as opaque. Failures yield NaN, never an error.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use lexmt_types::config::ScorerSettings;

#[derive(Debug, Deserialize)]
struct ScoreReply {
    score: f64,
}

/// Client for the remote scorer service.
pub struct RemoteScorer {
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl RemoteScorer {
    /// Create a scorer client from run configuration.
    pub fn new(settings: &ScorerSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    /// Score one sample with the named metric ("bertscore" or "comet").
    /// NaN on any failure or when the reference is missing.
    pub async fn score(
        &self,
        metric: &str,
        source: &str,
        prediction: &str,
        reference: Option<&str>,
    ) -> f64 {
        let Some(reference) = reference else {
            return f64::NAN;
        };

        let body = serde_json::json!({
            "metric": metric,
            "source": source,
            "prediction": prediction,
            "reference": reference,
        });

        let response = self
            .http
            .post(format!("{}/score", self.base_url))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<ScoreReply>().await {
                Ok(reply) => reply.score,
                Err(e) => {
                    warn!(metric, error = %e, "scorer returned an unparseable body");
                    f64::NAN
                }
            },
            Ok(resp) => {
                warn!(metric, status = %resp.status(), "scorer request failed");
                f64::NAN
            }
            Err(e) => {
                warn!(metric, error = %e, "scorer unreachable");
                f64::NAN
            }
        }
    }
}
