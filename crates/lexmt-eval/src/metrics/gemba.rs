//! GEMBA LLM-judge metrics: direct assessment and MQM-style annotation.
//!
//! Both issue a single judge call through the shared chat client and map
//! the reply onto [0, 1]. A judge failure yields NaN rather than an error:
//! a metric is a total function and must not fail a segment.

use serde::Deserialize;
use tracing::warn;

use lexmt_llm::{CallOptions, ChatClient};
use lexmt_pipeline::{prompts, roster, run_agent};
use lexmt_types::LangPair;

#[derive(Debug, Deserialize)]
struct DaReply {
    score: f64,
}

#[derive(Debug, Deserialize)]
struct MqmReply {
    #[serde(default)]
    errors: Vec<MqmError>,
}

#[derive(Debug, Deserialize)]
struct MqmError {
    #[serde(default)]
    #[allow(dead_code)]
    span: String,
    #[serde(default)]
    #[allow(dead_code)]
    category: String,
    severity: String,
}

/// GEMBA direct assessment: 0-100 judge scale mapped to [0, 1].
pub async fn gemba_da(
    client: &ChatClient,
    source: &str,
    prediction: &str,
    pair: LangPair,
) -> f64 {
    match run_agent::<DaReply>(
        client,
        &roster::GEMBA_JUDGE,
        prompts::gemba_da(source, prediction, pair),
        CallOptions::default(),
    )
    .await
    {
        Ok(reply) => (reply.score / 100.0).clamp(0.0, 1.0),
        Err(e) => {
            warn!(error = %e, "gemba-da judge failed");
            f64::NAN
        }
    }
}

/// GEMBA MQM: error annotations converted to a penalty score. Weights are
/// the MQM convention (critical 10, major 5, minor 1), capped at 25
/// penalty points and mapped to [0, 1].
pub async fn gemba_mqm(
    client: &ChatClient,
    source: &str,
    prediction: &str,
    pair: LangPair,
) -> f64 {
    match run_agent::<MqmReply>(
        client,
        &roster::GEMBA_JUDGE,
        prompts::gemba_mqm(source, prediction, pair),
        CallOptions::default(),
    )
    .await
    {
        Ok(reply) => {
            let penalty: f64 = reply
                .errors
                .iter()
                .map(|e| match e.severity.to_lowercase().as_str() {
                    "critical" => 10.0,
                    "major" => 5.0,
                    _ => 1.0,
                })
                .sum();
            1.0 - (penalty.min(25.0) / 25.0)
        }
        Err(e) => {
            warn!(error = %e, "gemba-mqm judge failed");
            f64::NAN
        }
    }
}
