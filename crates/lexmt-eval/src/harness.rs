//! The experiment harness: bounded-concurrency batch execution across
//! samples × ablation configs, metric computation, and artifact assembly.
//!
//! Segments run concurrently under a semaphore; completion order is
//! arbitrary and the harness reassembles results by input position so the
//! output list always preserves dataset order. Cancellation aborts
//! in-flight segments, which are recorded as cancelled without a partial
//! trace. One failed segment never aborts the run.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use lexmt_pipeline::{Orchestrator, PipelineOutcome};
use lexmt_types::{
    AblationConfig, LayerKind, PipelineTrace, Result, RunConfig, Segment, SegmentResult,
    SegmentStatus, TermTable,
};

use crate::artifacts::{AblationReport, IntermediateArtifact, RunArtifact};
use crate::metrics::{MetricEngine, SampleInputs};

/// Drives a dataset through every configured ablation.
pub struct Harness {
    orchestrator: Arc<Orchestrator>,
    config: Arc<RunConfig>,
    engine: Arc<MetricEngine>,
    cancel: CancellationToken,
}

impl Harness {
    /// Create a harness over the shared orchestrator and metric engine.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        config: Arc<RunConfig>,
        engine: Arc<MetricEngine>,
    ) -> Self {
        Self {
            orchestrator,
            config,
            engine,
            cancel: CancellationToken::new(),
        }
    }

    /// A token that cancels the whole run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute every ablation over the dataset and assemble the artifacts.
    pub async fn run(
        &self,
        dataset: &[Segment],
    ) -> Result<(RunArtifact, Vec<IntermediateArtifact>)> {
        self.config.validate()?;
        let run_id = Uuid::new_v4().simple().to_string();
        let created_at = Utc::now();
        let pair = dataset.first().map(|s| s.pair).unwrap_or_else(
            lexmt_types::LangPair::zh_en,
        );

        let mut ablation_reports = Vec::with_capacity(self.config.ablations.len());
        let mut intermediates = Vec::new();

        for ablation in &self.config.ablations {
            info!(ablation = %ablation.name, segments = dataset.len(), "running ablation");
            let results = self.run_ablation(dataset, ablation).await;

            if self.config.save_intermediate && is_full(ablation) {
                intermediates.extend(
                    self.extract_intermediates(&run_id, ablation, &results, dataset)
                        .await,
                );
            }

            let aggregate = MetricEngine::aggregate(&self.config.metrics, &results, pair);
            let results = if self.config.save_traces {
                results
            } else {
                results
                    .into_iter()
                    .map(|mut r| {
                        r.trace = None;
                        r
                    })
                    .collect()
            };
            ablation_reports.push(AblationReport {
                name: ablation.name.clone(),
                results,
                aggregate,
            });
        }

        let artifact = RunArtifact {
            run_id,
            created_at,
            config: (*self.config).clone(),
            ablations: ablation_reports,
        };
        Ok((artifact, intermediates))
    }

    /// Run one ablation: all segments under the concurrency cap, results
    /// restored to input order.
    async fn run_ablation(
        &self,
        dataset: &[Segment],
        ablation: &AblationConfig,
    ) -> Vec<SegmentResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks: JoinSet<(usize, SegmentResult)> = JoinSet::new();

        for (position, segment) in dataset.iter().enumerate() {
            let orchestrator = self.orchestrator.clone();
            let ablation = ablation.clone();
            let segment = segment.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                if cancel.is_cancelled() {
                    return (position, SegmentResult::cancelled(&segment.id, &segment.source));
                }
                let result = tokio::select! {
                    outcome = orchestrator.translate(&segment, &ablation) => {
                        result_from_outcome(&segment, outcome)
                    }
                    _ = cancel.cancelled() => {
                        SegmentResult::cancelled(&segment.id, &segment.source)
                    }
                };
                (position, result)
            });
        }

        let mut indexed: Vec<(usize, SegmentResult)> = Vec::with_capacity(dataset.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => indexed.push(entry),
                Err(e) => warn!(error = %e, "segment task panicked"),
            }
        }
        indexed.sort_by_key(|(position, _)| *position);

        let mut results: Vec<SegmentResult> = Vec::with_capacity(indexed.len());
        for (_, mut result) in indexed {
            if matches!(result.status, SegmentStatus::Ok | SegmentStatus::Failed) {
                let table = result.trace.as_ref().and_then(term_table_of);
                result.metrics = self
                    .engine
                    .score_sample(
                        &self.config.metrics,
                        &SampleInputs {
                            source: &result.source,
                            prediction: &result.prediction,
                            reference: result.reference.as_deref(),
                            pair: dataset
                                .iter()
                                .find(|s| s.id == result.sample_id)
                                .map(|s| s.pair)
                                .unwrap_or_else(lexmt_types::LangPair::zh_en),
                            term_table: table.as_ref(),
                        },
                    )
                    .await;
            }
            results.push(result);
        }
        results
    }

    /// Synthesize terminology-only and terminology+syntax result sets by
    /// reading r1/r2 from each full trace, without re-running anything.
    async fn extract_intermediates(
        &self,
        run_id: &str,
        ablation: &AblationConfig,
        results: &[SegmentResult],
        dataset: &[Segment],
    ) -> Vec<IntermediateArtifact> {
        let gated_prefix: Vec<LayerKind> = ablation
            .resolved_gating()
            .into_iter()
            .filter(|l| matches!(l, LayerKind::Terminology | LayerKind::Syntax))
            .collect();
        if !gated_prefix.is_empty() {
            warn!(
                layers = ?gated_prefix,
                "gating is enabled for intermediate layers; extracted intermediates may duplicate upstream outputs"
            );
        }

        let mut artifacts = Vec::with_capacity(2);
        for (layer_set, cut) in [
            ("terminology_only", LayerKind::Terminology),
            ("terminology_syntax", LayerKind::Syntax),
        ] {
            let mut extracted: Vec<SegmentResult> = Vec::with_capacity(results.len());
            for result in results {
                let mut intermediate = result.clone();
                intermediate.metrics = BTreeMap::new();
                if let Some(trace) = &result.trace {
                    if let Some(output) = trace.layer(cut) {
                        intermediate.prediction = output.translation.clone();
                    }
                    let table = term_table_of(trace);
                    if intermediate.success {
                        intermediate.metrics = self
                            .engine
                            .score_sample(
                                &self.config.metrics,
                                &SampleInputs {
                                    source: &intermediate.source,
                                    prediction: &intermediate.prediction,
                                    reference: intermediate.reference.as_deref(),
                                    pair: dataset
                                        .iter()
                                        .find(|s| s.id == intermediate.sample_id)
                                        .map(|s| s.pair)
                                        .unwrap_or_else(lexmt_types::LangPair::zh_en),
                                    term_table: table.as_ref(),
                                },
                            )
                            .await;
                    }
                }
                intermediate.trace = None;
                extracted.push(intermediate);
            }

            let pair = dataset
                .first()
                .map(|s| s.pair)
                .unwrap_or_else(lexmt_types::LangPair::zh_en);
            let aggregate = MetricEngine::aggregate(&self.config.metrics, &extracted, pair);
            artifacts.push(IntermediateArtifact {
                run_id: run_id.to_string(),
                derived_from: ablation.name.clone(),
                layer_set: layer_set.to_string(),
                results: extracted,
                aggregate,
            });
        }
        artifacts
    }
}

fn is_full(ablation: &AblationConfig) -> bool {
    LayerKind::ALL
        .iter()
        .all(|layer| ablation.enabled_layers.contains(layer))
}

fn term_table_of(trace: &PipelineTrace) -> Option<TermTable> {
    trace.layers.iter().find_map(|output| match &output.artifacts {
        lexmt_types::LayerArtifacts::Terminology { term_table, .. } => Some(term_table.clone()),
        _ => None,
    })
}

fn result_from_outcome(segment: &Segment, outcome: PipelineOutcome) -> SegmentResult {
    match outcome {
        PipelineOutcome::Completed(trace) => SegmentResult {
            sample_id: segment.id.clone(),
            source: segment.source.clone(),
            reference: segment.reference.clone(),
            prediction: trace.final_translation.clone(),
            success: true,
            status: SegmentStatus::Ok,
            error_kind: None,
            trace: Some(trace),
            metrics: BTreeMap::new(),
        },
        PipelineOutcome::Failed {
            last_translation,
            error,
            ..
        } => SegmentResult {
            sample_id: segment.id.clone(),
            source: segment.source.clone(),
            reference: segment.reference.clone(),
            prediction: last_translation,
            success: false,
            status: SegmentStatus::Failed,
            error_kind: Some(error.kind().to_string()),
            trace: None,
            metrics: BTreeMap::new(),
        },
        PipelineOutcome::Invalid(error) => SegmentResult {
            sample_id: segment.id.clone(),
            source: segment.source.clone(),
            reference: segment.reference.clone(),
            prediction: String::new(),
            success: false,
            status: SegmentStatus::Skipped,
            error_kind: Some(error.kind().to_string()),
            trace: None,
            metrics: BTreeMap::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexmt_llm::provider::Provider;
    use lexmt_llm::types::{ChatRequest, ChatResponse, Choice};
    use lexmt_llm::{ChatClient, ChatMessage, ProviderError};
    use lexmt_types::config::{Metric, ProviderSettings};
    use lexmt_types::LangPair;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replies to every request with a fixed translation and tracks the
    /// concurrent-call high-water mark.
    struct GaugeProvider {
        current: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl GaugeProvider {
        fn new(delay: Duration) -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for GaugeProvider {
        fn name(&self) -> &str {
            "gauge"
        }

        async fn complete(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(ChatResponse {
                id: "r".into(),
                choices: vec![Choice {
                    index: 0,
                    message: ChatMessage::assistant(
                        r#"{"translation": "Workers shall have the right to equal employment."}"#,
                    ),
                    finish_reason: None,
                }],
                usage: None,
                model: "m".into(),
            })
        }
    }

    fn baseline_config(max_concurrent: usize) -> Arc<RunConfig> {
        let mut config = RunConfig::default();
        config.max_concurrent = max_concurrent;
        config.ablations = vec![AblationConfig::baseline()];
        config.metrics = [Metric::Bleu, Metric::Chrf].into_iter().collect();
        Arc::new(config)
    }

    fn harness_over(
        provider: Arc<GaugeProvider>,
        config: Arc<RunConfig>,
    ) -> Harness {
        let client = ChatClient::new(
            provider,
            &ProviderSettings::default(),
            config.max_concurrent,
        );
        let orchestrator = Arc::new(Orchestrator::new(client, None, None, config.clone()));
        Harness::new(
            orchestrator,
            config,
            Arc::new(MetricEngine::new(None, None)),
        )
    }

    fn dataset(n: usize) -> Vec<Segment> {
        (0..n)
            .map(|i| {
                Segment::new(format!("s{i}"), "劳动者享有平等就业的权利。", LangPair::zh_en())
                    .with_reference("Workers shall have the right to equal employment.")
            })
            .collect()
    }

    #[tokio::test]
    async fn results_preserve_input_order() {
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(1)));
        let harness = harness_over(provider, baseline_config(4));
        let (artifact, _) = harness.run(&dataset(9)).await.unwrap();

        let ids: Vec<String> = artifact.ablations[0]
            .results
            .iter()
            .map(|r| r.sample_id.clone())
            .collect();
        let expected: Vec<String> = (0..9).map(|i| format!("s{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn concurrency_cap_is_respected() {
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(15)));
        let harness = harness_over(provider.clone(), baseline_config(5));
        harness.run(&dataset(20)).await.unwrap();

        let peak = provider.peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "observed {peak} in-flight calls with a cap of 5");
        assert!(peak >= 2, "expected real parallelism, observed peak {peak}");
    }

    #[tokio::test]
    async fn successful_samples_carry_metrics() {
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(1)));
        let harness = harness_over(provider, baseline_config(2));
        let (artifact, _) = harness.run(&dataset(3)).await.unwrap();

        let report = &artifact.ablations[0];
        for result in &report.results {
            assert!(result.success);
            assert!(result.metrics["bleu"] > 0.0);
            assert!(result.metrics["chrf"] > 0.0);
        }
        assert!(report.aggregate["bleu"] > 0.0);
        assert!(report.aggregate["bleu_corpus"] > 0.0);
    }

    #[tokio::test]
    async fn empty_source_segment_is_skipped_not_fatal() {
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(1)));
        let harness = harness_over(provider, baseline_config(2));

        let mut segments = dataset(2);
        segments.push(Segment::new("s-empty", "  ", LangPair::zh_en()));
        let (artifact, _) = harness.run(&segments).await.unwrap();

        let results = &artifact.ablations[0].results;
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].status, SegmentStatus::Skipped);
        assert_eq!(results[2].error_kind.as_deref(), Some("input_invalid"));
        assert!(results[0].success && results[1].success);
    }

    #[tokio::test]
    async fn cancellation_records_cancelled_segments() {
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(200)));
        let harness = harness_over(provider, baseline_config(2));
        let cancel = harness.cancellation_token();

        let segments = dataset(6);
        let run = harness.run(&segments);
        tokio::pin!(run);

        // Let a couple of segments start, then cancel.
        let (artifact, _) = tokio::select! {
            biased;
            _ = tokio::time::sleep(Duration::from_millis(30)) => {
                cancel.cancel();
                run.await.unwrap()
            }
            finished = &mut run => finished.unwrap(),
        };

        let statuses: Vec<SegmentStatus> = artifact.ablations[0]
            .results
            .iter()
            .map(|r| r.status)
            .collect();
        assert!(
            statuses.contains(&SegmentStatus::Cancelled),
            "expected cancelled segments, got {statuses:?}"
        );
        assert!(
            artifact.ablations[0]
                .results
                .iter()
                .filter(|r| r.status == SegmentStatus::Cancelled)
                .all(|r| r.trace.is_none()),
            "cancelled segments must not carry a partial trace"
        );
    }

    #[tokio::test]
    async fn intermediates_read_r1_and_r2_without_rerunning() {
        use std::collections::VecDeque;
        use std::sync::Mutex;

        struct QueueProvider {
            replies: Mutex<VecDeque<String>>,
            calls: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl Provider for QueueProvider {
            fn name(&self) -> &str {
                "queue"
            }
            async fn complete(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let reply = self
                    .replies
                    .lock()
                    .expect("lock")
                    .pop_front()
                    .ok_or_else(|| ProviderError::RequestFailed("script exhausted".into()))?;
                Ok(ChatResponse {
                    id: "r".into(),
                    choices: vec![Choice {
                        index: 0,
                        message: ChatMessage::assistant(reply),
                        finish_reason: None,
                    }],
                    usage: None,
                    model: "m".into(),
                })
            }
        }

        let replies = [
            r#"{"terms": [{"term": "劳动者", "importance": 0.9}]}"#,
            r#"{"accuracy": 0.7, "consistency": 0.7, "completeness": 0.7, "overall": 0.7, "issues": []}"#,
            r#"{"translation": "first-layer translation"}"#,
            r#"{"patterns": []}"#,
            r#"{"modal_fidelity": 0.5, "connective_consistency": 0.5, "conditional_logic_preservation": 0.5, "voice_appropriateness": 0.5, "overall": 0.5, "issues": [{"span": "x", "description": "y"}]}"#,
            r#"{"translation": "second-layer translation", "overrides": []}"#,
            // Discourse has no TM handle: no further calls.
        ];
        let provider = Arc::new(QueueProvider {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: AtomicUsize::new(0),
        });

        let mut config = RunConfig::default();
        config.max_concurrent = 1;
        config.save_intermediate = true;
        config.metrics = [Metric::Bleu].into_iter().collect();
        config.ablations = vec![AblationConfig::full()];
        let config = Arc::new(config);

        let client = ChatClient::new(provider.clone(), &ProviderSettings::default(), 1);
        let orchestrator = Arc::new(Orchestrator::new(client, None, None, config.clone()));
        let harness = Harness::new(
            orchestrator,
            config,
            Arc::new(MetricEngine::new(None, None)),
        );

        let (artifact, intermediates) = harness.run(&dataset(1)).await.unwrap();
        let calls_after_run = provider.calls.load(Ordering::SeqCst);

        assert_eq!(intermediates.len(), 2);
        assert_eq!(intermediates[0].layer_set, "terminology_only");
        assert_eq!(intermediates[0].results[0].prediction, "first-layer translation");
        assert_eq!(intermediates[1].layer_set, "terminology_syntax");
        assert_eq!(intermediates[1].results[0].prediction, "second-layer translation");
        // Extraction is pure trace reading; the script was consumed by the
        // pipeline alone.
        assert_eq!(calls_after_run, replies.len());

        let full = &artifact.ablations[0];
        let trace = full.results[0].trace.as_ref().unwrap();
        assert_eq!(
            trace.layer(LayerKind::Terminology).unwrap().translation,
            intermediates[0].results[0].prediction
        );
        assert_eq!(
            trace.layer(LayerKind::Syntax).unwrap().translation,
            intermediates[1].results[0].prediction
        );
    }

    #[tokio::test]
    async fn invalid_config_refuses_to_start() {
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(1)));
        let mut config = RunConfig::default();
        config.ablations = vec![];
        let harness = harness_over(provider, Arc::new(config));

        let err = harness.run(&dataset(1)).await.unwrap_err();
        assert_eq!(err.kind(), "config_invalid");
    }
}
