//! End-to-end pipeline tests over a scripted provider.
//!
//! These drive the public API the way the CLI does -- orchestrator,
//! retrieval stores, harness -- with a mock chat provider standing in for
//! the LLM endpoint, and check the shapes the pipeline guarantees:
//! trace structure, gating carry-forward, candidate selection, and
//! harness-level result assembly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use lexmt_eval::{Harness, MetricEngine};
use lexmt_llm::provider::Provider;
use lexmt_llm::types::{ChatRequest, ChatResponse, Choice};
use lexmt_llm::{ChatClient, ChatMessage, HashEmbedder, ProviderError};
use lexmt_pipeline::{Orchestrator, PipelineOutcome};
use lexmt_retrieval::{Termbase, TmIndex};
use lexmt_types::config::{
    Metric, ProviderSettings, SelectionConfig, TermbaseSettings, TmSettings,
};
use lexmt_types::{
    AblationConfig, LangPair, LayerArtifacts, LayerKind, RunConfig, Segment, TermEntry,
};

struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        })
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let reply = self
            .replies
            .lock()
            .expect("script lock")
            .pop_front()
            .ok_or_else(|| ProviderError::RequestFailed("script exhausted".into()))?;
        Ok(ChatResponse {
            id: "scripted".into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(reply),
                finish_reason: Some("stop".into()),
            }],
            usage: None,
            model: "scripted-model".into(),
        })
    }
}

fn segment() -> Segment {
    Segment::new("s1", "劳动者享有平等就业的权利。", LangPair::zh_en())
        .with_reference("Workers shall have the right to equal employment.")
}

async fn stores() -> (Arc<Termbase>, Arc<TmIndex>) {
    let embedder = Arc::new(HashEmbedder::new(256));
    let termbase = Termbase::new(TermbaseSettings::default(), embedder.clone());
    termbase
        .ingest(vec![TermEntry::new("劳动者", "workers", LangPair::zh_en())])
        .await
        .expect("seed termbase");

    let tm = TmIndex::new(TmSettings::default(), embedder);
    tm.insert(
        "劳动者享有平等就业的权利。",
        "Workers shall have the right to equal employment.",
        LangPair::zh_en(),
    )
    .await
    .expect("seed tm");

    (Arc::new(termbase), Arc::new(tm))
}

fn orchestrator(provider: Arc<ScriptedProvider>, stores: (Arc<Termbase>, Arc<TmIndex>)) -> Orchestrator {
    let config = Arc::new(RunConfig::default());
    let client = ChatClient::new(provider, &ProviderSettings::default(), 8);
    Orchestrator::new(client, Some(stores.0), Some(stores.1), config)
}

const R1_EXTRACT: &str = r#"{"terms": [{"term": "劳动者", "importance": 0.9}]}"#;
const R1_EVAL: &str = r#"{"accuracy": 0.7, "consistency": 0.7, "completeness": 0.7, "overall": 0.7, "issues": []}"#;
const R1_TRANSLATE: &str = r#"{"translation": "Workers enjoy the right of equal employment."}"#;
const R2_EXTRACT: &str = r#"{"patterns": [{"src_pattern": "享有", "tgt_pattern": "shall have", "category": "modal", "confidence": 0.9}]}"#;
const R2_EVAL: &str = r#"{"modal_fidelity": 0.6, "connective_consistency": 0.9, "conditional_logic_preservation": 0.9, "voice_appropriateness": 0.9, "overall": 0.7, "issues": [{"span": "enjoy", "description": "weak modal"}]}"#;
const R2_EVAL_CONFIDENT: &str = r#"{"modal_fidelity": 0.95, "connective_consistency": 0.95, "conditional_logic_preservation": 0.95, "voice_appropriateness": 0.95, "overall": 0.95, "issues": []}"#;
const R2_TRANSLATE: &str = r#"{"translation": "Workers shall have the right of equal employment.", "overrides": []}"#;
const R3_EVAL: &str = r#"{"term_consistency": 0.9, "syntactic_alignment": 0.9, "style_alignment": 0.6, "overall": 0.7, "divergences": [{"axis": "style_alignment", "current": "right of", "expected": "right to"}]}"#;
const R3_TRANSLATE: &str = r#"{"translation": "Workers shall have the right to equal employment."}"#;

/// Full pipeline, no selection, no gating: three ordered non-gated layer
/// outputs, a populated term table, and retrieved TM references.
#[tokio::test]
async fn full_pipeline_produces_complete_trace() {
    let provider = ScriptedProvider::new(&[
        R1_EXTRACT, R1_EVAL, R1_TRANSLATE, R2_EXTRACT, R2_EVAL, R2_TRANSLATE, R3_EVAL,
        R3_TRANSLATE,
    ]);
    let orch = orchestrator(provider, stores().await);

    let outcome = orch.translate(&segment(), &AblationConfig::full()).await;
    let PipelineOutcome::Completed(trace) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };

    assert_eq!(trace.layers.len(), 3);
    assert!(trace.layers.iter().all(|l| !l.gated));
    assert!(trace.layers.iter().all(|l| !l.translation.is_empty()));
    trace.check_invariants(&segment().source).expect("invariants");

    let LayerArtifacts::Terminology { term_table, .. } =
        &trace.layer(LayerKind::Terminology).unwrap().artifacts
    else {
        panic!("expected terminology artifacts");
    };
    assert!(!term_table.is_empty(), "termbase lookup must populate the table");
    assert_eq!(term_table.best_target("劳动者"), Some("workers"));

    let LayerArtifacts::Discourse { references, .. } =
        &trace.layer(LayerKind::Discourse).unwrap().artifacts
    else {
        panic!("expected discourse artifacts");
    };
    assert!(!references.is_empty(), "seeded TM must contribute references");
}

/// Syntax gating: a confident evaluation skips the revision and carries
/// r1 forward; the final translation is still r3's.
#[tokio::test]
async fn syntax_gating_carries_forward() {
    let provider = ScriptedProvider::new(&[
        R1_EXTRACT,
        R1_EVAL,
        R1_TRANSLATE,
        R2_EXTRACT,
        R2_EVAL_CONFIDENT,
        R3_EVAL,
        R3_TRANSLATE,
    ]);
    let orch = orchestrator(provider, stores().await);

    let mut ablation = AblationConfig::full();
    ablation.gating.enabled_layers =
        SelectionConfig::Explicit([LayerKind::Syntax].into_iter().collect());

    let outcome = orch.translate(&segment(), &ablation).await;
    let PipelineOutcome::Completed(trace) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };

    let r1 = trace.layer(LayerKind::Terminology).unwrap();
    let r2 = trace.layer(LayerKind::Syntax).unwrap();
    let r3 = trace.layer(LayerKind::Discourse).unwrap();
    assert!(r2.gated);
    assert_eq!(r2.translation, r1.translation);
    assert!(!r3.gated);
    assert_eq!(trace.final_translation, r3.translation);
}

/// Candidate selection at discourse with N = 3: three recorded candidates,
/// a valid chosen index, and the translation equal to the chosen text.
#[tokio::test]
async fn discourse_candidate_selection_records_three() {
    let provider = ScriptedProvider::new(&[
        R1_EXTRACT,
        R1_EVAL,
        R1_TRANSLATE,
        R2_EXTRACT,
        R2_EVAL,
        R2_TRANSLATE,
        R3_EVAL,
        r#"{"translation": "Workers shall have the right to equal employment."}"#,
        r#"{"translation": "Workers shall enjoy the right to equal employment."}"#,
        r#"{"translation": "Workers are entitled to equal employment."}"#,
        r#"{"chosen_index": 0, "scores": [0.9, 0.7, 0.5], "rationale": "least modified, matches references"}"#,
    ]);
    let orch = orchestrator(provider, stores().await);

    let mut ablation = AblationConfig::full();
    ablation.selection_layers =
        SelectionConfig::Explicit([LayerKind::Discourse].into_iter().collect());
    ablation.num_candidates = 3;

    let outcome = orch.translate(&segment(), &ablation).await;
    let PipelineOutcome::Completed(trace) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };

    let r3 = trace.layer(LayerKind::Discourse).unwrap();
    assert_eq!(r3.candidates.len(), 3);
    let chosen = r3.chosen_index.expect("selection ran");
    assert!(chosen < 3);
    assert_eq!(r3.translation, r3.candidates[chosen].text);
}

/// Harness over baseline + terminology ablations: per-ablation reports in
/// configured order, metrics on successful samples.
#[tokio::test]
async fn harness_runs_multiple_ablations_in_order() {
    let provider = ScriptedProvider::new(&[
        // Ablation 1: baseline, one direct translation.
        r#"{"translation": "Workers shall have the right to equal employment."}"#,
        // Ablation 2: terminology only.
        R1_EXTRACT,
        R1_EVAL,
        R1_TRANSLATE,
    ]);
    let (termbase, tm) = stores().await;

    let mut config = RunConfig::default();
    config.max_concurrent = 1;
    config.metrics = [Metric::Bleu, Metric::Chrf, Metric::Deontic].into_iter().collect();
    config.ablations = vec![
        AblationConfig::baseline(),
        AblationConfig::terminology_only(),
    ];
    let config = Arc::new(config);

    let client = ChatClient::new(provider, &ProviderSettings::default(), 1);
    let orchestrator = Arc::new(Orchestrator::new(
        client,
        Some(termbase),
        Some(tm),
        config.clone(),
    ));
    let harness = Harness::new(
        orchestrator,
        config,
        Arc::new(MetricEngine::new(None, None)),
    );

    let (artifact, intermediates) = harness.run(&[segment()]).await.expect("run");
    assert!(intermediates.is_empty(), "no full config, no intermediates");
    assert_eq!(artifact.ablations.len(), 2);
    assert_eq!(artifact.ablations[0].name, "baseline");
    assert_eq!(artifact.ablations[1].name, "terminology");

    let baseline = &artifact.ablations[0].results[0];
    assert!(baseline.success);
    assert!(baseline.metrics["bleu"] > 0.0);
    assert!(baseline.metrics["chrf"] > 0.0);
    assert!(baseline.trace.as_ref().unwrap().layers.is_empty());

    let terminology = &artifact.ablations[1].results[0];
    assert!(terminology.success);
    assert_eq!(
        terminology.trace.as_ref().unwrap().layers.len(),
        1,
        "terminology-only trace has exactly the enabled layer"
    );
}
