//! Layer 2: syntax.
//!
//! BiExtract → SyntaxEvaluate → SyntaxTranslate over the prior
//! translation. Term choices fixed by the terminology layer's table stay
//! untouched unless the re-translator justifies a change in its
//! `overrides` field.

use serde::Deserialize;
use tracing::{debug, warn};

use lexmt_llm::{CallOptions, ChatClient};
use lexmt_types::config::RunConfig;
use lexmt_types::{
    AblationConfig, LayerArtifacts, LayerKind, LayerOutput, Result, Segment, SyntaxIssue,
    SyntaxPattern, TermTable,
};

use crate::agent::{clamp_score, roster, run_agent};
use crate::layers::{layer_failure, selection_enabled, should_gate, stage_goal};
use crate::prompts;
use crate::selector::translate_with_selection;

#[derive(Debug, Deserialize)]
struct ExtractReply {
    #[serde(default)]
    patterns: Vec<SyntaxPattern>,
}

#[derive(Debug, Deserialize)]
struct EvaluateReply {
    #[serde(default)]
    modal_fidelity: f32,
    #[serde(default)]
    connective_consistency: f32,
    #[serde(default)]
    conditional_logic_preservation: f32,
    #[serde(default)]
    voice_appropriateness: f32,
    #[serde(default)]
    overall: f32,
    #[serde(default)]
    issues: Vec<SyntaxIssue>,
}

/// Run the syntax layer on (source, prior translation).
///
/// `term_table` is the terminology layer's table (empty when that layer
/// did not run); its database-backed rows become the settled terms the
/// re-translator must keep.
pub async fn run(
    client: &ChatClient,
    config: &RunConfig,
    ablation: &AblationConfig,
    segment: &Segment,
    prior: &str,
    term_table: &TermTable,
) -> Result<LayerOutput> {
    const LAYER: LayerKind = LayerKind::Syntax;

    // Step 1: bilingual pattern extraction. Failure degrades to an empty
    // pattern list.
    let patterns = match run_agent::<ExtractReply>(
        client,
        &roster::BI_EXTRACT,
        prompts::bi_extract(&segment.source, prior, segment.pair),
        CallOptions::default(),
    )
    .await
    {
        Ok(reply) => reply
            .patterns
            .into_iter()
            .map(|mut p| {
                p.confidence = clamp_score(p.confidence);
                p
            })
            .collect(),
        Err(e) => {
            warn!(segment = %segment.id, error = %e, "pattern extraction failed, continuing without patterns");
            Vec::new()
        }
    };

    // Step 2: fidelity evaluation. Failure forces re-translation.
    let evaluation = match run_agent::<EvaluateReply>(
        client,
        &roster::SYNTAX_EVALUATE,
        prompts::syntax_evaluate(&segment.source, prior, &patterns, segment.pair),
        CallOptions::default(),
    )
    .await
    {
        Ok(mut reply) => {
            reply.overall = clamp_score(reply.overall);
            reply
        }
        Err(e) => {
            warn!(segment = %segment.id, error = %e, "syntax evaluation failed, forcing re-translation");
            EvaluateReply {
                modal_fidelity: 0.0,
                connective_consistency: 0.0,
                conditional_logic_preservation: 0.0,
                voice_appropriateness: 0.0,
                overall: 0.0,
                issues: Vec::new(),
            }
        }
    };
    debug!(
        segment = %segment.id,
        modal = evaluation.modal_fidelity,
        connective = evaluation.connective_consistency,
        conditional = evaluation.conditional_logic_preservation,
        voice = evaluation.voice_appropriateness,
        overall = evaluation.overall,
        "syntax evaluation"
    );

    if should_gate(ablation, LAYER, evaluation.overall) {
        return Ok(LayerOutput {
            layer: LAYER,
            translation: prior.to_string(),
            confidence: evaluation.overall,
            gated: true,
            gated_reason: Some("score_above_threshold".into()),
            artifacts: LayerArtifacts::Syntax {
                patterns,
                issues: evaluation.issues,
                overrides: Vec::new(),
            },
            candidates: Vec::new(),
            chosen_index: None,
        });
    }

    // Step 3: targeted revision. Failure fails the layer.
    let constrained: Vec<(String, String)> = term_table
        .constrained_rows()
        .filter_map(|row| {
            row.targets
                .first()
                .map(|t| (row.source_term.clone(), t.target.clone()))
        })
        .collect();

    let selected = translate_with_selection(
        client,
        &roster::SYNTAX_TRANSLATE,
        || prompts::syntax_translate(&segment.source, prior, &evaluation.issues, &constrained),
        selection_enabled(ablation, LAYER),
        ablation.num_candidates,
        config.provider.candidate_temperature,
        stage_goal(LAYER),
        &segment.source,
        segment.pair,
    )
    .await
    .map_err(|e| layer_failure(LAYER, e))?;

    Ok(LayerOutput {
        layer: LAYER,
        translation: selected.translation,
        confidence: evaluation.overall,
        gated: false,
        gated_reason: None,
        artifacts: LayerArtifacts::Syntax {
            patterns,
            issues: evaluation.issues,
            overrides: selected.overrides,
        },
        candidates: selected.candidates,
        chosen_index: selected.chosen_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scripted_client;
    use lexmt_types::config::{SelectionConfig, SymbolicLayers};
    use lexmt_types::{LangPair, PatternCategory};

    fn segment() -> Segment {
        Segment::new("s1", "用人单位应当按时支付工资。", LangPair::zh_en())
    }

    const PRIOR: &str = "The employer should pay wages on time.";
    const EXTRACT_OK: &str = r#"{"patterns": [
        {"src_pattern": "应当", "tgt_pattern": "shall", "category": "modal", "confidence": 0.95}
    ]}"#;
    const EVAL_LOW: &str = r#"{
        "modal_fidelity": 0.4, "connective_consistency": 0.9,
        "conditional_logic_preservation": 0.9, "voice_appropriateness": 0.8,
        "overall": 0.6,
        "issues": [{"span": "should pay", "description": "deontic 应当 rendered as should instead of shall", "dimension": "modal_fidelity"}]
    }"#;
    const EVAL_HIGH: &str = r#"{
        "modal_fidelity": 0.99, "connective_consistency": 0.99,
        "conditional_logic_preservation": 0.99, "voice_appropriateness": 0.99,
        "overall": 0.98, "issues": []
    }"#;
    const REVISE_OK: &str =
        r#"{"translation": "The employer shall pay wages on time.", "overrides": []}"#;

    #[tokio::test]
    async fn revision_targets_reported_issues() {
        let client = scripted_client(&[EXTRACT_OK, EVAL_LOW, REVISE_OK]);
        let output = run(
            &client,
            &RunConfig::default(),
            &AblationConfig::full(),
            &segment(),
            PRIOR,
            &TermTable::empty(),
        )
        .await
        .unwrap();

        assert_eq!(output.layer, LayerKind::Syntax);
        assert!(!output.gated);
        assert_eq!(output.translation, "The employer shall pay wages on time.");

        let LayerArtifacts::Syntax { patterns, issues, overrides } = &output.artifacts else {
            panic!("expected syntax artifacts");
        };
        assert_eq!(patterns[0].category, PatternCategory::Modal);
        assert_eq!(issues.len(), 1);
        assert!(overrides.is_empty());
    }

    #[tokio::test]
    async fn gating_keeps_prior_translation() {
        let client = scripted_client(&[EXTRACT_OK, EVAL_HIGH]);
        let mut ablation = AblationConfig::full();
        ablation.gating.enabled_layers =
            SelectionConfig::Explicit([LayerKind::Syntax].into_iter().collect());

        let output = run(
            &client,
            &RunConfig::default(),
            &ablation,
            &segment(),
            PRIOR,
            &TermTable::empty(),
        )
        .await
        .unwrap();

        assert!(output.gated);
        assert_eq!(output.translation, PRIOR);
    }

    #[tokio::test]
    async fn near_threshold_score_still_revises() {
        // 0.98 overall with a 0.99 threshold: not gated.
        let client = scripted_client(&[EXTRACT_OK, EVAL_HIGH, REVISE_OK]);
        let mut ablation = AblationConfig::full();
        ablation.gating.enabled_layers =
            SelectionConfig::Explicit([LayerKind::Syntax].into_iter().collect());
        ablation.gating.thresholds.insert(LayerKind::Syntax, 0.99);

        let output = run(
            &client,
            &RunConfig::default(),
            &ablation,
            &segment(),
            PRIOR,
            &TermTable::empty(),
        )
        .await
        .unwrap();
        assert!(!output.gated);
    }

    #[tokio::test]
    async fn extraction_failure_continues_without_patterns() {
        let client = scripted_client(&["nope", "still nope", EVAL_LOW, REVISE_OK]);
        let output = run(
            &client,
            &RunConfig::default(),
            &AblationConfig::full(),
            &segment(),
            PRIOR,
            &TermTable::empty(),
        )
        .await
        .unwrap();

        let LayerArtifacts::Syntax { patterns, .. } = &output.artifacts else {
            panic!("expected syntax artifacts");
        };
        assert!(patterns.is_empty());
        assert!(!output.translation.is_empty());
    }

    #[tokio::test]
    async fn overrides_recorded_when_model_justifies_a_term_change() {
        let revise = r#"{"translation": "The employing unit shall pay wages on time.",
                         "overrides": ["'employer' changed to 'employing unit' to satisfy modal scope"]}"#;
        let client = scripted_client(&[EXTRACT_OK, EVAL_LOW, revise]);
        let output = run(
            &client,
            &RunConfig::default(),
            &AblationConfig::full(),
            &segment(),
            PRIOR,
            &TermTable::empty(),
        )
        .await
        .unwrap();

        let LayerArtifacts::Syntax { overrides, .. } = &output.artifacts else {
            panic!("expected syntax artifacts");
        };
        assert_eq!(overrides.len(), 1);
    }
}
