//! Layer 3: discourse.
//!
//! DiscourseQuery → DiscourseEvaluate → DiscourseTranslate. The layer is
//! deliberately conservative: references below the similarity floor are
//! discarded even if that leaves none (the stage then becomes a no-op),
//! and the re-translator may only touch items the divergence report
//! concretely lists.

use serde::Deserialize;
use tracing::{debug, warn};

use lexmt_llm::{CallOptions, ChatClient};
use lexmt_retrieval::TmIndex;
use lexmt_types::config::RunConfig;
use lexmt_types::{
    AblationConfig, Divergence, LayerArtifacts, LayerKind, LayerOutput, Result, Segment, TmHit,
};

use crate::agent::{clamp_score, roster, run_agent};
use crate::layers::{layer_failure, selection_enabled, should_gate, stage_goal};
use crate::prompts;
use crate::selector::translate_with_selection;

#[derive(Debug, Deserialize)]
struct EvaluateReply {
    #[serde(default)]
    term_consistency: f32,
    #[serde(default)]
    syntactic_alignment: f32,
    #[serde(default)]
    style_alignment: f32,
    #[serde(default)]
    overall: f32,
    #[serde(default)]
    divergences: Vec<Divergence>,
}

/// Run the discourse layer on (source, prior translation).
pub async fn run(
    client: &ChatClient,
    tm: Option<&TmIndex>,
    config: &RunConfig,
    ablation: &AblationConfig,
    segment: &Segment,
    prior: &str,
) -> Result<LayerOutput> {
    const LAYER: LayerKind = LayerKind::Discourse;

    // Step 1: retrieve references. No TM, or nothing above the floor,
    // makes the whole stage a no-op.
    let references = match (ablation.tm_enabled(), tm) {
        (true, Some(index)) => {
            let floor = ablation
                .similarity_floor
                .or(config.tm.similarity_floor);
            index
                .search_with_floor(
                    &segment.source,
                    segment.pair,
                    config.tm.top_k,
                    config.tm.alpha,
                    floor,
                )
                .await
                .map_err(|e| layer_failure(LAYER, e.into()))?
                .into_iter()
                .take(config.tm.max_refs)
                .collect::<Vec<TmHit>>()
        }
        _ => Vec::new(),
    };

    if references.is_empty() {
        debug!(segment = %segment.id, "no usable TM references, discourse layer is a no-op");
        return Ok(LayerOutput {
            layer: LAYER,
            translation: prior.to_string(),
            confidence: 0.0,
            gated: true,
            gated_reason: Some("no_references".into()),
            artifacts: LayerArtifacts::Discourse {
                references: Vec::new(),
                divergences: Vec::new(),
            },
            candidates: Vec::new(),
            chosen_index: None,
        });
    }

    // Step 2: divergence analysis. Failure forces re-translation, but with
    // an empty report the conservative policy below turns that into a
    // no-op anyway.
    let evaluation = match run_agent::<EvaluateReply>(
        client,
        &roster::DISCOURSE_EVALUATE,
        prompts::discourse_evaluate(&segment.source, prior, &references),
        CallOptions::default(),
    )
    .await
    {
        Ok(mut reply) => {
            reply.overall = clamp_score(reply.overall);
            reply
        }
        Err(e) => {
            warn!(segment = %segment.id, error = %e, "discourse evaluation failed");
            EvaluateReply {
                term_consistency: 0.0,
                syntactic_alignment: 0.0,
                style_alignment: 0.0,
                overall: 0.0,
                divergences: Vec::new(),
            }
        }
    };
    debug!(
        segment = %segment.id,
        term = evaluation.term_consistency,
        syntax = evaluation.syntactic_alignment,
        style = evaluation.style_alignment,
        overall = evaluation.overall,
        divergences = evaluation.divergences.len(),
        "discourse evaluation"
    );

    if should_gate(ablation, LAYER, evaluation.overall) {
        return Ok(LayerOutput {
            layer: LAYER,
            translation: prior.to_string(),
            confidence: evaluation.overall,
            gated: true,
            gated_reason: Some("score_above_threshold".into()),
            artifacts: LayerArtifacts::Discourse {
                references,
                divergences: evaluation.divergences,
            },
            candidates: Vec::new(),
            chosen_index: None,
        });
    }

    // Nothing concrete to fix: revising anyway would invite free
    // paraphrasing, which is exactly what this layer must not do.
    if evaluation.divergences.is_empty() {
        return Ok(LayerOutput {
            layer: LAYER,
            translation: prior.to_string(),
            confidence: evaluation.overall,
            gated: true,
            gated_reason: Some("no_divergences".into()),
            artifacts: LayerArtifacts::Discourse {
                references,
                divergences: Vec::new(),
            },
            candidates: Vec::new(),
            chosen_index: None,
        });
    }

    // Step 3: conservative final revision. Failure fails the layer.
    let selected = translate_with_selection(
        client,
        &roster::DISCOURSE_TRANSLATE,
        || prompts::discourse_translate(&segment.source, prior, &evaluation.divergences),
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
        artifacts: LayerArtifacts::Discourse {
            references,
            divergences: evaluation.divergences,
        },
        candidates: selected.candidates,
        chosen_index: selected.chosen_index,
    })
}
