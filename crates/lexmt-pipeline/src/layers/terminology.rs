//! Layer 1: terminology.
//!
//! MonoExtract → TermLookup → Evaluate → Translate. The term table built
//! here travels with the trace; higher layers treat its database-backed
//! rows as settled term choices.
//!
//! Failure semantics: extraction failure degrades to an empty table,
//! evaluation failure forces re-translation with score 0, and only a
//! translation failure fails the layer.

use serde::Deserialize;
use tracing::{debug, warn};

use lexmt_llm::{CallOptions, ChatClient};
use lexmt_retrieval::Termbase;
use lexmt_types::config::RunConfig;
use lexmt_types::{
    AblationConfig, LayerArtifacts, LayerKind, LayerOutput, Result, Segment, TermChoice, TermRow,
    TermTable,
};

use crate::agent::{clamp_score, roster, run_agent};
use crate::layers::{layer_failure, selection_enabled, should_gate, stage_goal};
use crate::prompts;
use crate::selector::translate_with_selection;

#[derive(Debug, Deserialize)]
struct ExtractReply {
    #[serde(default)]
    terms: Vec<ExtractedTerm>,
}

#[derive(Debug, Deserialize)]
struct ExtractedTerm {
    term: String,
    #[serde(default)]
    #[allow(dead_code)]
    span: Option<(usize, usize)>,
    #[serde(default = "default_importance")]
    importance: f32,
}

fn default_importance() -> f32 {
    0.5
}

#[derive(Debug, Deserialize)]
struct EvaluateReply {
    #[serde(default)]
    accuracy: f32,
    #[serde(default)]
    consistency: f32,
    #[serde(default)]
    completeness: f32,
    #[serde(default)]
    overall: f32,
    #[serde(default)]
    issues: Vec<String>,
}

/// Run the terminology layer on a segment.
///
/// `incoming` is the translation that carries forward if the layer gates;
/// the orchestrator supplies the base-LLM translation of the source when
/// gating is enabled for this layer.
pub async fn run(
    client: &ChatClient,
    termbase: Option<&Termbase>,
    config: &RunConfig,
    ablation: &AblationConfig,
    segment: &Segment,
    incoming: Option<&str>,
) -> Result<LayerOutput> {
    const LAYER: LayerKind = LayerKind::Terminology;

    // Step 1: extract. Failure degrades to an empty table.
    let extracted = match run_agent::<ExtractReply>(
        client,
        &roster::MONO_EXTRACT,
        prompts::mono_extract(segment),
        CallOptions::default(),
    )
    .await
    {
        Ok(reply) => reply.terms,
        Err(e) => {
            warn!(segment = %segment.id, error = %e, "term extraction failed, using empty table");
            Vec::new()
        }
    };

    // Step 2: look each extracted term up in the termbase.
    let table = build_term_table(termbase, config, ablation, segment, extracted).await;

    // Step 3: evaluate. Failure forces re-translation.
    let evaluation = match run_agent::<EvaluateReply>(
        client,
        &roster::TERM_EVALUATE,
        prompts::term_evaluate(segment, &table),
        CallOptions::default(),
    )
    .await
    {
        Ok(mut reply) => {
            reply.accuracy = clamp_score(reply.accuracy);
            reply.consistency = clamp_score(reply.consistency);
            reply.completeness = clamp_score(reply.completeness);
            reply.overall = clamp_score(reply.overall);
            reply
        }
        Err(e) => {
            warn!(segment = %segment.id, error = %e, "term evaluation failed, forcing re-translation");
            EvaluateReply {
                accuracy: 0.0,
                consistency: 0.0,
                completeness: 0.0,
                overall: 0.0,
                issues: Vec::new(),
            }
        }
    };
    debug!(
        segment = %segment.id,
        accuracy = evaluation.accuracy,
        consistency = evaluation.consistency,
        completeness = evaluation.completeness,
        overall = evaluation.overall,
        "terminology evaluation"
    );

    if should_gate(ablation, LAYER, evaluation.overall) {
        let carried = incoming.unwrap_or(segment.source.as_str());
        return Ok(LayerOutput {
            layer: LAYER,
            translation: carried.to_string(),
            confidence: evaluation.overall,
            gated: true,
            gated_reason: Some("score_above_threshold".into()),
            artifacts: LayerArtifacts::Terminology {
                term_table: table,
                issues: evaluation.issues,
            },
            candidates: Vec::new(),
            chosen_index: None,
        });
    }

    // Step 4: constrained translation. Failure fails the layer.
    let selected = translate_with_selection(
        client,
        &roster::TERM_TRANSLATE,
        || prompts::term_translate(segment, &table, &evaluation.issues),
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
        artifacts: LayerArtifacts::Terminology {
            term_table: table,
            issues: evaluation.issues,
        },
        candidates: selected.candidates,
        chosen_index: selected.chosen_index,
    })
}

/// Build the term table: one row per distinct extracted term, with ranked
/// database evidence where the termbase has any.
async fn build_term_table(
    termbase: Option<&Termbase>,
    config: &RunConfig,
    ablation: &AblationConfig,
    segment: &Segment,
    extracted: Vec<ExtractedTerm>,
) -> TermTable {
    let mut rows: Vec<TermRow> = Vec::new();

    for term in extracted {
        let text = term.term.trim();
        if text.is_empty() || rows.iter().any(|r| r.source_term == text) {
            continue;
        }

        let mut targets = Vec::new();
        if ablation.use_termbase
            && let Some(tb) = termbase
        {
            match tb
                .lookup(text, segment.pair, config.termbase.lookup_k)
                .await
            {
                Ok(hits) => {
                    targets = hits
                        .into_iter()
                        .map(|hit| TermChoice {
                            target: hit.entry.target_form,
                            score: hit.score,
                            origin: hit.origin,
                        })
                        .collect();
                }
                Err(e) => {
                    warn!(term = text, error = %e, "termbase lookup failed, marking needs-translation");
                }
            }
        }

        rows.push(TermRow {
            source_term: text.to_string(),
            importance: clamp_score(term.importance),
            needs_translation: targets.is_empty(),
            targets,
        });
    }

    TermTable { rows }
}
