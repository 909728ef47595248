//! Candidate generation and selection.
//!
//! When a layer's config asks for N ≥ 2 candidates, its translate agent is
//! invoked N times at the candidate temperature and a single judge call
//! picks the winner. Judge failure falls back to candidate 0; a single
//! candidate skips the judge entirely.

use serde::Deserialize;
use tracing::{debug, warn};

use lexmt_llm::{CallOptions, ChatClient};
use lexmt_types::{Candidate, LangPair, Result};

use crate::agent::{AgentSpec, roster, run_agent};
use crate::prompts;

/// The judge's verdict over a candidate list.
#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    chosen_index: usize,
    #[serde(default)]
    scores: Vec<f64>,
    #[serde(default)]
    rationale: Option<String>,
}

/// A plain `{"translation": "..."}` reply.
#[derive(Debug, Deserialize)]
pub(crate) struct TranslationReply {
    pub translation: String,
    #[serde(default)]
    pub overrides: Vec<String>,
}

/// What a layer records after (possibly) selecting among candidates.
#[derive(Debug)]
pub(crate) struct Selected {
    pub translation: String,
    pub candidates: Vec<Candidate>,
    pub chosen_index: Option<usize>,
    pub overrides: Vec<String>,
}

/// Generate candidates with `translate_agent` and pick one.
///
/// `selection_enabled` and `num_candidates` come from the ablation config;
/// `build_prompt` produces the (identical) user prompt for each generation
/// call. The returned `translation` always equals the chosen candidate's
/// text when candidates were recorded.
pub(crate) async fn translate_with_selection(
    client: &ChatClient,
    translate_agent: &AgentSpec,
    build_prompt: impl Fn() -> String,
    selection_enabled: bool,
    num_candidates: usize,
    candidate_temperature: f64,
    stage_goal: &str,
    source: &str,
    pair: LangPair,
) -> Result<Selected> {
    if !selection_enabled || num_candidates == 1 {
        let reply: TranslationReply =
            run_agent(client, translate_agent, build_prompt(), CallOptions::default()).await?;
        let translation = crate::agent::non_empty(translate_agent, reply.translation)?;

        // With the selector enabled but only one candidate requested, the
        // judge is skipped and the single candidate is recorded as chosen.
        if selection_enabled {
            return Ok(Selected {
                translation: translation.clone(),
                candidates: vec![Candidate {
                    text: translation,
                    rank: 0,
                    rationale: Some("single_candidate".into()),
                }],
                chosen_index: Some(0),
                overrides: reply.overrides,
            });
        }
        return Ok(Selected {
            translation,
            candidates: Vec::new(),
            chosen_index: None,
            overrides: reply.overrides,
        });
    }

    // Generate N candidates at the higher temperature.
    let mut candidates = Vec::with_capacity(num_candidates);
    let mut overrides = Vec::new();
    for rank in 0..num_candidates {
        let reply: TranslationReply = run_agent(
            client,
            translate_agent,
            build_prompt(),
            CallOptions::with_temperature(candidate_temperature),
        )
        .await?;
        let text = crate::agent::non_empty(translate_agent, reply.translation)?;
        overrides.extend(reply.overrides);
        candidates.push(Candidate {
            text,
            rank,
            rationale: None,
        });
    }

    // One judge call over all candidates.
    let chosen = match run_agent::<JudgeVerdict>(
        client,
        &roster::CANDIDATE_JUDGE,
        prompts::candidate_judge(source, &candidates, stage_goal, pair),
        CallOptions::default(),
    )
    .await
    {
        Ok(verdict) if verdict.chosen_index < candidates.len() => {
            debug!(
                chosen = verdict.chosen_index,
                scores = ?verdict.scores,
                "selector picked a candidate"
            );
            candidates[verdict.chosen_index].rationale = verdict.rationale;
            verdict.chosen_index
        }
        Ok(verdict) => {
            warn!(
                chosen = verdict.chosen_index,
                candidates = candidates.len(),
                "selector returned an out-of-range index, falling back to candidate 0"
            );
            candidates[0].rationale = Some("selector_out_of_range".into());
            0
        }
        Err(e) => {
            warn!(error = %e, "selector failed, falling back to candidate 0");
            candidates[0].rationale = Some("selector_failed".into());
            0
        }
    };

    Ok(Selected {
        translation: candidates[chosen].text.clone(),
        candidates,
        chosen_index: Some(chosen),
        overrides,
    })
}
