//! The orchestrator: a staged state machine carrying one segment through
//! the enabled refinement layers.
//!
//! States are INIT → LAYER_TERM → LAYER_SYNTAX → LAYER_DISCOURSE → DONE,
//! visiting only the layers the ablation enables, in that fixed order.
//! There are no retries across layers: a layer failure stops the segment
//! and the last successful translation travels into the outcome.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use lexmt_llm::{CallOptions, ChatClient};
use lexmt_retrieval::{Termbase, TmIndex};
use lexmt_types::config::RunConfig;
use lexmt_types::{
    AblationConfig, LayerKind, LayerOutput, PipelineError, PipelineTrace, Segment, TermTable,
};

use crate::agent::{non_empty, roster, run_agent};
use crate::layers;

/// The terminal result of pushing one segment through the pipeline.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every enabled layer completed; the trace is final and immutable.
    Completed(PipelineTrace),

    /// A layer failed. `layers` holds the outputs that completed before
    /// the failure and `last_translation` is the best translation the
    /// pipeline produced (the source if nothing got that far).
    Failed {
        /// Outputs of the layers that completed.
        layers: Vec<LayerOutput>,
        /// Last successful translation.
        last_translation: String,
        /// What went wrong.
        error: PipelineError,
    },

    /// The segment was rejected before any model call was made.
    Invalid(PipelineError),
}

#[derive(Debug, Deserialize)]
struct BaselineReply {
    translation: String,
}

/// Drives segments through the enabled layers.
///
/// Holds read-only handles to the shared retrieval stores and a clone of
/// the shared chat client; the configuration is fixed at construction and
/// never re-read mid-run.
pub struct Orchestrator {
    client: ChatClient,
    termbase: Option<Arc<Termbase>>,
    tm: Option<Arc<TmIndex>>,
    config: Arc<RunConfig>,
}

impl Orchestrator {
    /// Create an orchestrator over the shared run resources.
    pub fn new(
        client: ChatClient,
        termbase: Option<Arc<Termbase>>,
        tm: Option<Arc<TmIndex>>,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            client,
            termbase,
            tm,
            config,
        }
    }

    /// The shared chat client (used by the harness for judge metrics).
    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    /// Translate one segment under one ablation config.
    #[instrument(skip_all, fields(segment = %segment.id, ablation = %ablation.name))]
    pub async fn translate(&self, segment: &Segment, ablation: &AblationConfig) -> PipelineOutcome {
        if let Err(e) = segment.validate() {
            return PipelineOutcome::Invalid(e);
        }

        // No refinement layers: a single direct translation.
        if ablation.enabled_layers.is_empty() {
            return match self.base_translation(segment).await {
                Ok(translation) => PipelineOutcome::Completed(PipelineTrace {
                    segment_id: segment.id.clone(),
                    layers: Vec::new(),
                    final_translation: translation,
                }),
                Err(error) => PipelineOutcome::Failed {
                    layers: Vec::new(),
                    last_translation: segment.source.clone(),
                    error,
                },
            };
        }

        let mut completed: Vec<LayerOutput> = Vec::new();
        let mut current = segment.source.clone();

        for layer in LayerKind::ALL {
            if !ablation.enabled_layers.contains(&layer) {
                continue;
            }

            let result = match layer {
                LayerKind::Terminology => {
                    // When this layer can gate, its carried-forward prior
                    // is the source passed through the base translator.
                    let incoming = if ablation.resolved_gating().contains(&LayerKind::Terminology) {
                        match self.base_translation(segment).await {
                            Ok(text) => Some(text),
                            Err(error) => {
                                return PipelineOutcome::Failed {
                                    layers: completed,
                                    last_translation: current,
                                    error,
                                };
                            }
                        }
                    } else {
                        None
                    };
                    layers::terminology::run(
                        &self.client,
                        self.termbase.as_deref(),
                        &self.config,
                        ablation,
                        segment,
                        incoming.as_deref(),
                    )
                    .await
                }
                LayerKind::Syntax => {
                    let table = term_table_of(&completed);
                    layers::syntax::run(
                        &self.client,
                        &self.config,
                        ablation,
                        segment,
                        &current,
                        &table,
                    )
                    .await
                }
                LayerKind::Discourse => {
                    layers::discourse::run(
                        &self.client,
                        self.tm.as_deref(),
                        &self.config,
                        ablation,
                        segment,
                        &current,
                    )
                    .await
                }
            };

            match result {
                Ok(output) => {
                    debug!(
                        layer = %output.layer,
                        gated = output.gated,
                        confidence = output.confidence,
                        "layer completed"
                    );
                    current = output.translation.clone();
                    completed.push(output);
                }
                Err(error) => {
                    return PipelineOutcome::Failed {
                        layers: completed,
                        last_translation: current,
                        error,
                    };
                }
            }
        }

        let trace = PipelineTrace {
            segment_id: segment.id.clone(),
            layers: completed,
            final_translation: current,
        };
        debug_assert!(
            trace.check_invariants(&segment.source).is_ok(),
            "trace invariant violation: {:?}",
            trace.check_invariants(&segment.source)
        );
        PipelineOutcome::Completed(trace)
    }

    /// One direct base-LLM translation of the source.
    async fn base_translation(&self, segment: &Segment) -> Result<String, PipelineError> {
        let reply: BaselineReply = run_agent(
            &self.client,
            &roster::BASE_TRANSLATE,
            crate::prompts::base_translate(segment),
            CallOptions::default(),
        )
        .await?;
        non_empty(&roster::BASE_TRANSLATE, reply.translation)
    }
}

/// The terminology layer's table from the completed outputs, or an empty
/// table when that layer did not run.
fn term_table_of(completed: &[LayerOutput]) -> TermTable {
    completed
        .iter()
        .find_map(|output| match &output.artifacts {
            lexmt_types::LayerArtifacts::Terminology { term_table, .. } => {
                Some(term_table.clone())
            }
            _ => None,
        })
        .unwrap_or_default()
}
