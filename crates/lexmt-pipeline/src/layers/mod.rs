//! The three refinement layers. Each is a three-step workflow
//! (extract → evaluate → re-translate) sharing the gating and selection
//! plumbing below.

pub mod discourse;
pub mod syntax;
pub mod terminology;

use lexmt_types::{AblationConfig, LayerKind, PipelineError};

/// Whether this layer's evaluator score gates the revision step.
///
/// Gating is strictly the configured skip: the layer must be in the
/// ablation's gating set AND the score must clear the threshold. A high
/// score with gating disabled still proceeds to re-translation.
pub(crate) fn should_gate(ablation: &AblationConfig, layer: LayerKind, overall: f32) -> bool {
    ablation.resolved_gating().contains(&layer) && overall >= ablation.gating.threshold(layer)
}

/// Whether candidate selection runs for this layer.
pub(crate) fn selection_enabled(ablation: &AblationConfig, layer: LayerKind) -> bool {
    ablation.resolved_selection().contains(&layer)
}

/// The goal line handed to the candidate judge for this layer.
pub(crate) fn stage_goal(layer: LayerKind) -> &'static str {
    match layer {
        LayerKind::Terminology => "terminologically constrained first-round translation",
        LayerKind::Syntax => "syntactic fidelity: modals, conditionals, voice, connectives",
        LayerKind::Discourse => "discourse and style alignment with corpus references",
    }
}

/// Wrap a fatal step error as this layer's failure.
pub(crate) fn layer_failure(layer: LayerKind, err: PipelineError) -> PipelineError {
    match err {
        already @ PipelineError::LayerFailure { .. } => already,
        other => PipelineError::LayerFailure {
            layer,
            message: other.to_string(),
        },
    }
}
