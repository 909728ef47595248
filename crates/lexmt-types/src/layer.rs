//! Per-layer outputs, artifacts, and the pipeline trace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::term::TermTable;
use crate::tm::TmHit;

/// The three refinement layers, in their fixed pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Layer 1: terminology extraction, lookup, and constrained translation.
    Terminology,
    /// Layer 2: bilingual syntactic pattern revision.
    Syntax,
    /// Layer 3: TM-grounded discourse and style alignment.
    Discourse,
}

impl LayerKind {
    /// All layers in pipeline order.
    pub const ALL: [LayerKind; 3] = [LayerKind::Terminology, LayerKind::Syntax, LayerKind::Discourse];

    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Terminology => "terminology",
            LayerKind::Syntax => "syntax",
            LayerKind::Discourse => "discourse",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed category set for bilingual syntactic patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternCategory {
    /// Deontic modals: shall / must / may / should.
    Modal,
    /// Discourse connectives.
    Connective,
    /// Conditional frames: where / if / when.
    Conditional,
    /// Active vs. passive voice choice.
    Voice,
    /// Nominalization of verbal expressions.
    Nominalization,
    /// Anything that does not fit the categories above.
    Other,
}

impl Default for PatternCategory {
    fn default() -> Self {
        PatternCategory::Other
    }
}

/// A bilingual syntactic template pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyntaxPattern {
    /// Source-side template.
    pub src_pattern: String,
    /// Expected target-side template.
    pub tgt_pattern: String,
    /// Category tag.
    #[serde(default)]
    pub category: PatternCategory,
    /// Extraction confidence in [0, 1].
    pub confidence: f32,
}

/// A span-anchored issue reported by the syntax evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyntaxIssue {
    /// The offending span in the current translation.
    pub span: String,
    /// What is wrong with it.
    pub description: String,
    /// Which dimension flagged it (e.g. "modal_fidelity").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
}

/// One concrete divergence between the current translation and a TM
/// reference, reported by the discourse evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Divergence {
    /// Axis of comparison: "term_consistency", "syntactic_alignment", or
    /// "style_alignment".
    pub axis: String,
    /// The current rendering.
    pub current: String,
    /// The reference rendering it diverges from.
    pub expected: String,
}

/// Component-specific evidence attached to a layer's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayerArtifacts {
    /// Terminology layer evidence.
    Terminology {
        /// The per-segment term table.
        term_table: TermTable,
        /// Issues raised by the terminology evaluator.
        issues: Vec<String>,
    },
    /// Syntax layer evidence.
    Syntax {
        /// Patterns identified by the bilingual extractor.
        patterns: Vec<SyntaxPattern>,
        /// Span-anchored issues from the evaluator.
        issues: Vec<SyntaxIssue>,
        /// Term-choice overrides the re-translator justified.
        overrides: Vec<String>,
    },
    /// Discourse layer evidence.
    Discourse {
        /// TM references that survived the similarity floor.
        references: Vec<TmHit>,
        /// The divergence report driving the revision.
        divergences: Vec<Divergence>,
    },
    /// No structured evidence (baseline translation, gated layer).
    None,
}

impl Default for LayerArtifacts {
    fn default() -> Self {
        LayerArtifacts::None
    }
}

/// One generated candidate translation inside a layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// The candidate text.
    pub text: String,
    /// Position in generation order (0-based).
    pub rank: usize,
    /// The selector's reasoning for/about this candidate, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// The outcome of running one refinement layer on one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerOutput {
    /// Which layer produced this output.
    pub layer: LayerKind,

    /// The translation this layer settled on. When `gated`, byte-identical
    /// to the incoming translation.
    pub translation: String,

    /// The layer evaluator's overall score in [0, 1].
    pub confidence: f32,

    /// True when the layer skipped its revision step.
    pub gated: bool,

    /// Why the layer gated (e.g. "score_above_threshold", "no_references").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gated_reason: Option<String>,

    /// Component-specific evidence.
    #[serde(default)]
    pub artifacts: LayerArtifacts,

    /// Candidates generated when selection ran for this layer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,

    /// Index of the selected candidate, when selection ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_index: Option<usize>,
}

impl LayerOutput {
    /// A gated output: carries the incoming translation forward unchanged.
    pub fn gated(layer: LayerKind, incoming: impl Into<String>, confidence: f32, reason: impl Into<String>) -> Self {
        Self {
            layer,
            translation: incoming.into(),
            confidence,
            gated: true,
            gated_reason: Some(reason.into()),
            artifacts: LayerArtifacts::None,
            candidates: Vec::new(),
            chosen_index: None,
        }
    }
}

/// Ordered record of per-layer outputs for one segment.
///
/// Immutable once emitted; the reproducible audit artifact of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTrace {
    /// The segment this trace belongs to.
    pub segment_id: String,

    /// Layer outputs in pipeline order, one per enabled layer.
    pub layers: Vec<LayerOutput>,

    /// The translation selected at the end of the pipeline.
    pub final_translation: String,
}

impl PipelineTrace {
    /// The output of a specific layer, if that layer ran.
    pub fn layer(&self, kind: LayerKind) -> Option<&LayerOutput> {
        self.layers.iter().find(|l| l.layer == kind)
    }

    /// Check the structural invariants the spec demands of every trace:
    /// layers are strictly ordered, and a gated layer's translation equals
    /// its incoming translation byte-for-byte.
    pub fn check_invariants(&self, source: &str) -> Result<(), String> {
        let mut prev_order: Option<LayerKind> = None;
        let mut incoming = source.to_string();
        for out in &self.layers {
            if let Some(prev) = prev_order
                && out.layer <= prev
            {
                return Err(format!(
                    "layer {} appears after {} in trace {}",
                    out.layer, prev, self.segment_id
                ));
            }
            if out.gated && out.layer != LayerKind::Terminology && out.translation != incoming {
                return Err(format!(
                    "gated {} layer changed the translation in trace {}",
                    out.layer, self.segment_id
                ));
            }
            if let Some(idx) = out.chosen_index {
                match out.candidates.get(idx) {
                    Some(c) if c.text == out.translation => {}
                    Some(_) => {
                        return Err(format!(
                            "{} layer translation does not match chosen candidate in trace {}",
                            out.layer, self.segment_id
                        ));
                    }
                    None => {
                        return Err(format!(
                            "{} layer chosen_index {} out of bounds in trace {}",
                            out.layer, idx, self.segment_id
                        ));
                    }
                }
            }
            prev_order = Some(out.layer);
            incoming = out.translation.clone();
        }
        Ok(())
    }
}
