//! Error taxonomy for the lexmt pipeline.
//!
//! [`PipelineError`] is the top-level error type shared by every workflow
//! crate. Variants are grouped into recoverable (upstream, malformed output)
//! and fatal (config, input) categories: anything inside a segment is either
//! recovered locally or fails the whole segment, and the harness never aborts
//! a run because one segment failed.

use thiserror::Error;

use crate::layer::LayerKind;

/// Top-level error type for the lexmt pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    // ── Recoverable within a segment ─────────────────────────────────

    /// An upstream service (LLM, embedding, vector collection) stayed
    /// unavailable after local retries were exhausted.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The model returned output that could not be parsed into the
    /// requested structure, even after one repair attempt.
    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),

    /// The model returned a well-formed but empty result. Non-fatal at the
    /// agent layer; workflows decide whether a fallback exists.
    #[error("agent '{agent}' returned an empty result")]
    EmptyResult {
        /// Name of the agent whose output was empty.
        agent: String,
    },

    /// A refinement layer failed and the segment cannot continue.
    #[error("{layer} layer failed: {message}")]
    LayerFailure {
        /// Which layer failed.
        layer: LayerKind,
        /// Why it failed.
        message: String,
    },

    // ── Fatal ────────────────────────────────────────────────────────

    /// The segment input is unusable (e.g. empty source text).
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// Configuration is malformed or semantically invalid. The harness
    /// refuses to start.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// A short machine-readable kind tag, recorded in result artifacts as
    /// `error_kind` for failed segments.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::MalformedModelOutput(_) => "malformed_model_output",
            Self::EmptyResult { .. } => "empty_result",
            Self::LayerFailure { .. } => "layer_failure",
            Self::InputInvalid(_) => "input_invalid",
            Self::ConfigInvalid(_) => "config_invalid",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Whether the error fails only the current segment (as opposed to the
    /// whole run).
    pub fn is_segment_scoped(&self) -> bool {
        !matches!(self, Self::ConfigInvalid(_))
    }
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_upstream_unavailable() {
        let err = PipelineError::UpstreamUnavailable("chat endpoint down".into());
        assert_eq!(err.to_string(), "upstream unavailable: chat endpoint down");
    }

    #[test]
    fn display_layer_failure() {
        let err = PipelineError::LayerFailure {
            layer: LayerKind::Syntax,
            message: "translate agent failed".into(),
        };
        assert_eq!(err.to_string(), "syntax layer failed: translate agent failed");
    }

    #[test]
    fn display_empty_result() {
        let err = PipelineError::EmptyResult {
            agent: "mono_extract".into(),
        };
        assert_eq!(
            err.to_string(),
            "agent 'mono_extract' returned an empty result"
        );
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(
            PipelineError::UpstreamUnavailable(String::new()).kind(),
            "upstream_unavailable"
        );
        assert_eq!(
            PipelineError::MalformedModelOutput(String::new()).kind(),
            "malformed_model_output"
        );
        assert_eq!(
            PipelineError::InputInvalid(String::new()).kind(),
            "input_invalid"
        );
        assert_eq!(
            PipelineError::ConfigInvalid(String::new()).kind(),
            "config_invalid"
        );
    }

    #[test]
    fn config_errors_are_run_scoped() {
        assert!(!PipelineError::ConfigInvalid("bad".into()).is_segment_scoped());
        assert!(PipelineError::InputInvalid("empty".into()).is_segment_scoped());
        assert!(
            PipelineError::LayerFailure {
                layer: LayerKind::Terminology,
                message: "x".into()
            }
            .is_segment_scoped()
        );
    }

    #[test]
    fn json_error_converts() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PipelineError = serde_err.into();
        assert_eq!(err.kind(), "json");
    }
}
