//! Per-segment results produced by the experiment harness.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::layer::PipelineTrace;

/// Terminal status of one segment within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    /// Pipeline completed and produced a final translation.
    Ok,
    /// Pipeline failed; `prediction` holds the last successful translation.
    Failed,
    /// Input was invalid; no LLM calls were made.
    Skipped,
    /// The run was cancelled while this segment was in flight.
    Cancelled,
}

/// One row of a run artifact: everything the harness knows about one
/// segment under one ablation config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentResult {
    /// Segment identifier, used to restore input order.
    pub sample_id: String,

    /// Source text.
    pub source: String,

    /// Reference translation, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Best-available prediction. For failed segments this is the last
    /// successful intermediate translation (possibly the source).
    pub prediction: String,

    /// True only for [`SegmentStatus::Ok`].
    pub success: bool,

    /// Terminal status.
    pub status: SegmentStatus,

    /// Machine-readable error kind for failed/skipped segments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Full trace, when trace saving was requested. Cancelled segments
    /// never carry a partial trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<PipelineTrace>,

    /// Per-sample metric scores, keyed by metric name. NaN means
    /// "not computable" and is serialized as null by serde_json.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

impl SegmentResult {
    /// A cancelled result: no trace, no prediction beyond the source.
    pub fn cancelled(sample_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            source: source.into(),
            reference: None,
            prediction: String::new(),
            success: false,
            status: SegmentStatus::Cancelled,
            error_kind: None,
            trace: None,
            metrics: BTreeMap::new(),
        }
    }
}
