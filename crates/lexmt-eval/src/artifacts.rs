//! Run artifacts: the JSON documents a run leaves behind.
//!
//! One primary document per run ({config, per-ablation records, aggregates})
//! plus, when intermediate saving is on, two supplementary documents with
//! the first-layer and first-two-layer predictions extracted from the full
//! config's traces.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lexmt_types::{Result, RunConfig, SegmentResult};

/// Results and aggregates for one ablation.
#[derive(Debug, Serialize, Deserialize)]
pub struct AblationReport {
    /// The ablation's name.
    pub name: String,
    /// Per-sample records, in dataset order.
    pub results: Vec<SegmentResult>,
    /// System-level metric aggregates.
    pub aggregate: BTreeMap<String, f64>,
}

/// The primary run document.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunArtifact {
    /// Unique id for this run.
    pub run_id: String,
    /// Wall-clock start of the run.
    pub created_at: DateTime<Utc>,
    /// The full configuration the run executed under.
    pub config: RunConfig,
    /// One report per ablation, in configured order.
    pub ablations: Vec<AblationReport>,
}

/// A supplementary document of intermediate-layer predictions synthesized
/// from the full config's traces without re-running the pipeline.
#[derive(Debug, Serialize, Deserialize)]
pub struct IntermediateArtifact {
    /// The run this was extracted from.
    pub run_id: String,
    /// The ablation the traces came from.
    pub derived_from: String,
    /// Which prefix of the pipeline this represents
    /// ("terminology_only" or "terminology_syntax").
    pub layer_set: String,
    /// Per-sample records with the intermediate predictions.
    pub results: Vec<SegmentResult>,
    /// Aggregates over the intermediate predictions.
    pub aggregate: BTreeMap<String, f64>,
}

/// Write the run document and any supplementary documents under
/// `output_dir`, timestamped. Returns the written paths, primary first.
pub fn write_artifacts(
    artifact: &RunArtifact,
    intermediates: &[IntermediateArtifact],
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let stamp = artifact.created_at.format("%Y%m%d-%H%M%S");

    let mut written = Vec::with_capacity(1 + intermediates.len());

    let primary = output_dir.join(format!("run-{stamp}-{}.json", artifact.run_id));
    std::fs::write(&primary, serde_json::to_vec_pretty(artifact)?)?;
    written.push(primary);

    for intermediate in intermediates {
        let path = output_dir.join(format!(
            "run-{stamp}-{}-{}.json",
            intermediate.run_id, intermediate.layer_set
        ));
        std::fs::write(&path, serde_json::to_vec_pretty(intermediate)?)?;
        written.push(path);
    }

    Ok(written)
}
