//! # lexmt-eval
//!
//! The offline and batch side of lexmt:
//!
//! - **[`preprocess`]** -- dataset-wide term extraction, deduplication,
//!   batch translation, and termbase ingestion
//! - **[`harness`]** -- bounded-concurrency execution of samples ×
//!   ablation configs, with input-order restoration and cancellation
//! - **[`metrics`]** -- BLEU, chrF++, domain heuristics, remote neural
//!   scorers, and GEMBA LLM judges
//! - **[`artifacts`]** -- the timestamped JSON documents a run produces

pub mod artifacts;
pub mod harness;
pub mod metrics;
pub mod preprocess;

pub use artifacts::{AblationReport, IntermediateArtifact, RunArtifact, write_artifacts};
pub use harness::Harness;
pub use metrics::{MetricEngine, RemoteScorer};
pub use preprocess::{PreprocessReport, Preprocessor};
