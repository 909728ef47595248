//! # lexmt-types
//!
//! Core type definitions for the lexmt legal translation pipeline.
//!
//! This crate is the foundation of the dependency graph -- all other
//! lexmt crates depend on it. It contains:
//!
//! - **[`error`]** -- [`PipelineError`] error taxonomy
//! - **[`segment`]** -- Languages, language pairs, and source segments
//! - **[`term`]** -- Termbase entries, lookup hits, and per-segment term tables
//! - **[`tm`]** -- Translation-memory entries and retrieval hits
//! - **[`layer`]** -- Per-layer outputs, artifacts, and the pipeline trace
//! - **[`record`]** -- Per-segment results produced by the experiment harness
//! - **[`config`]** -- The process-wide run configuration and ablation configs

pub mod config;
pub mod error;
pub mod layer;
pub mod record;
pub mod segment;
pub mod term;
pub mod tm;

pub use config::{AblationConfig, GatingConfig, RunConfig, SelectionConfig};
pub use error::{PipelineError, Result};
pub use layer::{
    Candidate, Divergence, LayerArtifacts, LayerKind, LayerOutput, PatternCategory, PipelineTrace,
    SyntaxIssue, SyntaxPattern,
};
pub use record::{SegmentResult, SegmentStatus};
pub use segment::{Lang, LangPair, Segment};
pub use term::{MatchOrigin, TermChoice, TermEntry, TermHit, TermRow, TermTable};
pub use tm::{TmEntry, TmHit};
