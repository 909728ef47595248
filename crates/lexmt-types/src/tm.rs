//! Translation-memory entries and retrieval hits.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::segment::LangPair;

/// One aligned source/target pair in the translation memory.
///
/// The dense vector and lexical tokens live inside the index, not on the
/// entry: they are derived data keyed by the entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TmEntry {
    /// Source-language text. Never empty.
    pub source_text: String,

    /// Target-language text.
    pub target_text: String,

    /// Language pair.
    pub pair: LangPair,
}

impl TmEntry {
    /// Create an entry, rejecting empty source text.
    pub fn new(
        source_text: impl Into<String>,
        target_text: impl Into<String>,
        pair: LangPair,
    ) -> Result<Self> {
        let source_text = source_text.into();
        if source_text.trim().is_empty() {
            return Err(PipelineError::InputInvalid(
                "TM entry has an empty source".into(),
            ));
        }
        Ok(Self {
            source_text,
            target_text: target_text.into(),
            pair,
        })
    }

    /// Deduplication key.
    pub fn dedup_key(&self) -> (String, String) {
        (self.source_text.clone(), self.target_text.clone())
    }
}

/// One ranked result from a hybrid TM search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TmHit {
    /// The retrieved entry.
    pub entry: TmEntry,
    /// Fused hybrid score in [0, 1].
    pub score: f32,
}
