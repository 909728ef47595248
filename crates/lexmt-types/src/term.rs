//! Termbase entries, lookup hits, and per-segment term tables.

use serde::{Deserialize, Serialize};

use crate::segment::LangPair;

/// Maximum example contexts retained per term entry.
pub const MAX_CONTEXTS: usize = 2;

/// A single source-term → target-term mapping in the termbase.
///
/// Uniqueness is on `(source_form, target_form, pair)`. A second translation
/// for the same source form is stored as an alternative entry, never as a
/// replacement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TermEntry {
    /// Source-language form as extracted.
    pub source_form: String,

    /// Target-language translation.
    pub target_form: String,

    /// Language pair this mapping belongs to.
    pub pair: LangPair,

    /// Short definition, when the extractor produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    /// Domain tag (e.g. "labor-law", "contract").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Extraction/translation confidence in [0, 1].
    #[serde(default = "default_confidence")]
    pub confidence: f32,

    /// How many times this mapping has been observed. At least 1.
    #[serde(default = "default_occurrences")]
    pub occurrences: u32,

    /// Up to [`MAX_CONTEXTS`] example source sentences containing the term.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<String>,
}

fn default_confidence() -> f32 {
    1.0
}

fn default_occurrences() -> u32 {
    1
}

impl TermEntry {
    /// Create an entry with defaults (confidence 1.0, one occurrence).
    pub fn new(
        source_form: impl Into<String>,
        target_form: impl Into<String>,
        pair: LangPair,
    ) -> Self {
        Self {
            source_form: source_form.into(),
            target_form: target_form.into(),
            pair,
            definition: None,
            domain: None,
            confidence: 1.0,
            occurrences: 1,
            contexts: Vec::new(),
        }
    }

    /// Builder-style confidence setter.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Builder-style context setter (truncated to the cap).
    pub fn with_contexts(mut self, contexts: Vec<String>) -> Self {
        self.contexts = contexts;
        self.contexts.truncate(MAX_CONTEXTS);
        self
    }
}

/// Where a candidate target form came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchOrigin {
    /// Exact match on the normalized source form.
    #[serde(rename = "db-exact")]
    DbExact,
    /// Fuzzy character-similarity match above the fuzzy threshold.
    #[serde(rename = "db-fuzzy")]
    DbFuzzy,
    /// Dense-vector cosine match above the vector threshold.
    #[serde(rename = "db-vector")]
    DbVector,
    /// Freshly produced by the model, no database evidence.
    #[serde(rename = "llm")]
    Llm,
}

impl MatchOrigin {
    /// Rank used for tie-breaking: exact beats fuzzy beats vector beats llm.
    pub fn rank(&self) -> u8 {
        match self {
            MatchOrigin::DbExact => 0,
            MatchOrigin::DbFuzzy => 1,
            MatchOrigin::DbVector => 2,
            MatchOrigin::Llm => 3,
        }
    }
}

/// One ranked result from a termbase lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermHit {
    /// The matched entry.
    pub entry: TermEntry,
    /// Similarity in [0, 1]. Exact matches score 1.0.
    pub score: f32,
    /// Which pass produced the hit.
    pub origin: MatchOrigin,
}

impl TermHit {
    /// Ordering key implementing the lookup contract: origin pass first,
    /// then score, then confidence, then occurrence count.
    pub fn sort_key(&self) -> (u8, ordered_desc::F32Desc, ordered_desc::F32Desc, std::cmp::Reverse<u32>) {
        (
            self.origin.rank(),
            ordered_desc::F32Desc(self.score),
            ordered_desc::F32Desc(self.entry.confidence),
            std::cmp::Reverse(self.entry.occurrences),
        )
    }
}

/// Descending-order f32 wrapper for sort keys. NaN sorts last.
pub mod ordered_desc {
    /// See module docs.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct F32Desc(pub f32);

    impl Eq for F32Desc {}

    impl PartialOrd for F32Desc {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for F32Desc {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            other
                .0
                .partial_cmp(&self.0)
                .unwrap_or(std::cmp::Ordering::Equal)
        }
    }
}

/// One candidate target form for a source term, with provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TermChoice {
    /// The target form.
    pub target: String,
    /// Similarity / confidence in [0, 1].
    pub score: f32,
    /// Where the choice came from.
    pub origin: MatchOrigin,
}

/// One row of a [`TermTable`]: a source term and its candidate target forms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TermRow {
    /// The extracted source term.
    pub source_term: String,

    /// Extraction importance in [0, 1].
    pub importance: f32,

    /// Candidate target forms, best first. May be empty.
    #[serde(default)]
    pub targets: Vec<TermChoice>,

    /// True when no database evidence exists and the term still needs a
    /// translation.
    #[serde(default)]
    pub needs_translation: bool,
}

/// Per-segment mapping from source terms to constrained target forms.
///
/// The table conditions the terminology translate agent, and the constrained
/// forms are checked by evaluators in higher layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TermTable {
    /// Table rows, one per extracted source term.
    pub rows: Vec<TermRow>,
}

impl TermTable {
    /// An empty table (the terminology layer degrades to this when
    /// extraction fails).
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no row carries any constraint.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows that have at least one database-backed target form.
    pub fn constrained_rows(&self) -> impl Iterator<Item = &TermRow> {
        self.rows.iter().filter(|r| {
            r.targets
                .iter()
                .any(|t| t.origin != MatchOrigin::Llm)
        })
    }

    /// The best target form for a source term, if the table constrains it.
    pub fn best_target(&self, source_term: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.source_term == source_term)?
            .targets
            .first()
            .map(|t| t.target.as_str())
    }
}
