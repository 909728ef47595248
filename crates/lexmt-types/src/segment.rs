//! Languages, language pairs, and source segments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A language supported by the pipeline.
///
/// The set is closed on purpose: prompts, tokenization, and the deontic
/// metric all carry per-language behavior, so an unknown language is a
/// configuration error rather than a silent passthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    /// Chinese (source side of the legal corpora this pipeline targets).
    Zh,
    /// English.
    En,
    /// Japanese.
    Ja,
    /// German.
    De,
    /// French.
    Fr,
}

impl Lang {
    /// Lowercase ISO-639-1 code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Zh => "zh",
            Lang::En => "en",
            Lang::Ja => "ja",
            Lang::De => "de",
            Lang::Fr => "fr",
        }
    }

    /// Human-readable English name, used in prompt rendering.
    pub fn display_name(&self) -> &'static str {
        match self {
            Lang::Zh => "Chinese",
            Lang::En => "English",
            Lang::Ja => "Japanese",
            Lang::De => "German",
            Lang::Fr => "French",
        }
    }

    /// Whether the language is written without spaces between words.
    /// Drives character-level tokenization in lexical scoring.
    pub fn is_unsegmented(&self) -> bool {
        matches!(self, Lang::Zh | Lang::Ja)
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lang {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "chinese" => Ok(Lang::Zh),
            "en" | "english" => Ok(Lang::En),
            "ja" | "japanese" => Ok(Lang::Ja),
            "de" | "german" => Ok(Lang::De),
            "fr" | "french" => Ok(Lang::Fr),
            other => Err(PipelineError::ConfigInvalid(format!(
                "unknown language '{other}'"
            ))),
        }
    }
}

/// A directed language pair, e.g. `zh-en`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LangPair {
    /// Source language.
    pub src: Lang,
    /// Target language.
    pub tgt: Lang,
}

impl LangPair {
    /// Create a pair from source and target languages.
    pub fn new(src: Lang, tgt: Lang) -> Self {
        Self { src, tgt }
    }

    /// `zh` → `en` is the pair the shipped prompts and corpora target.
    pub fn zh_en() -> Self {
        Self::new(Lang::Zh, Lang::En)
    }

    /// Collection-name-safe key, e.g. `zh_en`. Used to name the per-pair
    /// vector collections.
    pub fn key(&self) -> String {
        format!("{}_{}", self.src, self.tgt)
    }
}

impl fmt::Display for LangPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.src, self.tgt)
    }
}

impl FromStr for LangPair {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (src, tgt) = s
            .split_once(['-', '_'])
            .ok_or_else(|| PipelineError::ConfigInvalid(format!("bad language pair '{s}'")))?;
        Ok(Self::new(src.parse()?, tgt.parse()?))
    }
}

/// One unit of translation work: a source text with its pair, an optional
/// reference translation for scoring, and a stable identifier used to
/// reassemble results in input order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    /// Stable identifier within a dataset.
    pub id: String,

    /// Source text.
    pub source: String,

    /// Language pair.
    pub pair: LangPair,

    /// Reference translation, when the dataset provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl Segment {
    /// Create a segment without a reference.
    pub fn new(id: impl Into<String>, source: impl Into<String>, pair: LangPair) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            pair,
            reference: None,
        }
    }

    /// Attach a reference translation.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// A segment with an empty (or whitespace-only) source is unusable and
    /// must be skipped before any LLM call is made.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.source.trim().is_empty() {
            return Err(PipelineError::InputInvalid(format!(
                "segment '{}' has an empty source",
                self.id
            )));
        }
        Ok(())
    }
}
