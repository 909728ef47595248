//! Tokenization and lexical relevance scoring for the hybrid TM search.
//!
//! Unsegmented scripts (zh, ja) are tokenized into character unigrams and
//! bigrams; space-delimited scripts into lowercase word tokens. Relevance is
//! idf-weighted token overlap, normalized so a self-match scores 1.0.

use std::collections::{HashMap, HashSet};

use lexmt_types::Lang;

/// Tokenize `text` for the lexical index.
pub fn tokenize(text: &str, lang: Lang) -> Vec<String> {
    if lang.is_unsegmented() {
        let chars: Vec<char> = text
            .chars()
            .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
            .collect();
        let mut tokens: Vec<String> = chars.iter().map(|c| c.to_string()).collect();
        tokens.extend(chars.windows(2).map(|w| w.iter().collect::<String>()));
        tokens
    } else {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect()
    }
}

pub(crate) fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '。' | '，' | '、' | '；' | '：' | '？' | '！' | '「' | '」' | '『' | '』'
                | '（' | '）' | '《' | '》' | '【' | '】'
                | '\u{201C}' | '\u{201D}' | '\u{2018}' | '\u{2019}'
        )
}

/// Document-frequency table over an indexed corpus.
#[derive(Debug, Default, Clone)]
pub struct DocFrequency {
    docs: usize,
    frequency: HashMap<String, u32>,
}

impl DocFrequency {
    /// Record one document's tokens.
    pub fn add_document(&mut self, tokens: &[String]) {
        self.docs += 1;
        let unique: HashSet<&String> = tokens.iter().collect();
        for token in unique {
            *self.frequency.entry(token.clone()).or_insert(0) += 1;
        }
    }

    /// Smoothed inverse document frequency. Unseen tokens get the maximum
    /// weight.
    pub fn idf(&self, token: &str) -> f32 {
        let df = self.frequency.get(token).copied().unwrap_or(0) as f32;
        ((1.0 + self.docs as f32) / (1.0 + df)).ln() + 1.0
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.docs
    }

    /// True when no document has been indexed.
    pub fn is_empty(&self) -> bool {
        self.docs == 0
    }
}

/// Idf-weighted overlap of `query` tokens against `doc` tokens, in [0, 1].
///
/// The denominator is the query's own idf mass, so a document containing
/// every query token scores 1.0 regardless of its extra content.
pub fn overlap_score(query: &[String], doc: &[String], df: &DocFrequency) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let doc_set: HashSet<&String> = doc.iter().collect();
    let query_unique: HashSet<&String> = query.iter().collect();

    let mut matched = 0.0f32;
    let mut total = 0.0f32;
    for token in query_unique {
        let weight = df.idf(token);
        total += weight;
        if doc_set.contains(token) {
            matched += weight;
        }
    }
    if total == 0.0 { 0.0 } else { matched / total }
}
