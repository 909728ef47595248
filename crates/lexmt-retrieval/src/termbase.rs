//! The termbase: a persistent store of source-term → target-term entries
//! with layered exact / fuzzy / vector lookup.
//!
//! Lookup runs three passes and fuses them with rank-preserving
//! de-duplication: an exact hit always outranks a fuzzy hit, which always
//! outranks a vector hit, regardless of raw scores. Ties within a pass
//! break on confidence, then occurrence count.
//!
//! Persistence is JSONL, one entry per line. Vectors are derived data and
//! are rebuilt through the embedder on load.

use std::collections::HashMap;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use lexmt_llm::Embedder;
use lexmt_types::config::TermbaseSettings;
use lexmt_types::{LangPair, MatchOrigin, TermEntry, TermHit};

use crate::error::{Result, RetrievalError};
use crate::lexical::is_punctuation;
use crate::vector::{InMemoryCollection, VectorCollection};

/// Counts reported by one [`Termbase::ingest`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Entries newly inserted.
    pub inserted: usize,
    /// Existing entries whose counts/contexts were aggregated.
    pub updated: usize,
    /// Entries whose vector could not be computed. The entry itself is
    /// still stored and findable by the exact and fuzzy passes.
    pub vector_errors: usize,
}

/// Normalize a source form for exact matching and de-duplication:
/// lowercased, punctuation stripped, whitespace collapsed.
pub fn normalize_form(form: &str) -> String {
    let mut out = String::with_capacity(form.len());
    let mut pending_space = false;
    for c in form.trim().chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
        } else if !is_punctuation(c) {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.extend(c.to_lowercase());
        }
    }
    out
}

#[derive(Default)]
struct PairStore {
    /// normalized source form → entries sharing that form.
    by_form: HashMap<String, Vec<TermEntry>>,
    vectors: InMemoryCollection,
}

/// Process-wide termbase: many readers, single writer (writes happen only
/// during preprocessing and corpus import).
pub struct Termbase {
    settings: TermbaseSettings,
    embedder: Arc<dyn Embedder>,
    pairs: RwLock<HashMap<LangPair, PairStore>>,
}

impl Termbase {
    /// Create an empty termbase.
    pub fn new(settings: TermbaseSettings, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            settings,
            embedder,
            pairs: RwLock::new(HashMap::new()),
        }
    }

    /// Create a termbase and populate it from a JSONL file, if the file
    /// exists. Vectors are rebuilt through the embedder.
    pub async fn load(
        settings: TermbaseSettings,
        embedder: Arc<dyn Embedder>,
        path: &Path,
    ) -> Result<Self> {
        let termbase = Self::new(settings, embedder);
        if !path.exists() {
            return Ok(termbase);
        }

        let file = std::fs::File::open(path)?;
        let mut entries = Vec::new();
        for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TermEntry = serde_json::from_str(&line).map_err(|e| {
                RetrievalError::CorruptStore(format!("{}:{}: {e}", path.display(), line_no + 1))
            })?;
            entries.push(entry);
        }
        debug!(count = entries.len(), path = %path.display(), "loaded termbase");
        termbase.ingest(entries).await?;
        Ok(termbase)
    }

    /// Write every entry as one JSON line, sorted for stable diffs.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let pairs = self.pairs.read().await;
        let mut all: Vec<&TermEntry> = pairs
            .values()
            .flat_map(|store| store.by_form.values().flatten())
            .collect();
        all.sort_by(|a, b| {
            (a.pair, &a.source_form, &a.target_form).cmp(&(b.pair, &b.source_form, &b.target_form))
        });

        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        for entry in all {
            serde_json::to_writer(&mut writer, entry)
                .map_err(|e| RetrievalError::CorruptStore(e.to_string()))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Upsert entries. Same `(source_form, target_form, pair)` aggregates
    /// occurrence counts and contexts (capped at two, longest first) and
    /// keeps the higher confidence; it never replaces the target form.
    /// Re-ingesting the same entries adds no new rows.
    pub async fn ingest(&self, entries: Vec<TermEntry>) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        let mut pairs = self.pairs.write().await;

        for entry in entries {
            let form = normalize_form(&entry.source_form);
            if form.is_empty() {
                warn!(source = %entry.source_form, "skipping term with empty normalized form");
                continue;
            }
            let store = pairs.entry(entry.pair).or_default();
            let bucket = store.by_form.entry(form.clone()).or_default();

            match bucket.iter_mut().find(|e| e.target_form == entry.target_form) {
                Some(existing) => {
                    existing.occurrences = existing.occurrences.saturating_add(entry.occurrences);
                    existing.confidence = existing.confidence.max(entry.confidence);
                    if existing.definition.is_none() {
                        existing.definition = entry.definition;
                    }
                    if existing.domain.is_none() {
                        existing.domain = entry.domain;
                    }
                    merge_contexts(&mut existing.contexts, entry.contexts);
                    summary.updated += 1;
                }
                None => {
                    let needs_vector = bucket.is_empty();
                    bucket.push(entry.clone());
                    summary.inserted += 1;

                    if needs_vector {
                        match self.embedder.embed(&entry.source_form).await {
                            Ok(vector) => {
                                store.vectors.upsert(form.clone(), vector).await?;
                            }
                            Err(e) => {
                                warn!(term = %entry.source_form, error = %e, "term vector failed");
                                summary.vector_errors += 1;
                            }
                        }
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Layered lookup: exact → fuzzy → vector, rank-preserving dedup by
    /// `(source_form, target_form)`, at most `k` hits.
    pub async fn lookup(&self, source_form: &str, pair: LangPair, k: usize) -> Result<Vec<TermHit>> {
        let form = normalize_form(source_form);
        if form.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let pairs = self.pairs.read().await;
        let Some(store) = pairs.get(&pair) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<TermHit> = Vec::new();

        // Pass 1: exact.
        if let Some(bucket) = store.by_form.get(&form) {
            for entry in bucket {
                hits.push(TermHit {
                    entry: entry.clone(),
                    score: 1.0,
                    origin: MatchOrigin::DbExact,
                });
            }
        }

        // Pass 2: fuzzy string similarity.
        for (key, bucket) in &store.by_form {
            if *key == form {
                continue;
            }
            let similarity = strsim::normalized_levenshtein(&form, key) as f32;
            if similarity >= self.settings.fuzzy_threshold {
                for entry in bucket {
                    hits.push(TermHit {
                        entry: entry.clone(),
                        score: similarity,
                        origin: MatchOrigin::DbFuzzy,
                    });
                }
            }
        }

        // Pass 3: dense vectors.
        match self.embedder.embed(source_form).await {
            Ok(query) => {
                for vhit in store.vectors.search(&query, k).await? {
                    if vhit.score < self.settings.vector_threshold {
                        continue;
                    }
                    if let Some(bucket) = store.by_form.get(&vhit.id) {
                        for entry in bucket {
                            hits.push(TermHit {
                                entry: entry.clone(),
                                score: vhit.score.clamp(0.0, 1.0),
                                origin: MatchOrigin::DbVector,
                            });
                        }
                    }
                }
            }
            Err(e) => {
                // Exact and fuzzy passes still stand on their own.
                warn!(term = %source_form, error = %e, "vector pass skipped");
            }
        }

        // Rank-preserving dedup: the first (highest-pass) occurrence of a
        // mapping wins.
        let mut seen = std::collections::HashSet::new();
        hits.retain(|hit| {
            seen.insert((hit.entry.source_form.clone(), hit.entry.target_form.clone()))
        });

        hits.sort_by_key(|hit| hit.sort_key());
        hits.truncate(k);
        Ok(hits)
    }

    /// Exact + fuzzy passes only, no embedding call. The preprocessing
    /// pipeline uses this to decide which terms still need a translation
    /// without paying a vector query per term.
    pub async fn lookup_lexical(
        &self,
        source_form: &str,
        pair: LangPair,
        k: usize,
    ) -> Vec<TermHit> {
        let form = normalize_form(source_form);
        if form.is_empty() || k == 0 {
            return Vec::new();
        }

        let pairs = self.pairs.read().await;
        let Some(store) = pairs.get(&pair) else {
            return Vec::new();
        };

        let mut hits: Vec<TermHit> = Vec::new();
        if let Some(bucket) = store.by_form.get(&form) {
            for entry in bucket {
                hits.push(TermHit {
                    entry: entry.clone(),
                    score: 1.0,
                    origin: MatchOrigin::DbExact,
                });
            }
        }
        for (key, bucket) in &store.by_form {
            if *key == form {
                continue;
            }
            let similarity = strsim::normalized_levenshtein(&form, key) as f32;
            if similarity >= self.settings.fuzzy_threshold {
                for entry in bucket {
                    hits.push(TermHit {
                        entry: entry.clone(),
                        score: similarity,
                        origin: MatchOrigin::DbFuzzy,
                    });
                }
            }
        }

        hits.sort_by_key(|hit| hit.sort_key());
        hits.truncate(k);
        hits
    }

    /// All entries for a pair, sorted by source then target form.
    pub async fn export(&self, pair: LangPair) -> Vec<TermEntry> {
        let pairs = self.pairs.read().await;
        let mut entries: Vec<TermEntry> = pairs
            .get(&pair)
            .map(|store| store.by_form.values().flatten().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| {
            (&a.source_form, &a.target_form).cmp(&(&b.source_form, &b.target_form))
        });
        entries
    }

    /// Number of stored mappings for a pair.
    pub async fn size(&self, pair: LangPair) -> usize {
        let pairs = self.pairs.read().await;
        pairs
            .get(&pair)
            .map(|store| store.by_form.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

/// Union `incoming` into `contexts`, keeping at most [`lexmt_types::term::MAX_CONTEXTS`]
/// distinct contexts, longest first (length proxies informativeness).
fn merge_contexts(contexts: &mut Vec<String>, incoming: Vec<String>) {
    for context in incoming {
        if !contexts.contains(&context) {
            contexts.push(context);
        }
    }
    contexts.sort_by_key(|c| std::cmp::Reverse(c.chars().count()));
    contexts.truncate(lexmt_types::term::MAX_CONTEXTS);
}
