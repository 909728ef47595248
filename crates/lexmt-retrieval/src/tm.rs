//! Translation-memory index with hybrid dense + lexical retrieval.
//!
//! The fused score is `alpha * dense + (1 - alpha) * lexical`, both sides
//! normalized to [0, 1]. Dense similarity is cosine over the embedding;
//! lexical similarity is idf-weighted token overlap. An optional similarity
//! floor drops low-relevance hits, and a search may legitimately return
//! nothing -- the discourse layer treats that as "no references".

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use lexmt_llm::Embedder;
use lexmt_llm::ProviderError;
use lexmt_types::config::TmSettings;
use lexmt_types::{LangPair, TmEntry, TmHit};

use crate::error::{Result, RetrievalError};
use crate::lexical::{DocFrequency, overlap_score, tokenize};
use crate::vector::{cosine, cosine_unit_interval};

#[derive(Default)]
struct PairIndex {
    entries: Vec<TmEntry>,
    vectors: Vec<Vec<f32>>,
    tokens: Vec<Vec<String>>,
    df: DocFrequency,
    seen: HashSet<(String, String)>,
}

/// The translation-memory index. Read-only during experiments; writes
/// happen only during corpus import.
pub struct TmIndex {
    settings: TmSettings,
    embedder: Arc<dyn Embedder>,
    pairs: RwLock<HashMap<LangPair, PairIndex>>,
}

impl TmIndex {
    /// Create an empty index.
    pub fn new(settings: TmSettings, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            settings,
            embedder,
            pairs: RwLock::new(HashMap::new()),
        }
    }

    /// Create an index and populate it from a JSONL corpus file, if it
    /// exists.
    pub async fn load(
        settings: TmSettings,
        embedder: Arc<dyn Embedder>,
        path: &Path,
    ) -> Result<Self> {
        let index = Self::new(settings, embedder);
        if !path.exists() {
            return Ok(index);
        }

        let file = std::fs::File::open(path)?;
        for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TmEntry = serde_json::from_str(&line).map_err(|e| {
                RetrievalError::CorruptStore(format!("{}:{}: {e}", path.display(), line_no + 1))
            })?;
            index
                .insert(&entry.source_text, &entry.target_text, entry.pair)
                .await?;
        }
        debug!(path = %path.display(), "loaded translation memory");
        Ok(index)
    }

    /// Persist all entries as JSONL. Vectors and tokens are derived data
    /// and are not written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let pairs = self.pairs.read().await;
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        for index in pairs.values() {
            for entry in &index.entries {
                serde_json::to_writer(&mut writer, entry)
                    .map_err(|e| RetrievalError::CorruptStore(e.to_string()))?;
                writer.write_all(b"\n")?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Insert one aligned pair: embed, tokenize, store. Duplicate
    /// `(source, target)` pairs are ignored; an empty source is an error.
    pub async fn insert(&self, source: &str, target: &str, pair: LangPair) -> Result<()> {
        let entry = TmEntry::new(source, target, pair)
            .map_err(|e| RetrievalError::InputInvalid(e.to_string()))?;

        {
            let pairs = self.pairs.read().await;
            if let Some(index) = pairs.get(&pair)
                && index.seen.contains(&entry.dedup_key())
            {
                return Ok(());
            }
        }

        let vector = self.embedder.embed(source).await?;
        if vector.len() != self.embedder.dimension() {
            return Err(RetrievalError::Embedding(ProviderError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: vector.len(),
            }));
        }
        let tokens = tokenize(source, pair.src);

        let mut pairs = self.pairs.write().await;
        let index = pairs.entry(pair).or_default();
        // Re-check under the write lock; another inserter may have won.
        if !index.seen.insert(entry.dedup_key()) {
            return Ok(());
        }
        index.df.add_document(&tokens);
        index.entries.push(entry);
        index.vectors.push(vector);
        index.tokens.push(tokens);
        Ok(())
    }

    /// Hybrid top-k search with the given fusion weight. Results are
    /// sorted by fused score descending; when `floor` is set, hits below
    /// it are dropped even if that leaves the result empty.
    pub async fn search(
        &self,
        source: &str,
        pair: LangPair,
        k: usize,
        alpha: f32,
    ) -> Result<Vec<TmHit>> {
        self.search_with_floor(source, pair, k, alpha, self.settings.similarity_floor)
            .await
    }

    /// [`TmIndex::search`] with an explicit floor override (used by
    /// ablation sweeps).
    pub async fn search_with_floor(
        &self,
        source: &str,
        pair: LangPair,
        k: usize,
        alpha: f32,
        floor: Option<f32>,
    ) -> Result<Vec<TmHit>> {
        if source.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let alpha = alpha.clamp(0.0, 1.0);

        let query_vector = self.embedder.embed(source).await?;
        let query_tokens = tokenize(source, pair.src);

        let pairs = self.pairs.read().await;
        let Some(index) = pairs.get(&pair) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<TmHit> = index
            .entries
            .iter()
            .zip(&index.vectors)
            .zip(&index.tokens)
            .map(|((entry, vector), tokens)| {
                let dense = cosine_unit_interval(cosine(&query_vector, vector));
                let lexical = overlap_score(&query_tokens, tokens, &index.df);
                TmHit {
                    entry: entry.clone(),
                    score: alpha * dense + (1.0 - alpha) * lexical,
                }
            })
            .collect();

        if let Some(floor) = floor {
            hits.retain(|hit| hit.score >= floor);
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Number of stored pairs for a language pair.
    pub async fn size(&self, pair: LangPair) -> usize {
        let pairs = self.pairs.read().await;
        pairs.get(&pair).map(|i| i.entries.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexmt_llm::HashEmbedder;

    fn index() -> TmIndex {
        TmIndex::new(TmSettings::default(), Arc::new(HashEmbedder::new(256)))
    }

    fn no_floor() -> TmSettings {
        TmSettings {
            similarity_floor: None,
            ..TmSettings::default()
        }
    }

    #[tokio::test]
    async fn insert_and_size() {
        let tm = index();
        tm.insert("劳动者享有权利", "workers have rights", LangPair::zh_en())
            .await
            .unwrap();
        assert_eq!(tm.size(LangPair::zh_en()).await, 1);
        assert_eq!(tm.size(LangPair::new(lexmt_types::Lang::Zh, lexmt_types::Lang::Ja)).await, 0);
    }

    #[tokio::test]
    async fn empty_source_rejected() {
        let tm = index();
        let err = tm.insert("  ", "x", LangPair::zh_en()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InputInvalid(_)));
    }

    #[tokio::test]
    async fn duplicates_deduplicated() {
        let tm = index();
        tm.insert("合同", "contract", LangPair::zh_en()).await.unwrap();
        tm.insert("合同", "contract", LangPair::zh_en()).await.unwrap();
        assert_eq!(tm.size(LangPair::zh_en()).await, 1);

        // Same source, different target is a distinct pair.
        tm.insert("合同", "agreement", LangPair::zh_en()).await.unwrap();
        assert_eq!(tm.size(LangPair::zh_en()).await, 2);
    }

    #[tokio::test]
    async fn exact_source_ranks_first() {
        let tm = TmIndex::new(no_floor(), Arc::new(HashEmbedder::new(256)));
        tm.insert("劳动者享有平等就业的权利", "workers have the right to equal employment", LangPair::zh_en())
            .await
            .unwrap();
        tm.insert("用人单位应当支付工资", "the employer shall pay wages", LangPair::zh_en())
            .await
            .unwrap();

        let hits = tm
            .search("劳动者享有平等就业的权利", LangPair::zh_en(), 2, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(
            hits[0].entry.target_text,
            "workers have the right to equal employment"
        );
        assert!(hits[0].score > hits[1].score);
        // Exact match: dense cosine 1.0 and full lexical overlap.
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn results_sorted_and_bounded_by_k() {
        let tm = TmIndex::new(no_floor(), Arc::new(HashEmbedder::new(256)));
        for i in 0..6 {
            tm.insert(
                &format!("劳动合同第{i}条"),
                &format!("labor contract article {i}"),
                LangPair::zh_en(),
            )
            .await
            .unwrap();
        }

        let hits = tm.search("劳动合同", LangPair::zh_en(), 3, 0.5).await.unwrap();
        assert!(hits.len() <= 3);
        for window in hits.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[tokio::test]
    async fn floor_filters_low_relevance_hits() {
        let tm = index(); // default floor 0.7
        tm.insert("完全不相关的刑法条款内容", "an unrelated criminal law clause", LangPair::zh_en())
            .await
            .unwrap();

        let hits = tm
            .search("劳动者享有平等就业的权利", LangPair::zh_en(), 5, 0.5)
            .await
            .unwrap();
        assert!(
            hits.is_empty(),
            "unrelated entry must not pass the 0.7 floor, got {:?}",
            hits.iter().map(|h| h.score).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn every_returned_score_meets_the_floor() {
        let tm = index();
        tm.insert("劳动者享有权利", "workers have rights", LangPair::zh_en())
            .await
            .unwrap();
        tm.insert("不相关的句子", "an unrelated sentence", LangPair::zh_en())
            .await
            .unwrap();

        let hits = tm.search("劳动者享有权利", LangPair::zh_en(), 5, 0.5).await.unwrap();
        assert!(hits.iter().all(|h| h.score >= 0.7));
    }

    #[tokio::test]
    async fn alpha_one_is_pure_dense_alpha_zero_pure_lexical() {
        let tm = TmIndex::new(no_floor(), Arc::new(HashEmbedder::new(256)));
        tm.insert("劳动者享有权利", "workers have rights", LangPair::zh_en())
            .await
            .unwrap();

        let dense_only = tm
            .search("劳动者享有权利", LangPair::zh_en(), 1, 1.0)
            .await
            .unwrap();
        let lexical_only = tm
            .search("劳动者享有权利", LangPair::zh_en(), 1, 0.0)
            .await
            .unwrap();
        // Self-match saturates both components.
        assert!((dense_only[0].score - 1.0).abs() < 1e-5);
        assert!((lexical_only[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tm.jsonl");

        let tm = index();
        tm.insert("劳动者享有权利", "workers have rights", LangPair::zh_en())
            .await
            .unwrap();
        tm.save(&path).await.unwrap();

        let reloaded = TmIndex::load(
            TmSettings::default(),
            Arc::new(HashEmbedder::new(256)),
            &path,
        )
        .await
        .unwrap();
        assert_eq!(reloaded.size(LangPair::zh_en()).await, 1);
    }

    #[tokio::test]
    async fn empty_query_returns_empty() {
        let tm = index();
        tm.insert("合同", "contract", LangPair::zh_en()).await.unwrap();
        assert!(tm.search("", LangPair::zh_en(), 5, 0.5).await.unwrap().is_empty());
    }
}
