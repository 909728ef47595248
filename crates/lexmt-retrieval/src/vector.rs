//! Vector collection abstraction and the in-memory implementation.
//!
//! The rest of the crate only issues `upsert` / `search-top-k` / `len`
//! against a [`VectorCollection`], so a server-backed collection can be
//! swapped in behind the same seam. The shipped implementation is
//! brute-force cosine over an in-memory list, which is comfortable for the
//! corpus sizes the pipeline works at (tens of thousands of entries).

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, RetrievalError};

/// One scored hit from a vector search.
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// Entry id.
    pub id: String,
    /// Raw cosine similarity in [-1, 1].
    pub score: f32,
}

/// A named collection of id-addressed dense vectors.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Insert or replace the vector stored under `id`.
    async fn upsert(&self, id: String, vector: Vec<f32>) -> Result<()>;

    /// Top-k ids by cosine similarity, sorted descending.
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;

    /// Number of stored vectors.
    async fn len(&self) -> usize;
}

/// In-memory brute-force cosine collection.
#[derive(Debug, Default)]
pub struct InMemoryCollection {
    entries: RwLock<Vec<(String, Vec<f32>)>>,
}

impl InMemoryCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorCollection for InMemoryCollection {
    async fn upsert(&self, id: String, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            return Err(RetrievalError::BadVector("empty vector".into()));
        }
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some((_, stored)) => *stored = vector,
            None => entries.push((id, vector)),
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let entries = self.entries.read().await;
        if entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<VectorHit> = entries
            .iter()
            .map(|(id, vector)| VectorHit {
                id: id.clone(),
                score: cosine(query, vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Cosine similarity. Zero for mismatched lengths or zero-norm inputs.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Cosine rescaled from [-1, 1] to [0, 1] for fusion with lexical scores.
pub fn cosine_unit_interval(raw: f32) -> f32 {
    ((raw + 1.0) / 2.0).clamp(0.0, 1.0)
}
