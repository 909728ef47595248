//! Embedding clients: remote API, per-run cache, and a deterministic
//! hash embedder for tests and offline development.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use lexmt_types::config::EmbeddingSettings;

use crate::error::{ProviderError, Result};

/// Maps text to fixed-width dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The fixed output width. Registered at startup and used to validate
    /// TM inserts.
    fn dimension(&self) -> usize;

    /// Model identifier, used as part of the cache key.
    fn model(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .pop()
            .ok_or_else(|| ProviderError::InvalidResponse("empty embedding batch".into()))
    }
}

/// Embeds via an OpenAI-compatible `POST /embeddings` endpoint.
///
/// Requests are chunked to the configured batch size; each returned vector
/// is validated against the registered dimension.
pub struct ApiEmbedder {
    settings: EmbeddingSettings,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl ApiEmbedder {
    /// Create an embedder from run configuration.
    pub fn new(settings: EmbeddingSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            api_key: None,
        }
    }

    /// Create an embedder with an explicit API key.
    pub fn with_api_key(settings: EmbeddingSettings, api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::new(settings)
        }
    }

    fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.settings.api_key_env).map_err(|_| {
            ProviderError::NotConfigured(format!("set {} env var", self.settings.api_key_env))
        })
    }

    async fn call_api(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = self.resolve_api_key()?;
        let base = self.settings.base_url.trim_end_matches('/');
        let url = format!("{base}/embeddings");

        let body = serde_json::json!({
            "input": texts,
            "model": self.settings.model,
        });

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(format!(
                "HTTP {status}: {body_text}"
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("embedding response: {e}")))?;

        let data = payload
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| ProviderError::InvalidResponse("missing 'data' array".into()))?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let raw = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| ProviderError::InvalidResponse("item missing 'embedding'".into()))?;
            let vector: Vec<f32> = raw
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            if vector.len() != self.settings.dimension {
                return Err(ProviderError::DimensionMismatch {
                    expected: self.settings.dimension,
                    actual: vector.len(),
                });
            }
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.settings.batch_size.max(1)) {
            let mut batch = self.call_api(chunk).await?;
            if batch.len() != chunk.len() {
                return Err(ProviderError::InvalidResponse(format!(
                    "asked for {} embeddings, got {}",
                    chunk.len(),
                    batch.len()
                )));
            }
            vectors.append(&mut batch);
        }
        debug!(model = %self.settings.model, count = vectors.len(), "embedded batch");
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.settings.dimension
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

/// Caches embeddings keyed by (model, text) for the lifetime of a run.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: DashMap<(String, String), Vec<f32>>,
}

impl<E: Embedder> CachedEmbedder<E> {
    /// Wrap an embedder with a cache.
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Number of cached vectors.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.inner.model().to_string();

        // Collect cache misses, preserving positions.
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<(usize, String)> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(&(model.clone(), text.clone())) {
                Some(hit) => results.push(Some(hit.clone())),
                None => {
                    results.push(None);
                    misses.push((i, text.clone()));
                }
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<String> = misses.iter().map(|(_, t)| t.clone()).collect();
            let fresh = self.inner.embed_batch(&miss_texts).await?;
            for ((position, text), vector) in misses.into_iter().zip(fresh) {
                self.cache.insert((model.clone(), text), vector.clone());
                results[position] = Some(vector);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// Deterministic pseudo-embedder for tests and offline development.
///
/// Vectors are derived from a SHA-256 digest of the text, sign-mapped and
/// L2-normalized. They carry no semantics beyond "same text, same vector";
/// tests that need similarity structure construct vectors directly.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create a hash embedder with the given output width.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if text.trim().is_empty() {
            return vector;
        }

        let digest = Sha256::digest(text.as_bytes());
        for (i, value) in vector.iter_mut().enumerate() {
            let byte = digest[i % digest.len()];
            let bit = (i / digest.len()) % 8;
            *value = if (byte >> bit) & 1 == 1 { 1.0 } else { -1.0 };
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        "hash"
    }
}
