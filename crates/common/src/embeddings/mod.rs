//! Embedding service abstraction
//!
//! Provides a unified interface over embedding providers plus an
//! injectable process-wide cache keyed by the exact input text. Provider
//! failures degrade to "no embedding available" (an empty vector) at the
//! [`CachedEmbedder::embed_or_empty`] seam instead of propagating.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI embedding client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAiRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Result<Self> {
        let model = model.unwrap_or_else(|| "text-embedding-ada-002".to_string());
        let dimension = match model.as_str() {
            "text-embedding-ada-002" => 1536,
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            dimension,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let max_retries = 3;
        let mut last_error = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * (2_u64.pow(attempt as u32)));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::EmbeddingError {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAiRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::EmbeddingError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: OpenAiResponse =
            response.json().await.map_err(|e| AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        const BATCH_SIZE: usize = 100;

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let embeddings = self.request_with_retry(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic mock embedder for testing. The same text always embeds to
/// the same vector, so distance assertions stay stable across runs.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use rand::{Rng, SeedableRng};
        let mut seed = [0u8; 32];
        let digest = Sha256::digest(text.as_bytes());
        seed.copy_from_slice(&digest);
        let mut rng = rand::rngs::StdRng::from_seed(seed);
        Ok((0..self.dimension).map(|_| rng.gen::<f32>()).collect())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingCacheStats {
    pub size: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
}

struct CacheEntry {
    embedding: Vec<f32>,
    inserted_at: DateTime<Utc>,
}

/// Process-wide embedding cache keyed by the exact input text.
///
/// Concurrent writers may race on a miss and recompute; writes are
/// idempotent replacements keyed by the same input, so the race costs a
/// duplicate provider call, never corrupted state.
#[derive(Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.entries
            .read()
            .unwrap()
            .get(&Self::key(text))
            .map(|e| e.embedding.clone())
    }

    pub fn set(&self, text: &str, embedding: Vec<f32>) {
        self.entries.write().unwrap().insert(
            Self::key(text),
            CacheEntry {
                embedding,
                inserted_at: Utc::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        let entries = self.entries.read().unwrap();
        EmbeddingCacheStats {
            size: entries.len(),
            oldest_entry: entries.values().map(|e| e.inserted_at).min(),
        }
    }
}

/// Embedder wrapper adding the cache and the empty-vector degradation path
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Embed with caching; provider errors propagate
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get(text) {
            return Ok(cached);
        }

        let embedding = self.inner.embed(text).await?;
        self.cache.set(text, embedding.clone());
        Ok(embedding)
    }

    /// Embed, treating any provider failure as "no embedding available"
    pub async fn embed_or_empty(&self, text: &str) -> Vec<f32> {
        match self.embed(text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "Embedding unavailable, degrading to empty vector");
                Vec::new()
            }
        }
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(16);
        let a = embedder.embed("refund policy").await.unwrap();
        let b = embedder.embed("refund policy").await.unwrap();
        let c = embedder.embed("something else").await.unwrap();
        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        struct CountingEmbedder {
            calls: std::sync::atomic::AtomicUsize,
        }

        #[async_trait]
        impl Embedder for CountingEmbedder {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![1.0, 2.0])
            }
            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
                unimplemented!()
            }
            fn model_name(&self) -> &str {
                "counting"
            }
            fn dimension(&self) -> usize {
                2
            }
        }

        let inner = Arc::new(CountingEmbedder {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let embedder = CachedEmbedder::new(inner.clone(), Arc::new(EmbeddingCache::new()));

        embedder.embed("same text").await.unwrap();
        embedder.embed("same text").await.unwrap();
        assert_eq!(inner.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(embedder.cache().stats().size, 1);
    }

    #[tokio::test]
    async fn test_embed_or_empty_degrades() {
        struct FailingEmbedder;

        #[async_trait]
        impl Embedder for FailingEmbedder {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Err(AppError::EmbeddingError {
                    message: "provider down".into(),
                })
            }
            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Err(AppError::EmbeddingError {
                    message: "provider down".into(),
                })
            }
            fn model_name(&self) -> &str {
                "failing"
            }
            fn dimension(&self) -> usize {
                2
            }
        }

        let embedder = CachedEmbedder::new(Arc::new(FailingEmbedder), Arc::new(EmbeddingCache::new()));
        assert!(embedder.embed_or_empty("anything").await.is_empty());
    }

    #[test]
    fn test_cache_clear_and_stats() {
        let cache = EmbeddingCache::new();
        cache.set("a", vec![0.1]);
        cache.set("b", vec![0.2]);
        assert_eq!(cache.stats().size, 2);
        assert!(cache.stats().oldest_entry.is_some());

        cache.clear();
        assert_eq!(cache.stats().size, 0);
        assert!(cache.stats().oldest_entry.is_none());
    }
}
