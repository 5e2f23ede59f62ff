//! Per-document embedding clusters and their process-wide cache
//!
//! A cluster summarizes one document as the mean of its chunk embeddings,
//! used as a cheap document-level relevance proxy by the prefiltered and
//! clustered-probe strategies. Clusters are rebuilt when stale, never
//! patched in place.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use docsense_common::vector::{euclidean_distance, mean_centroid};
use docsense_common::{ChunkRecord, ChunkStore, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Maximum chunk pairs sampled when estimating intra-document spread
const MAX_SAMPLED_PAIRS: usize = 100;

/// Summary of one document's embedding distribution
#[derive(Debug, Clone)]
pub struct DocumentCluster {
    pub document_id: i64,
    /// Mean of chunk embeddings; empty when the document has no embedded
    /// chunks, which makes cosine comparisons return 0 and excludes the
    /// cluster from selection
    pub centroid: Vec<f32>,
    pub chunk_ids: Vec<i64>,
    /// Estimated average pairwise chunk distance, from a bounded sample
    pub avg_distance: f64,
    pub last_updated: DateTime<Utc>,
}

impl DocumentCluster {
    /// Build a cluster from a document's chunk rows
    pub fn build(document_id: i64, chunks: &[ChunkRecord]) -> Self {
        let embeddings: Vec<Vec<f32>> = chunks
            .iter()
            .filter_map(|c| c.embedding.clone())
            .collect();

        let centroid = mean_centroid(&embeddings);
        let avg_distance = estimate_avg_distance(&embeddings);

        Self {
            document_id,
            centroid,
            chunk_ids: chunks.iter().map(|c| c.id).collect(),
            avg_distance,
            last_updated: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.centroid.is_empty()
    }
}

/// Average pairwise distance over at most [`MAX_SAMPLED_PAIRS`] pairs,
/// taken in deterministic iteration order to keep tests stable
fn estimate_avg_distance(embeddings: &[Vec<f32>]) -> f64 {
    if embeddings.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut pairs = 0usize;

    'outer: for i in 0..embeddings.len() {
        for j in (i + 1)..embeddings.len() {
            total += euclidean_distance(&embeddings[i], &embeddings[j]);
            pairs += 1;
            if pairs >= MAX_SAMPLED_PAIRS {
                break 'outer;
            }
        }
    }

    total / pairs as f64
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ClusterCacheStats {
    pub size: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
}

/// Process-wide cluster cache with TTL-based staleness
pub struct ClusterCache {
    entries: RwLock<HashMap<i64, DocumentCluster>>,
    ttl: ChronoDuration,
}

impl ClusterCache {
    /// Default staleness window of one hour
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(3600))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(3600)),
        }
    }

    /// Return a fresh cluster for the document, rebuilding from the store
    /// when the entry is absent or older than the TTL. Concurrent misses may
    /// rebuild the same cluster; the duplicate write is idempotent.
    pub async fn get_or_build(
        &self,
        document_id: i64,
        store: &dyn ChunkStore,
    ) -> Result<DocumentCluster> {
        if let Some(cluster) = self.fresh_entry(document_id) {
            docsense_common::metrics::record_cache(true, "cluster");
            return Ok(cluster);
        }
        docsense_common::metrics::record_cache(false, "cluster");

        let chunks = store.chunks_by_document(document_id).await?;
        let cluster = DocumentCluster::build(document_id, &chunks);

        self.entries
            .write()
            .unwrap()
            .insert(document_id, cluster.clone());

        Ok(cluster)
    }

    fn fresh_entry(&self, document_id: i64) -> Option<DocumentCluster> {
        let entries = self.entries.read().unwrap();
        entries.get(&document_id).and_then(|cluster| {
            let age = Utc::now() - cluster.last_updated;
            (age < self.ttl).then(|| cluster.clone())
        })
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn stats(&self) -> ClusterCacheStats {
        let entries = self.entries.read().unwrap();
        ClusterCacheStats {
            size: entries.len(),
            oldest_entry: entries.values().map(|c| c.last_updated).min(),
        }
    }
}

impl Default for ClusterCache {
    fn default() -> Self {
        Self::new()
    }
}
