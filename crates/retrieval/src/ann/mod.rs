//! ANN optimizer with size-adaptive strategy dispatch
//!
//! Picks a nearest-neighbor query plan based on how many candidate
//! documents the search is restricted to: small sets go straight to the
//! store, medium sets are prefiltered by centroid relevance, large sets use
//! IVF-style cluster probing. Every specialized plan degrades to the direct
//! plan when its preconditions fail.

mod cluster;

pub use cluster::{ClusterCache, ClusterCacheStats, DocumentCluster};

use docsense_common::vector::cosine_similarity;
use docsense_common::{ChunkFilter, ChunkRecord, ChunkStore, Result, ScoredChunk};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Candidate-set sizes at or below this go direct
const DIRECT_MAX_DOCUMENTS: usize = 5;
/// Candidate-set sizes at or below this (and above the direct bound) are
/// prefiltered; larger sets probe clusters
const PREFILTER_MAX_DOCUMENTS: usize = 20;

/// Nearest-neighbor query plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnStrategy {
    /// Query the store directly with over-fetch
    Direct,
    /// Rank documents by centroid relevance, then drain the best ones
    Prefiltered,
    /// Probe the most relevant document clusters only
    ClusteredProbe,
    /// Pick one of the above from the candidate-set size
    Hybrid,
}

impl AnnStrategy {
    /// Size-based dispatch used by the hybrid plan. Pure so the threshold
    /// policy is testable in isolation.
    pub fn for_candidate_count(document_count: usize) -> Self {
        if document_count <= DIRECT_MAX_DOCUMENTS {
            AnnStrategy::Direct
        } else if document_count <= PREFILTER_MAX_DOCUMENTS {
            AnnStrategy::Prefiltered
        } else {
            AnnStrategy::ClusteredProbe
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnnStrategy::Direct => "direct",
            AnnStrategy::Prefiltered => "prefiltered",
            AnnStrategy::ClusteredProbe => "clustered_probe",
            AnnStrategy::Hybrid => "hybrid",
        }
    }
}

/// ANN tuning parameters
#[derive(Debug, Clone)]
pub struct AnnConfig {
    pub strategy: AnnStrategy,
    /// Clusters probed by the clustered-probe plan
    pub probe_count: usize,
    /// Over-fetch multiplier applied to the requested limit
    pub overfetch_factor: usize,
    /// Hard cap on rows fetched from the store per query
    pub max_candidates: usize,
    /// Minimum centroid cosine similarity for the prefiltered plan
    pub prefilter_threshold: f64,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            strategy: AnnStrategy::Hybrid,
            probe_count: 3,
            overfetch_factor: 5,
            max_candidates: 100,
            prefilter_threshold: 0.3,
        }
    }
}

/// A nearest-neighbor hit with distance and derived confidence
#[derive(Debug, Clone)]
pub struct AnnHit {
    pub chunk: ChunkRecord,
    /// Vector distance, lower is better
    pub distance: f64,
    /// `max(0, 1 - distance)`
    pub confidence: f64,
}

impl From<ScoredChunk> for AnnHit {
    fn from(scored: ScoredChunk) -> Self {
        let confidence = (1.0 - scored.distance).max(0.0);
        Self {
            chunk: scored.chunk,
            distance: scored.distance,
            confidence,
        }
    }
}

/// Strategy-dispatching nearest-neighbor search over a chunk store
pub struct AnnOptimizer {
    store: Arc<dyn ChunkStore>,
    cache: Arc<ClusterCache>,
    config: AnnConfig,
}

impl AnnOptimizer {
    pub fn new(store: Arc<dyn ChunkStore>, cache: Arc<ClusterCache>, config: AnnConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub fn with_defaults(store: Arc<dyn ChunkStore>) -> Self {
        Self::new(store, Arc::new(ClusterCache::new()), AnnConfig::default())
    }

    pub fn cluster_cache(&self) -> &Arc<ClusterCache> {
        &self.cache
    }

    /// Find the chunks nearest to `query_embedding` within `document_ids`.
    /// Every returned hit satisfies `distance <= distance_threshold`; the
    /// list is sorted ascending by distance and capped at `limit`.
    pub async fn search_similar_chunks(
        &self,
        query_embedding: &[f32],
        document_ids: &[i64],
        limit: usize,
        distance_threshold: f64,
    ) -> Result<Vec<AnnHit>> {
        if query_embedding.is_empty() || document_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let strategy = match self.config.strategy {
            AnnStrategy::Hybrid => AnnStrategy::for_candidate_count(document_ids.len()),
            fixed => fixed,
        };
        docsense_common::metrics::record_ann_strategy(strategy.as_str());
        debug!(
            strategy = strategy.as_str(),
            documents = document_ids.len(),
            limit,
            "ANN search dispatched"
        );

        let hits = match strategy {
            AnnStrategy::Direct | AnnStrategy::Hybrid => {
                self.search_direct(query_embedding, document_ids, limit, distance_threshold)
                    .await?
            }
            AnnStrategy::Prefiltered => {
                self.search_prefiltered(query_embedding, document_ids, limit, distance_threshold)
                    .await?
            }
            AnnStrategy::ClusteredProbe => {
                self.search_clustered_probe(query_embedding, document_ids, limit, distance_threshold)
                    .await?
            }
        };

        Ok(hits)
    }

    fn overfetch(&self, limit: usize) -> usize {
        (limit * self.config.overfetch_factor).min(self.config.max_candidates)
    }

    async fn search_direct(
        &self,
        query_embedding: &[f32],
        document_ids: &[i64],
        limit: usize,
        distance_threshold: f64,
    ) -> Result<Vec<AnnHit>> {
        let filter = ChunkFilter {
            document_ids: document_ids.to_vec(),
            chunk_ids: None,
            max_distance: Some(distance_threshold),
        };

        let scored = self
            .store
            .nearest_chunks(query_embedding, &filter, self.overfetch(limit))
            .await?;

        Ok(finalize(scored, limit))
    }

    /// Rank candidate documents by centroid relevance and drain the best
    /// ones in order until `limit` chunks are collected
    async fn search_prefiltered(
        &self,
        query_embedding: &[f32],
        document_ids: &[i64],
        limit: usize,
        distance_threshold: f64,
    ) -> Result<Vec<AnnHit>> {
        let mut ranked: Vec<(i64, f64)> = Vec::with_capacity(document_ids.len());
        for &document_id in document_ids {
            let cluster = self.cache.get_or_build(document_id, self.store.as_ref()).await?;
            let similarity = cosine_similarity(&cluster.centroid, query_embedding);
            if similarity > self.config.prefilter_threshold {
                ranked.push((document_id, similarity));
            }
        }

        if ranked.is_empty() {
            debug!("No documents cleared the prefilter threshold, degrading to direct");
            return self
                .search_direct(query_embedding, document_ids, limit, distance_threshold)
                .await;
        }

        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut collected: Vec<ScoredChunk> = Vec::new();
        for (document_id, _) in ranked {
            let remaining = limit.saturating_sub(collected.len());
            if remaining == 0 {
                break;
            }

            let filter = ChunkFilter {
                document_ids: vec![document_id],
                chunk_ids: None,
                max_distance: Some(distance_threshold),
            };
            let scored = self
                .store
                .nearest_chunks(query_embedding, &filter, remaining * 2)
                .await?;
            collected.extend(scored);
        }

        Ok(finalize(collected, limit))
    }

    /// IVF-style probing: restrict the store query to the chunk ids of the
    /// most relevant clusters
    async fn search_clustered_probe(
        &self,
        query_embedding: &[f32],
        document_ids: &[i64],
        limit: usize,
        distance_threshold: f64,
    ) -> Result<Vec<AnnHit>> {
        let mut ranked: Vec<(DocumentCluster, f64)> = Vec::with_capacity(document_ids.len());
        for &document_id in document_ids {
            let cluster = self.cache.get_or_build(document_id, self.store.as_ref()).await?;
            if cluster.is_empty() {
                continue;
            }
            let similarity = cosine_similarity(&cluster.centroid, query_embedding);
            ranked.push((cluster, similarity));
        }

        if ranked.is_empty() {
            debug!("No probeable clusters, degrading to direct");
            return self
                .search_direct(query_embedding, document_ids, limit, distance_threshold)
                .await;
        }

        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.config.probe_count);

        let chunk_ids: Vec<i64> = ranked
            .iter()
            .flat_map(|(cluster, _)| cluster.chunk_ids.iter().copied())
            .collect();

        let filter = ChunkFilter {
            document_ids: Vec::new(),
            chunk_ids: Some(chunk_ids),
            max_distance: Some(distance_threshold),
        };
        let scored = self
            .store
            .nearest_chunks(query_embedding, &filter, self.overfetch(limit))
            .await?;

        Ok(finalize(scored, limit))
    }
}

/// Threshold filtering at the store boundary is advisory; enforce the
/// distance ordering and limit here so every plan returns the same shape
fn finalize(mut scored: Vec<ScoredChunk>, limit: usize) -> Vec<AnnHit> {
    scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored.into_iter().map(AnnHit::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsense_common::MemoryStore;

    fn optimizer_over(store: MemoryStore) -> AnnOptimizer {
        AnnOptimizer::with_defaults(Arc::new(store))
    }

    #[test]
    fn test_strategy_selection_by_scale() {
        assert_eq!(AnnStrategy::for_candidate_count(3), AnnStrategy::Direct);
        assert_eq!(AnnStrategy::for_candidate_count(12), AnnStrategy::Prefiltered);
        assert_eq!(AnnStrategy::for_candidate_count(50), AnnStrategy::ClusteredProbe);
        // boundary values
        assert_eq!(AnnStrategy::for_candidate_count(5), AnnStrategy::Direct);
        assert_eq!(AnnStrategy::for_candidate_count(6), AnnStrategy::Prefiltered);
        assert_eq!(AnnStrategy::for_candidate_count(20), AnnStrategy::Prefiltered);
        assert_eq!(AnnStrategy::for_candidate_count(21), AnnStrategy::ClusteredProbe);
    }

    #[test]
    fn test_confidence_floor() {
        let hit = AnnHit::from(ScoredChunk {
            chunk: ChunkRecord {
                id: 1,
                document_id: 1,
                page: 1,
                content: "x".into(),
                embedding: None,
                document_title: None,
            },
            distance: 1.4,
        });
        assert_eq!(hit.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_direct_results_sorted_and_thresholded() {
        let store = MemoryStore::new();
        store.add_document(1, 1, "Doc");
        store.add_chunk(1, 1, 1, "near", Some(vec![1.0, 0.0]));
        store.add_chunk(2, 1, 2, "mid", Some(vec![0.7, 0.0]));
        store.add_chunk(3, 1, 3, "far", Some(vec![-5.0, 0.0]));

        let optimizer = optimizer_over(store);
        let hits = optimizer
            .search_similar_chunks(&[1.0, 0.0], &[1], 10, 0.7)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        for window in hits.windows(2) {
            assert!(window[0].distance <= window[1].distance);
        }
        for hit in &hits {
            assert!(hit.distance <= 0.7);
            assert!(hit.confidence >= 0.0 && hit.confidence <= 1.0);
        }
        assert_eq!(hits[0].chunk.id, 1);
    }

    #[tokio::test]
    async fn test_prefiltered_degrades_to_direct_when_nothing_clears() {
        let store = MemoryStore::new();
        // 6 documents forces the prefiltered plan; centroids point away
        // from the query so nothing clears the 0.3 threshold
        for doc in 1..=6 {
            store.add_document(doc, 1, "Doc");
            store.add_chunk(doc * 10, doc, 1, "content", Some(vec![-1.0, 0.0]));
        }
        // one chunk close to the query despite the hostile centroid
        store.add_chunk(100, 1, 2, "close", Some(vec![0.0, 1.0]));

        let optimizer = optimizer_over(store);
        let hits = optimizer
            .search_similar_chunks(&[0.0, 1.0], &(1..=6).collect::<Vec<_>>(), 5, 0.5)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, 100);
    }

    #[tokio::test]
    async fn test_prefiltered_prefers_relevant_documents() {
        let store = MemoryStore::new();
        for doc in 1..=6 {
            store.add_document(doc, 1, "Doc");
            let embedding = if doc == 3 {
                vec![0.0, 1.0]
            } else {
                vec![1.0, 0.0]
            };
            store.add_chunk(doc * 10, doc, 1, "content", Some(embedding));
        }

        let optimizer = optimizer_over(store);
        let hits = optimizer
            .search_similar_chunks(&[0.0, 1.0], &(1..=6).collect::<Vec<_>>(), 3, 0.5)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.document_id, 3);
    }

    #[tokio::test]
    async fn test_clustered_probe_restricts_to_probed_clusters() {
        let store = MemoryStore::new();
        // 21+ documents forces the clustered-probe plan
        for doc in 1..=25 {
            store.add_document(doc, 1, "Doc");
            let embedding = if doc == 7 {
                vec![0.0, 1.0]
            } else {
                vec![1.0, 0.0]
            };
            store.add_chunk(doc * 10, doc, 1, "content", Some(embedding));
        }

        let optimizer = optimizer_over(store);
        let hits = optimizer
            .search_similar_chunks(&[0.0, 1.0], &(1..=25).collect::<Vec<_>>(), 5, 0.5)
            .await
            .unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk.document_id, 7);
    }

    #[tokio::test]
    async fn test_clustered_probe_degrades_when_no_clusters() {
        let store = MemoryStore::new();
        // documents exist but none of their chunks carry embeddings, so
        // every centroid is empty and no cluster qualifies
        for doc in 1..=25 {
            store.add_document(doc, 1, "Doc");
            store.add_chunk(doc * 10, doc, 1, "plain text", None);
        }
        store.add_chunk(999, 1, 2, "embedded", Some(vec![0.0, 1.0]));

        let optimizer = optimizer_over(store);
        let hits = optimizer
            .search_similar_chunks(&[0.0, 1.0], &(1..=25).collect::<Vec<_>>(), 5, 0.5)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, 999);
    }

    #[tokio::test]
    async fn test_empty_inputs_yield_empty_results() {
        let store = MemoryStore::new();
        let optimizer = optimizer_over(store);

        assert!(optimizer
            .search_similar_chunks(&[], &[1], 5, 0.7)
            .await
            .unwrap()
            .is_empty());
        assert!(optimizer
            .search_similar_chunks(&[1.0], &[], 5, 0.7)
            .await
            .unwrap()
            .is_empty());
    }
}
