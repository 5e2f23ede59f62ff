//! Ensemble retriever with graceful degradation
//!
//! Top-level entry point for question-answering retrieval. Lexical and ANN
//! signals run concurrently over the same scope and are fused with the ANN
//! signal weighted more heavily. Failures walk a fixed fallback ladder:
//! lexical-only, then raw ANN, then a single nearest-neighbor store query.
//! Nothing throws past these entry points; total exhaustion is an empty
//! result list.

use crate::ann::AnnOptimizer;
use crate::fusion::fuse_weighted;
use crate::lexical::{LexicalHit, LexicalIndex};
use crate::{AnnHit, HitMetadata, RetrievalMethod, SearchHit, SearchScope};
use chrono::Utc;
use docsense_common::config::RetrievalConfig;
use docsense_common::embeddings::CachedEmbedder;
use docsense_common::{ChunkFilter, ChunkRecord, ChunkStore, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Results drawn by the raw ANN fallback tier
const ANN_FALLBACK_LIMIT: usize = 5;
const ANN_FALLBACK_THRESHOLD: f64 = 0.8;
/// Results drawn by the last-resort store query
const TRADITIONAL_FALLBACK_LIMIT: usize = 3;

/// Ensemble tuning
#[derive(Debug, Clone)]
pub struct EnsembleOptions {
    /// Fusion weights as [lexical, ann]
    pub weights: [f64; 2],
    /// Distance cutoff for the primary ANN signal
    pub distance_threshold: f64,
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        Self {
            weights: [0.4, 0.6],
            distance_threshold: 0.7,
        }
    }
}

impl EnsembleOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            weights: [config.lexical_weight, config.ann_weight],
            distance_threshold: config.distance_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ScopeTarget {
    Document(i64),
    Company(i64),
}

impl ScopeTarget {
    fn scope(&self) -> SearchScope {
        match self {
            ScopeTarget::Document(_) => SearchScope::Document,
            ScopeTarget::Company(_) => SearchScope::Company,
        }
    }

    fn ensemble_method(&self) -> RetrievalMethod {
        match self {
            ScopeTarget::Document(_) => RetrievalMethod::DocumentEnsembleRrf,
            ScopeTarget::Company(_) => RetrievalMethod::CompanyEnsembleRrf,
        }
    }

    fn bm25_fallback_method(&self) -> RetrievalMethod {
        match self {
            ScopeTarget::Document(_) => RetrievalMethod::DocumentBm25Fallback,
            ScopeTarget::Company(_) => RetrievalMethod::CompanyBm25Fallback,
        }
    }
}

/// Hybrid retriever combining BM25 and ANN signals per scope
pub struct EnsembleRetriever {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<CachedEmbedder>,
    ann: Arc<AnnOptimizer>,
    options: EnsembleOptions,
}

impl EnsembleRetriever {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<CachedEmbedder>,
        ann: Arc<AnnOptimizer>,
        options: EnsembleOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            ann,
            options,
        }
    }

    /// Search one document's chunks. Never fails; an exhausted ladder is an
    /// empty list.
    pub async fn search_document(&self, document_id: i64, query: &str, limit: usize) -> Vec<SearchHit> {
        self.search(ScopeTarget::Document(document_id), query, limit).await
    }

    /// Search across all of a company's documents
    pub async fn search_company(&self, company_id: i64, query: &str, limit: usize) -> Vec<SearchHit> {
        self.search(ScopeTarget::Company(company_id), query, limit).await
    }

    async fn search(&self, target: ScopeTarget, query: &str, limit: usize) -> Vec<SearchHit> {
        let start = Instant::now();
        let hits = self.run_ladder(target, query, limit).await;

        let method = hits
            .first()
            .map(|h| h.metadata.retrieval_method)
            .unwrap_or(target.ensemble_method());
        docsense_common::metrics::record_search(start.elapsed().as_secs_f64(), method.as_str(), hits.len());
        if method.is_fallback() {
            docsense_common::metrics::record_fallback(method.as_str());
        }

        hits
    }

    async fn run_ladder(&self, target: ScopeTarget, query: &str, limit: usize) -> Vec<SearchHit> {
        // Tier 1: weighted ensemble
        match self.run_ensemble(target, query, limit).await {
            Ok(hits) if !hits.is_empty() => return hits,
            Ok(_) => {
                debug!(scope = target.scope().as_str(), "Ensemble returned no results");
            }
            Err(e) => {
                warn!(scope = target.scope().as_str(), error = %e, "Ensemble failed, trying lexical-only");

                // Tier 2: lexical-only over the same scope
                match self.run_lexical_only(target, query, limit).await {
                    Ok(hits) if !hits.is_empty() => return hits,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Lexical fallback failed");
                    }
                }
            }
        }

        // Tier 3: raw ANN search
        match self.run_ann_fallback(target, query).await {
            Ok(hits) if !hits.is_empty() => return hits,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "ANN fallback failed, trying direct store query");

                // Tier 4: one nearest-neighbor store query, no cluster logic
                match self.run_traditional_fallback(target, query).await {
                    Ok(hits) if !hits.is_empty() => return hits,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "All retrieval tiers exhausted");
                    }
                }
            }
        }

        Vec::new()
    }

    async fn scope_rows(&self, target: ScopeTarget) -> Result<Vec<ChunkRecord>> {
        match target {
            ScopeTarget::Document(id) => self.store.chunks_by_document(id).await,
            ScopeTarget::Company(id) => self.store.chunks_by_company(id).await,
        }
    }

    async fn run_ensemble(&self, target: ScopeTarget, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let rows = self.scope_rows(target).await?;
        let document_ids = distinct_document_ids(&rows);
        let index = LexicalIndex::build(rows)?;

        let lexical_fut = async { index.search(query, limit) };
        let ann_fut = async {
            let embedding = self.embedder.embed_or_empty(query).await;
            self.ann
                .search_similar_chunks(&embedding, &document_ids, limit, self.options.distance_threshold)
                .await
        };

        // both signals settle before fusing; a failing constituent
        // contributes an empty list instead of aborting the other
        let (lexical_hits, ann_result) = tokio::join!(lexical_fut, ann_fut);
        let ann_hits = ann_result.unwrap_or_else(|e| {
            warn!(error = %e, "ANN constituent failed inside ensemble");
            Vec::new()
        });

        let method = target.ensemble_method();
        let lexical_list: Vec<SearchHit> = lexical_hits
            .into_iter()
            .map(|h| lexical_to_hit(h, target.scope(), method))
            .collect();
        let ann_list: Vec<SearchHit> = ann_hits
            .into_iter()
            .map(|h| ann_to_hit(h, target.scope(), method))
            .collect();

        let mut fused = fuse_weighted(&[lexical_list, ann_list], &self.options.weights, limit);
        let now = Utc::now();
        for hit in &mut fused {
            hit.metadata.retrieval_method = method;
            hit.metadata.timestamp = now;
        }
        Ok(fused)
    }

    async fn run_lexical_only(&self, target: ScopeTarget, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let rows = self.scope_rows(target).await?;
        let index = LexicalIndex::build(rows)?;
        let method = target.bm25_fallback_method();

        Ok(index
            .search(query, limit)
            .into_iter()
            .map(|h| lexical_to_hit(h, target.scope(), method))
            .collect())
    }

    async fn run_ann_fallback(&self, target: ScopeTarget, query: &str) -> Result<Vec<SearchHit>> {
        let embedding = self.embedder.embed_or_empty(query).await;
        if embedding.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.scope_rows(target).await?;
        let document_ids = distinct_document_ids(&rows);

        let hits = self
            .ann
            .search_similar_chunks(&embedding, &document_ids, ANN_FALLBACK_LIMIT, ANN_FALLBACK_THRESHOLD)
            .await?;

        Ok(hits
            .into_iter()
            .map(|h| ann_to_hit(h, target.scope(), RetrievalMethod::AnnFallback))
            .collect())
    }

    async fn run_traditional_fallback(&self, target: ScopeTarget, query: &str) -> Result<Vec<SearchHit>> {
        let embedding = self.embedder.embed_or_empty(query).await;
        if embedding.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.scope_rows(target).await?;
        let filter = ChunkFilter::documents(distinct_document_ids(&rows));

        let scored = self
            .store
            .nearest_chunks(&embedding, &filter, TRADITIONAL_FALLBACK_LIMIT)
            .await?;

        Ok(scored
            .into_iter()
            .map(|s| ann_to_hit(AnnHit::from(s), target.scope(), RetrievalMethod::TraditionalFallback))
            .collect())
    }
}

fn distinct_document_ids(rows: &[ChunkRecord]) -> Vec<i64> {
    rows.iter()
        .map(|c| c.document_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn lexical_to_hit(hit: LexicalHit, scope: SearchScope, method: RetrievalMethod) -> SearchHit {
    SearchHit {
        content: hit.chunk.content.clone(),
        metadata: HitMetadata {
            chunk_id: hit.chunk.id,
            page: hit.chunk.page,
            document_id: hit.chunk.document_id,
            document_title: hit.chunk.document_title,
            distance: None,
            source: "bm25".to_string(),
            search_scope: scope,
            retrieval_method: method,
            timestamp: Utc::now(),
        },
    }
}

fn ann_to_hit(hit: AnnHit, scope: SearchScope, method: RetrievalMethod) -> SearchHit {
    SearchHit {
        content: hit.chunk.content.clone(),
        metadata: HitMetadata {
            chunk_id: hit.chunk.id,
            page: hit.chunk.page,
            document_id: hit.chunk.document_id,
            document_title: hit.chunk.document_title,
            distance: Some(hit.distance),
            source: "ann".to_string(),
            search_scope: scope,
            retrieval_method: method,
            timestamp: Utc::now(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docsense_common::embeddings::{Embedder, EmbeddingCache};
    use docsense_common::{AppError, MemoryStore, ScoredChunk};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_options_from_config() {
        let mut config = RetrievalConfig::default();
        config.lexical_weight = 0.5;
        config.ann_weight = 0.5;
        config.distance_threshold = 0.9;

        let options = EnsembleOptions::from_config(&config);
        assert_eq!(options.weights, [0.5, 0.5]);
        assert_eq!(options.distance_threshold, 0.9);
    }

    /// Embedder returning one fixed vector for every input
    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dimension(&self) -> usize {
            self.0.len()
        }
    }

    fn retriever_over(store: Arc<dyn ChunkStore>, query_embedding: Vec<f32>) -> EnsembleRetriever {
        let embedder = Arc::new(CachedEmbedder::new(
            Arc::new(FixedEmbedder(query_embedding)),
            Arc::new(EmbeddingCache::new()),
        ));
        let ann = Arc::new(AnnOptimizer::with_defaults(store.clone()));
        EnsembleRetriever::new(store, embedder, ann, EnsembleOptions::default())
    }

    #[tokio::test]
    async fn test_lexical_hit_survives_when_ann_finds_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.add_document(1, 1, "Policies");
        // embeddings sit far beyond the 0.7 distance threshold
        store.add_chunk(1, 1, 1, "general introduction", Some(vec![10.0, 0.0]));
        store.add_chunk(2, 1, 2, "the refund policy allows returns", Some(vec![10.0, 0.0]));
        store.add_chunk(3, 1, 3, "office locations", Some(vec![10.0, 0.0]));

        let retriever = retriever_over(store, vec![0.0, 0.0]);
        let hits = retriever.search_document(1, "refund policy", 10).await;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.chunk_id, 2);
        assert_eq!(
            hits[0].metadata.retrieval_method,
            RetrievalMethod::DocumentEnsembleRrf
        );
        assert_eq!(hits[0].metadata.search_scope, SearchScope::Document);
    }

    #[tokio::test]
    async fn test_empty_document_never_throws() {
        let store = Arc::new(MemoryStore::new());
        store.add_document(1, 1, "Empty");

        let retriever = retriever_over(store, vec![1.0, 0.0]);
        let hits = retriever.search_document(1, "anything", 10).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_ann_weight_dominates_on_equal_ranks() {
        let store = Arc::new(MemoryStore::new());
        store.add_document(1, 1, "Doc");
        // chunk 1 wins lexically, chunk 2 wins by vector distance
        store.add_chunk(1, 1, 1, "refund refund refund", Some(vec![5.0, 0.0]));
        store.add_chunk(2, 1, 2, "refund", Some(vec![1.0, 0.0]));

        let retriever = retriever_over(store, vec![1.0, 0.0]);
        let hits = retriever.search_document(1, "refund", 10).await;

        assert_eq!(hits[0].metadata.chunk_id, 2);
    }

    #[tokio::test]
    async fn test_company_scope_spans_documents() {
        let store = Arc::new(MemoryStore::new());
        store.add_document(1, 7, "First");
        store.add_document(2, 7, "Second");
        store.add_chunk(1, 1, 1, "alpha topic", Some(vec![1.0, 0.0]));
        store.add_chunk(2, 2, 1, "beta topic", Some(vec![1.0, 0.0]));

        let retriever = retriever_over(store, vec![1.0, 0.0]);
        let hits = retriever.search_company(7, "topic", 10).await;

        let documents: BTreeSet<i64> = hits.iter().map(|h| h.metadata.document_id).collect();
        assert_eq!(documents, BTreeSet::from([1, 2]));
        assert!(hits
            .iter()
            .all(|h| h.metadata.retrieval_method == RetrievalMethod::CompanyEnsembleRrf));
    }

    /// Store whose scope queries fail a fixed number of times before
    /// delegating, for exercising the fallback tiers
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicUsize,
    }

    impl FlakyStore {
        fn failing_once(inner: MemoryStore) -> Self {
            Self {
                inner,
                failures_left: AtomicUsize::new(1),
            }
        }

        fn take_failure(&self) -> bool {
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl ChunkStore for FlakyStore {
        async fn chunks_by_document(&self, document_id: i64) -> Result<Vec<ChunkRecord>> {
            if self.take_failure() {
                return Err(AppError::DatabaseConnection {
                    message: "connection reset".into(),
                });
            }
            self.inner.chunks_by_document(document_id).await
        }

        async fn chunks_by_company(&self, company_id: i64) -> Result<Vec<ChunkRecord>> {
            self.inner.chunks_by_company(company_id).await
        }

        async fn nearest_chunks(
            &self,
            embedding: &[f32],
            filter: &ChunkFilter,
            limit: usize,
        ) -> Result<Vec<ScoredChunk>> {
            self.inner.nearest_chunks(embedding, filter, limit).await
        }

        async fn chunks_containing(
            &self,
            document_ids: &[i64],
            needle: &str,
            limit: usize,
        ) -> Result<Vec<ChunkRecord>> {
            self.inner.chunks_containing(document_ids, needle, limit).await
        }
    }

    #[tokio::test]
    async fn test_transient_scope_failure_lands_on_bm25_fallback() {
        let inner = MemoryStore::new();
        inner.add_document(1, 1, "Doc");
        inner.add_chunk(1, 1, 1, "refund policy details", Some(vec![10.0, 0.0]));

        let store = Arc::new(FlakyStore::failing_once(inner));
        let retriever = retriever_over(store, vec![0.0, 0.0]);
        let hits = retriever.search_document(1, "refund", 10).await;

        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].metadata.retrieval_method,
            RetrievalMethod::DocumentBm25Fallback
        );
    }

    /// Store whose nearest-neighbor queries fail a fixed number of times
    /// before delegating, counting every attempt
    struct FlakyNearestStore {
        inner: MemoryStore,
        failures_left: AtomicUsize,
        nearest_calls: AtomicUsize,
    }

    impl FlakyNearestStore {
        fn failing(inner: MemoryStore, failures: usize) -> Self {
            Self {
                inner,
                failures_left: AtomicUsize::new(failures),
                nearest_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChunkStore for FlakyNearestStore {
        async fn chunks_by_document(&self, document_id: i64) -> Result<Vec<ChunkRecord>> {
            self.inner.chunks_by_document(document_id).await
        }

        async fn chunks_by_company(&self, company_id: i64) -> Result<Vec<ChunkRecord>> {
            self.inner.chunks_by_company(company_id).await
        }

        async fn nearest_chunks(
            &self,
            embedding: &[f32],
            filter: &ChunkFilter,
            limit: usize,
        ) -> Result<Vec<ScoredChunk>> {
            self.nearest_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(AppError::DatabaseConnection {
                    message: "connection reset".into(),
                });
            }
            self.inner.nearest_chunks(embedding, filter, limit).await
        }

        async fn chunks_containing(
            &self,
            document_ids: &[i64],
            needle: &str,
            limit: usize,
        ) -> Result<Vec<ChunkRecord>> {
            self.inner.chunks_containing(document_ids, needle, limit).await
        }
    }

    #[tokio::test]
    async fn test_traditional_fallback_after_vector_tiers_fail() {
        let inner = MemoryStore::new();
        inner.add_document(1, 1, "Doc");
        // no lexical overlap with the query; four candidates so the final
        // tier's limit of three is observable
        inner.add_chunk(1, 1, 1, "unrelated wording entirely", Some(vec![0.9, 0.0]));
        inner.add_chunk(2, 1, 2, "more unrelated prose", Some(vec![1.1, 0.0]));
        inner.add_chunk(3, 1, 3, "nothing in common here", Some(vec![1.3, 0.0]));
        inner.add_chunk(4, 1, 4, "still nothing shared", Some(vec![1.5, 0.0]));

        // first failure swallows the ensemble's ANN constituent, second
        // fails the thresholded fallback outright; the direct store query
        // is the first one allowed through
        let store = Arc::new(FlakyNearestStore::failing(inner, 2));
        let retriever = retriever_over(store.clone(), vec![0.0, 0.0]);
        let hits = retriever.search_document(1, "refund", 10).await;

        assert_eq!(hits.len(), 3);
        assert!(hits
            .iter()
            .all(|h| h.metadata.retrieval_method == RetrievalMethod::TraditionalFallback));
        // nearest by distance, no threshold applied even above 0.8
        assert_eq!(hits[0].metadata.chunk_id, 1);
        let distance = hits[0].metadata.distance.expect("distance recorded");
        assert!((distance - 0.9).abs() < 1e-6);
        assert_eq!(store.nearest_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_vector_tiers_skipped_on_empty_embedding() {
        let inner = MemoryStore::new();
        inner.add_document(1, 1, "Doc");
        inner.add_chunk(1, 1, 1, "unrelated wording entirely", Some(vec![0.5, 0.0]));

        let store = Arc::new(FlakyNearestStore::failing(inner, 0));
        // an embedder yielding no vector keeps every vector tier inert
        let retriever = retriever_over(store.clone(), Vec::new());
        let hits = retriever.search_document(1, "refund", 10).await;

        assert!(hits.is_empty());
        assert_eq!(store.nearest_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ann_fallback_when_ensemble_is_empty() {
        let store = Arc::new(MemoryStore::new());
        store.add_document(1, 1, "Doc");
        // no lexical overlap with the query, vector distance 0.75: above
        // the ensemble threshold (0.7) but under the fallback one (0.8)
        store.add_chunk(1, 1, 1, "unrelated wording entirely", Some(vec![0.75, 0.0]));

        let retriever = retriever_over(store, vec![0.0, 0.0]);
        let hits = retriever.search_document(1, "refund", 10).await;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.retrieval_method, RetrievalMethod::AnnFallback);
        assert_eq!(hits[0].metadata.distance, Some(0.75));
    }
}
