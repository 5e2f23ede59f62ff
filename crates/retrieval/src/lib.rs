//! Docsense retrieval pipeline
//!
//! Provides the hybrid retrieval stack:
//! - Lexical BM25 index built on demand over a bounded candidate set
//! - ANN optimizer with size-adaptive strategy dispatch and cluster caching
//! - Weighted reciprocal rank fusion
//! - Ensemble retriever with a graceful fallback ladder

pub mod ann;
pub mod ensemble;
pub mod fusion;
pub mod lexical;

pub use ann::{
    AnnConfig, AnnHit, AnnOptimizer, AnnStrategy, ClusterCache, ClusterCacheStats, DocumentCluster,
};
pub use ensemble::{EnsembleOptions, EnsembleRetriever};
pub use fusion::{fuse, fuse_weighted, RRF_K};
pub use lexical::{LexicalHit, LexicalIndex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The boundary a search is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// One document's chunks
    Document,
    /// The union of chunks across a company's documents
    Company,
}

impl SearchScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchScope::Document => "document",
            SearchScope::Company => "company",
        }
    }
}

/// Which retrieval path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    DocumentEnsembleRrf,
    CompanyEnsembleRrf,
    DocumentBm25Fallback,
    CompanyBm25Fallback,
    AnnFallback,
    TraditionalFallback,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::DocumentEnsembleRrf => "document_ensemble_rrf",
            RetrievalMethod::CompanyEnsembleRrf => "company_ensemble_rrf",
            RetrievalMethod::DocumentBm25Fallback => "document_bm25_fallback",
            RetrievalMethod::CompanyBm25Fallback => "company_bm25_fallback",
            RetrievalMethod::AnnFallback => "ann_fallback",
            RetrievalMethod::TraditionalFallback => "traditional_fallback",
        }
    }

    /// True for the tiers below the primary ensemble path
    pub fn is_fallback(&self) -> bool {
        !matches!(
            self,
            RetrievalMethod::DocumentEnsembleRrf | RetrievalMethod::CompanyEnsembleRrf
        )
    }
}

/// Metadata attached to every retrieved hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitMetadata {
    pub chunk_id: i64,
    pub page: i32,
    pub document_id: i64,
    pub document_title: Option<String>,
    /// Vector distance when the hit came through an ANN path
    pub distance: Option<f64>,
    /// Which signal contributed the hit (e.g. "bm25", "ann", "rrf")
    pub source: String,
    pub search_scope: SearchScope,
    pub retrieval_method: RetrievalMethod,
    pub timestamp: DateTime<Utc>,
}

/// A retrieved chunk with provenance metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub metadata: HitMetadata,
}
