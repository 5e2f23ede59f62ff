//! Store traits at the persistence seam
//!
//! The retrieval and resolver crates depend on these traits rather than on
//! a concrete database, so production code runs over [`Repository`] while
//! tests run over [`MemoryStore`].
//!
//! [`Repository`]: super::Repository
//! [`MemoryStore`]: super::MemoryStore

use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chunk row as retrieval sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: i64,
    pub document_id: i64,
    pub page: i32,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub document_title: Option<String>,
}

/// A chunk with its vector distance to some query embedding (lower = closer)
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub distance: f64,
}

/// Restriction for nearest-neighbor queries
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    /// Restrict to these documents (empty = no document restriction)
    pub document_ids: Vec<i64>,

    /// Restrict to these chunk ids (cluster probing)
    pub chunk_ids: Option<Vec<i64>>,

    /// Exclude hits beyond this distance
    pub max_distance: Option<f64>,
}

impl ChunkFilter {
    pub fn documents(document_ids: Vec<i64>) -> Self {
        Self {
            document_ids,
            ..Default::default()
        }
    }
}

/// A document row as the matcher sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub title: String,
}

/// Supporting evidence stored alongside a resolved reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionDetails {
    pub document_id: i64,
    pub page: i32,
    pub snippet: String,
}

/// The durable outcome of a past resolution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub company_id: i64,
    pub reference_name: String,
    /// None means "confirmed missing"
    pub resolved_document_id: Option<i64>,
    pub details: Option<ResolutionDetails>,
    pub created_at: DateTime<Utc>,
}

/// Queryable chunk storage with vector-distance ordering
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// All chunks of one document, in insertion order
    async fn chunks_by_document(&self, document_id: i64) -> Result<Vec<ChunkRecord>>;

    /// All chunks across a company's documents, joined with document titles
    async fn chunks_by_company(&self, company_id: i64) -> Result<Vec<ChunkRecord>>;

    /// Nearest chunks to `embedding` under `filter`, ordered by ascending
    /// distance, at most `limit` rows
    async fn nearest_chunks(
        &self,
        embedding: &[f32],
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Chunks whose content contains `needle` case-insensitively, restricted
    /// to `document_ids`
    async fn chunks_containing(
        &self,
        document_ids: &[i64],
        needle: &str,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>>;
}

/// Queryable document storage
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents of a company, optionally excluding one (the source document
    /// of a reference search)
    async fn company_documents(
        &self,
        company_id: i64,
        exclude_document_id: Option<i64>,
    ) -> Result<Vec<DocumentRecord>>;
}

/// Append-only resolution cache storage
#[async_trait]
pub trait ResolutionStore: Send + Sync {
    /// Most recent outcome for `(company_id, reference_name)`, if any
    async fn find_resolution(
        &self,
        company_id: i64,
        reference_name: &str,
    ) -> Result<Option<ResolutionRecord>>;

    /// Append a new outcome row; never updates in place
    async fn append_resolution(&self, record: ResolutionRecord) -> Result<()>;

    /// Remove all outcome rows for a reference. This is the manual
    /// correction path for a mis-resolved reference; the default append-only
    /// flow never calls it.
    async fn invalidate_resolution(&self, company_id: i64, reference_name: &str) -> Result<u64>;
}
