//! In-memory store implementation
//!
//! Exact linear-scan counterpart of [`Repository`], used by tests and by
//! embedded callers that have no Postgres. Nearest-neighbor queries use the
//! same Euclidean distance the SQL `<->` operator computes.
//!
//! [`Repository`]: super::Repository

use crate::db::stores::*;
use crate::errors::Result;
use crate::vector::euclidean_distance;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredDocument {
    id: i64,
    company_id: i64,
    title: String,
}

/// In-memory chunk/document/resolution storage
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<Vec<StoredDocument>>,
    chunks: RwLock<Vec<ChunkRecord>>,
    resolutions: RwLock<Vec<ResolutionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document; chunks reference it by id
    pub fn add_document(&self, id: i64, company_id: i64, title: &str) {
        self.documents.write().unwrap().push(StoredDocument {
            id,
            company_id,
            title: title.to_string(),
        });
    }

    /// Register a chunk under a previously added document
    pub fn add_chunk(&self, id: i64, document_id: i64, page: i32, content: &str, embedding: Option<Vec<f32>>) {
        let title = self.title_of(document_id);
        self.chunks.write().unwrap().push(ChunkRecord {
            id,
            document_id,
            page,
            content: content.to_string(),
            embedding,
            document_title: title,
        });
    }

    /// Pre-seed a resolution outcome (cache-hit tests)
    pub fn seed_resolution(&self, record: ResolutionRecord) {
        self.resolutions.write().unwrap().push(record);
    }

    /// Number of resolution rows currently stored
    pub fn resolution_count(&self) -> usize {
        self.resolutions.read().unwrap().len()
    }

    fn title_of(&self, document_id: i64) -> Option<String> {
        self.documents
            .read()
            .unwrap()
            .iter()
            .find(|d| d.id == document_id)
            .map(|d| d.title.clone())
    }

    fn company_of(&self, document_id: i64) -> Option<i64> {
        self.documents
            .read()
            .unwrap()
            .iter()
            .find(|d| d.id == document_id)
            .map(|d| d.company_id)
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn chunks_by_document(&self, document_id: i64) -> Result<Vec<ChunkRecord>> {
        Ok(self
            .chunks
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn chunks_by_company(&self, company_id: i64) -> Result<Vec<ChunkRecord>> {
        let chunks = self.chunks.read().unwrap();
        Ok(chunks
            .iter()
            .filter(|c| self.company_of(c.document_id) == Some(company_id))
            .cloned()
            .collect())
    }

    async fn nearest_chunks(
        &self,
        embedding: &[f32],
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let chunks = self.chunks.read().unwrap();

        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| {
                filter.document_ids.is_empty() || filter.document_ids.contains(&c.document_id)
            })
            .filter(|c| {
                filter
                    .chunk_ids
                    .as_ref()
                    .map(|ids| ids.contains(&c.id))
                    .unwrap_or(true)
            })
            .filter_map(|c| {
                let chunk_embedding = c.embedding.as_ref()?;
                let distance = euclidean_distance(embedding, chunk_embedding);
                Some(ScoredChunk {
                    chunk: c.clone(),
                    distance,
                })
            })
            .filter(|s| filter.max_distance.map(|m| s.distance <= m).unwrap_or(true))
            .collect();

        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn chunks_containing(
        &self,
        document_ids: &[i64],
        needle: &str,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>> {
        let needle = needle.to_lowercase();
        Ok(self
            .chunks
            .read()
            .unwrap()
            .iter()
            .filter(|c| document_ids.contains(&c.document_id))
            .filter(|c| c.content.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn company_documents(
        &self,
        company_id: i64,
        exclude_document_id: Option<i64>,
    ) -> Result<Vec<DocumentRecord>> {
        Ok(self
            .documents
            .read()
            .unwrap()
            .iter()
            .filter(|d| d.company_id == company_id)
            .filter(|d| Some(d.id) != exclude_document_id)
            .map(|d| DocumentRecord {
                id: d.id,
                title: d.title.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl ResolutionStore for MemoryStore {
    async fn find_resolution(
        &self,
        company_id: i64,
        reference_name: &str,
    ) -> Result<Option<ResolutionRecord>> {
        // Most recent row wins, matching the SQL ORDER BY created_at DESC
        Ok(self
            .resolutions
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.company_id == company_id && r.reference_name == reference_name)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn append_resolution(&self, record: ResolutionRecord) -> Result<()> {
        self.resolutions.write().unwrap().push(record);
        Ok(())
    }

    async fn invalidate_resolution(&self, company_id: i64, reference_name: &str) -> Result<u64> {
        let mut resolutions = self.resolutions.write().unwrap();
        let before = resolutions.len();
        resolutions.retain(|r| !(r.company_id == company_id && r.reference_name == reference_name));
        Ok((before - resolutions.len()) as u64)
    }
}

/// Build a confirmed-missing record stamped now
pub fn missing_record(company_id: i64, reference_name: &str) -> ResolutionRecord {
    ResolutionRecord {
        company_id,
        reference_name: reference_name.to_string(),
        resolved_document_id: None,
        details: None,
        created_at: Utc::now(),
    }
}

/// Build a resolved record stamped now
pub fn resolved_record(
    company_id: i64,
    reference_name: &str,
    details: ResolutionDetails,
) -> ResolutionRecord {
    ResolutionRecord {
        company_id,
        reference_name: reference_name.to_string(),
        resolved_document_id: Some(details.document_id),
        details: Some(details),
        created_at: Utc::now(),
    }
}
