//! Whole-document predictive analysis
//!
//! Binds extraction and resolution into one pass over a document:
//! extract references from its chunks, resolve each against the rest of
//! the company corpus, and report what is missing alongside what was
//! found. Unresolved references are the product here; a resolver error
//! for a single reference downgrades that reference to missing instead
//! of failing the run.

use crate::extractor::{deduplicate_references, DocumentReference, ReferenceExtractor};
use crate::matcher::DocumentSuggestion;
use crate::resolution::{ReferenceResolver, ResolutionOutcome};
use crate::websearch::{SearchResult, WebSearch};
use docsense_common::{ChunkStore, DocumentStore, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Bounded concurrency for per-reference resolution
const RESOLVE_CONCURRENCY: usize = 20;
/// Bounded concurrency for enrichment queries
const WEB_SEARCH_CONCURRENCY: usize = 3;
/// Results fetched per enrichment query
const WEB_SEARCH_LIMIT: usize = 3;

const MISSING_REASON: &str = "Not found in any company documents";
const RESOLVED_REASON: &str = "Found in company document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingDocumentPrediction {
    pub document_name: String,
    pub document_type: String,
    pub reason: String,
    pub page: i32,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_company_documents: Option<Vec<DocumentSuggestion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_links: Option<Vec<SearchResult>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedReference {
    pub document_name: String,
    pub document_type: String,
    pub reason: String,
    pub original_page: i32,
    pub resolved_document_id: i64,
    pub resolved_page: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_document_title: Option<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictiveAnalysis {
    pub missing_documents: Vec<MissingDocumentPrediction>,
    pub resolved_references: Vec<ResolvedReference>,
}

/// One-pass analysis driver
pub struct AnalysisEngine {
    chunks: Arc<dyn ChunkStore>,
    documents: Arc<dyn DocumentStore>,
    extractor: ReferenceExtractor,
    resolver: Arc<ReferenceResolver>,
    web_search: Option<Arc<dyn WebSearch>>,
}

impl AnalysisEngine {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        documents: Arc<dyn DocumentStore>,
        extractor: ReferenceExtractor,
        resolver: Arc<ReferenceResolver>,
    ) -> Self {
        Self {
            chunks,
            documents,
            extractor,
            resolver,
            web_search: None,
        }
    }

    /// Enable link suggestions for high-priority missing documents
    pub fn with_web_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.web_search = Some(search);
        self
    }

    /// Analyze one document against its company's corpus
    pub async fn analyze(&self, document_id: i64, company_id: i64) -> Result<PredictiveAnalysis> {
        let chunks = self.chunks.chunks_by_document(document_id).await?;
        if chunks.is_empty() {
            return Ok(PredictiveAnalysis::default());
        }

        let references = deduplicate_references(self.extractor.extract(&chunks).await);
        info!(
            document_id,
            company_id,
            references = references.len(),
            "Resolving extracted references"
        );
        if references.is_empty() {
            return Ok(PredictiveAnalysis::default());
        }

        let titles: HashMap<i64, String> = self
            .documents
            .company_documents(company_id, Some(document_id))
            .await?
            .into_iter()
            .map(|doc| (doc.id, doc.title))
            .collect();

        let outcomes: Vec<(DocumentReference, Result<ResolutionOutcome>)> =
            stream::iter(references.into_iter().map(|reference| {
                let resolver = Arc::clone(&self.resolver);
                async move {
                    let outcome = resolver.resolve(&reference, company_id, document_id).await;
                    (reference, outcome)
                }
            }))
            .buffered(RESOLVE_CONCURRENCY)
            .collect()
            .await;

        let mut analysis = PredictiveAnalysis::default();
        for (reference, outcome) in outcomes {
            match outcome {
                Ok(ResolutionOutcome::Resolved {
                    document_id: resolved_id,
                    page,
                    ..
                }) => analysis.resolved_references.push(ResolvedReference {
                    document_name: reference.document_name,
                    document_type: reference.document_type,
                    reason: RESOLVED_REASON.to_string(),
                    original_page: reference.page,
                    resolved_document_id: resolved_id,
                    resolved_page: page,
                    resolved_document_title: titles.get(&resolved_id).cloned(),
                    priority: Priority::Low,
                }),
                Ok(ResolutionOutcome::Missing { suggestions }) => {
                    analysis
                        .missing_documents
                        .push(missing_prediction(reference, suggestions));
                }
                Err(error) => {
                    warn!(
                        reference = %reference.document_name,
                        %error,
                        "Resolution failed, recording as missing"
                    );
                    analysis
                        .missing_documents
                        .push(missing_prediction(reference, Vec::new()));
                }
            }
        }

        if let Some(search) = &self.web_search {
            enrich_with_links(&mut analysis.missing_documents, search.as_ref()).await;
        }

        info!(
            document_id,
            missing = analysis.missing_documents.len(),
            resolved = analysis.resolved_references.len(),
            "Analysis completed"
        );
        Ok(analysis)
    }
}

fn missing_prediction(
    reference: DocumentReference,
    suggestions: Vec<DocumentSuggestion>,
) -> MissingDocumentPrediction {
    MissingDocumentPrediction {
        document_name: reference.document_name,
        document_type: reference.document_type,
        reason: MISSING_REASON.to_string(),
        page: reference.page,
        priority: Priority::High,
        suggested_company_documents: if suggestions.is_empty() {
            None
        } else {
            Some(suggestions)
        },
        suggested_links: None,
    }
}

/// Attach template links to high-priority predictions. Search failures
/// leave the prediction without links.
async fn enrich_with_links(missing: &mut [MissingDocumentPrediction], search: &dyn WebSearch) {
    let queries: Vec<(usize, String)> = missing
        .iter()
        .enumerate()
        .filter(|(_, doc)| doc.priority == Priority::High)
        .map(|(i, doc)| {
            let query = format!(
                "{} {} template example site:gov OR site:edu OR site:org",
                doc.document_name, doc.document_type
            );
            (i, query)
        })
        .collect();

    let results: Vec<(usize, Vec<SearchResult>)> =
        stream::iter(queries.into_iter().map(|(i, query)| async move {
            let links = match search.search(&query, WEB_SEARCH_LIMIT).await {
                Ok(links) => links,
                Err(error) => {
                    warn!(%error, "Web search enrichment failed");
                    Vec::new()
                }
            };
            (i, links)
        }))
        .buffer_unordered(WEB_SEARCH_CONCURRENCY)
        .collect()
        .await;

    for (i, links) in results {
        if !links.is_empty() {
            missing[i].suggested_links = Some(links);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::DocumentMatcher;
    use crate::websearch::testing::ScriptedSearch;
    use async_trait::async_trait;
    use docsense_common::embeddings::{CachedEmbedder, Embedder, EmbeddingCache};
    use docsense_common::llm::MockCompletionClient;
    use docsense_common::MemoryStore;
    use docsense_retrieval::AnnOptimizer;

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

    fn engine_over(store: Arc<MemoryStore>, client: Arc<MockCompletionClient>) -> AnalysisEngine {
        let embedder = Arc::new(CachedEmbedder::new(
            Arc::new(FixedEmbedder(vec![10.0, 0.0])),
            Arc::new(EmbeddingCache::new()),
        ));
        let ann = Arc::new(AnnOptimizer::with_defaults(store.clone()));
        let matcher = DocumentMatcher::new(store.clone(), store.clone(), embedder, ann);
        let resolver = Arc::new(ReferenceResolver::new(matcher, store.clone()));
        let extractor = ReferenceExtractor::new(client, std::time::Duration::from_secs(5));
        AnalysisEngine::new(store.clone(), store, extractor, resolver)
    }

    fn extraction_json(entries: &[(&str, &str, i32)]) -> String {
        let refs: Vec<serde_json::Value> = entries
            .iter()
            .map(|(name, doc_type, page)| {
                serde_json::json!({
                    "documentName": name,
                    "documentType": doc_type,
                    "page": page,
                    "contextSnippet": format!("see {name}"),
                })
            })
            .collect();
        serde_json::json!({ "references": refs }).to_string()
    }

    #[tokio::test]
    async fn test_unresolved_reference_becomes_missing_prediction() {
        let store = Arc::new(MemoryStore::new());
        store.add_document(1, 1, "Main Agreement");
        store.add_document(2, 1, "Unrelated Notes");
        store.add_chunk(10, 1, 5, "delivery dates are set forth in Schedule 9", None);
        store.add_chunk(20, 2, 1, "quarterly revenue figures", None);

        let client = Arc::new(MockCompletionClient::new());
        client.queue_response(extraction_json(&[("Schedule 9", "schedule", 5)]));

        let analysis = engine_over(store, client).analyze(1, 1).await.unwrap();

        assert!(analysis.resolved_references.is_empty());
        assert_eq!(analysis.missing_documents.len(), 1);
        let missing = &analysis.missing_documents[0];
        assert_eq!(missing.document_name, "Schedule 9");
        assert_eq!(missing.reason, "Not found in any company documents");
        assert_eq!(missing.priority, Priority::High);
        assert_eq!(missing.page, 5);
    }

    #[tokio::test]
    async fn test_resolved_reference_carries_title() {
        let store = Arc::new(MemoryStore::new());
        store.add_document(1, 1, "Main Agreement");
        store.add_document(5, 1, "Closing Binder");
        store.add_chunk(10, 1, 3, "attached hereto as Exhibit A", None);
        store.add_chunk(50, 5, 7, "this document constitutes Exhibit A", None);

        let client = Arc::new(MockCompletionClient::new());
        client.queue_response(extraction_json(&[("Exhibit A", "exhibit", 3)]));

        let analysis = engine_over(store, client).analyze(1, 1).await.unwrap();

        assert!(analysis.missing_documents.is_empty());
        assert_eq!(analysis.resolved_references.len(), 1);
        let resolved = &analysis.resolved_references[0];
        assert_eq!(resolved.resolved_document_id, 5);
        assert_eq!(resolved.resolved_page, 7);
        assert_eq!(resolved.resolved_document_title.as_deref(), Some("Closing Binder"));
        assert_eq!(resolved.original_page, 3);
    }

    #[tokio::test]
    async fn test_empty_document_yields_empty_analysis() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockCompletionClient::new());

        let analysis = engine_over(store, client).analyze(1, 1).await.unwrap();

        assert!(analysis.missing_documents.is_empty());
        assert!(analysis.resolved_references.is_empty());
    }

    #[tokio::test]
    async fn test_web_search_enriches_high_priority_missing() {
        let store = Arc::new(MemoryStore::new());
        store.add_document(1, 1, "Main Agreement");
        store.add_chunk(10, 1, 5, "obligations listed in Schedule 9", None);

        let client = Arc::new(MockCompletionClient::new());
        client.queue_response(extraction_json(&[("Schedule 9", "schedule", 5)]));

        let search = Arc::new(ScriptedSearch::new());
        search.script(
            "Schedule 9 schedule template",
            vec![SearchResult {
                title: "Schedule template".into(),
                url: "https://example.gov/schedule".into(),
                snippet: "Standard schedule form".into(),
            }],
        );

        let analysis = engine_over(store, client)
            .with_web_search(search)
            .analyze(1, 1)
            .await
            .unwrap();

        let links = analysis.missing_documents[0]
            .suggested_links
            .as_ref()
            .expect("links attached");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.gov/schedule");
    }

    #[tokio::test]
    async fn test_web_search_failure_leaves_prediction_intact() {
        let store = Arc::new(MemoryStore::new());
        store.add_document(1, 1, "Main Agreement");
        store.add_chunk(10, 1, 5, "obligations listed in Schedule 9", None);

        let client = Arc::new(MockCompletionClient::new());
        client.queue_response(extraction_json(&[("Schedule 9", "schedule", 5)]));

        let analysis = engine_over(store, client)
            .with_web_search(Arc::new(ScriptedSearch::failing()))
            .analyze(1, 1)
            .await
            .unwrap();

        assert_eq!(analysis.missing_documents.len(), 1);
        assert!(analysis.missing_documents[0].suggested_links.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_references_resolved_once() {
        let store = Arc::new(MemoryStore::new());
        store.add_document(1, 1, "Main Agreement");
        store.add_chunk(10, 1, 2, "see Exhibit B and also exhibit b", None);

        let client = Arc::new(MockCompletionClient::new());
        client.queue_response(extraction_json(&[
            ("Exhibit B", "exhibit", 2),
            ("exhibit b", "exhibit", 4),
        ]));

        let analysis = engine_over(store.clone(), client).analyze(1, 1).await.unwrap();

        assert_eq!(analysis.missing_documents.len(), 1);
        assert_eq!(store.resolution_count(), 1);
    }
}
