//! LLM-backed reference extraction
//!
//! Extraction is best-effort: the completion call races a deadline and any
//! failure (timeout, transport, malformed JSON) collapses to an empty
//! reference list. The identifier post-filter runs in code so prompt
//! drift cannot widen what survives.

use crate::patterns::{group_content_from_chunks, has_specific_identifier};
use docsense_common::config::ResolverConfig;
use docsense_common::llm::CompletionClient;
use docsense_common::ChunkRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "Extract references step-by-step";

/// A reference to another discrete artifact, as extracted from a document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReference {
    pub document_name: String,
    pub document_type: String,
    pub page: i32,
    pub context_snippet: String,
}

#[derive(Deserialize)]
struct ExtractionResponse {
    references: Vec<DocumentReference>,
}

/// Extracts explicit document references from chunk text
pub struct ReferenceExtractor {
    client: Arc<dyn CompletionClient>,
    timeout: Duration,
}

impl ReferenceExtractor {
    pub fn new(client: Arc<dyn CompletionClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn from_config(client: Arc<dyn CompletionClient>, config: &ResolverConfig) -> Self {
        Self::new(client, Duration::from_millis(config.extraction_timeout_ms))
    }

    /// Extract references from a document's chunks. Never fails; extraction
    /// problems yield an empty list.
    pub async fn extract(&self, chunks: &[ChunkRecord]) -> Vec<DocumentReference> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let prompt = build_extraction_prompt(&group_content_from_chunks(chunks));

        let response = match tokio::time::timeout(
            self.timeout,
            self.client.complete(SYSTEM_PROMPT, &prompt),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "Reference extraction call failed");
                return Vec::new();
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Reference extraction timed out");
                return Vec::new();
            }
        };

        let parsed: ExtractionResponse = match serde_json::from_str(&response) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Reference extraction returned malformed JSON");
                return Vec::new();
            }
        };

        let raw_count = parsed.references.len();
        let filtered: Vec<DocumentReference> = parsed
            .references
            .into_iter()
            .filter(|r| has_specific_identifier(&r.document_name))
            .collect();

        info!(
            raw = raw_count,
            kept = filtered.len(),
            dropped = raw_count - filtered.len(),
            "Extracted references"
        );

        filtered
    }
}

/// Deduplicate by lowercased, trimmed name; the first occurrence wins
pub fn deduplicate_references(references: Vec<DocumentReference>) -> Vec<DocumentReference> {
    let mut seen = HashSet::new();
    references
        .into_iter()
        .filter(|r| seen.insert(r.document_name.trim().to_lowercase()))
        .collect()
}

fn build_extraction_prompt(content: &str) -> String {
    format!(
        r#"You are an expert in extracting references from documents.

Extract ONLY clear, explicit references to separate documents that should be attached or included (e.g., "See Exhibit A", "Schedule 1 attached", "Refer to Addendum B").

IMPORTANT RULES:
- Only extract references that use specific document identifiers (Exhibit A, Schedule 1, Attachment B, etc.)
- Ignore general mentions like "other documents", "additional forms", "related materials"
- Ignore references to external documents that are clearly not part of this document set
- Only include references where the document is expected to be attached or included
- Be very conservative - when in doubt, don't extract it

Respond with a JSON object {{"references": [{{"documentName", "documentType", "page", "contextSnippet"}}]}} where:
- documentName: The specific document identifier (e.g., "Exhibit A", "Schedule 1")
- documentType: The document type (exhibit, schedule, attachment, addendum)
- page: The page number where referenced
- contextSnippet: 15-30 words around the reference showing why it should be included

CONTENT:
{content}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsense_common::llm::MockCompletionClient;

    fn chunk(page: i32, content: &str) -> ChunkRecord {
        ChunkRecord {
            id: page as i64,
            document_id: 1,
            page,
            content: content.to_string(),
            embedding: None,
            document_title: None,
        }
    }

    fn extractor_with(client: MockCompletionClient) -> ReferenceExtractor {
        ReferenceExtractor::new(Arc::new(client), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_extracts_and_filters_references() {
        let client = MockCompletionClient::new();
        client.queue_response(
            r#"{"references": [
                {"documentName": "Exhibit A", "documentType": "exhibit", "page": 3, "contextSnippet": "see Exhibit A attached"},
                {"documentName": "other documents", "documentType": "general", "page": 1, "contextSnippet": "and other documents"}
            ]}"#,
        );

        let extractor = extractor_with(client);
        let refs = extractor.extract(&[chunk(1, "see Exhibit A")]).await;

        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].document_name, "Exhibit A");
        assert_eq!(refs[0].page, 3);
    }

    #[tokio::test]
    async fn test_extraction_failure_yields_empty_list() {
        // nothing queued, so the completion call errors
        let extractor = extractor_with(MockCompletionClient::new());
        assert!(extractor.extract(&[chunk(1, "text")]).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_yields_empty_list() {
        let client = MockCompletionClient::new();
        client.queue_response("not json at all");
        let extractor = extractor_with(client);
        assert!(extractor.extract(&[chunk(1, "text")]).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_chunks_skip_the_call() {
        let extractor = extractor_with(MockCompletionClient::new());
        assert!(extractor.extract(&[]).await.is_empty());
    }

    #[test]
    fn test_dedupe_first_occurrence_wins() {
        let refs = vec![
            DocumentReference {
                document_name: "Exhibit A".into(),
                document_type: "exhibit".into(),
                page: 3,
                context_snippet: "first".into(),
            },
            DocumentReference {
                document_name: " exhibit a ".into(),
                document_type: "exhibit".into(),
                page: 9,
                context_snippet: "second".into(),
            },
            DocumentReference {
                document_name: "Schedule 1".into(),
                document_type: "schedule".into(),
                page: 4,
                context_snippet: "third".into(),
            },
        ];

        let deduped = deduplicate_references(refs);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].context_snippet, "first");
        assert_eq!(deduped[1].document_name, "Schedule 1");
    }
}
