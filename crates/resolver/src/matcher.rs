//! Layered document matching
//!
//! Determines whether a referenced artifact already exists among a
//! company's other documents. Strategies run in priority order as pure
//! scoring passes, each emitting `(candidate, confidence, evidence)`
//! matches; an explicit reducer merges them into at most two calibrated
//! suggestions. The contextual ANN pass only runs when the cheaper layers
//! leave fewer than two strong candidates.

use crate::extractor::DocumentReference;
use crate::patterns::{clean_text, extract_identifier, has_reference_keyword, truncate_text};
use docsense_common::embeddings::CachedEmbedder;
use docsense_common::{with_retry, ChunkStore, DocumentRecord, DocumentStore, Result};
use docsense_retrieval::AnnOptimizer;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Candidates needed above [`STRONG_CONFIDENCE`] before the contextual
/// layer is skipped
const STRONG_CANDIDATE_TARGET: usize = 2;
const STRONG_CONFIDENCE: f64 = 0.7;
/// Distance cutoff for contextual queries, stricter than retrieval's
const CONTEXTUAL_DISTANCE_THRESHOLD: f64 = 0.3;
const CONTEXTUAL_QUERY_LIMIT: usize = 5;
/// Final score ceiling after all bonuses
const MAX_SIMILARITY: f64 = 0.98;
/// Contextual validation never certifies above this
const MAX_CONTEXTUAL_CONFIDENCE: f64 = 0.85;
/// Minimum final score to surface a suggestion
const MIN_SIMILARITY: f64 = 0.4;
const MAX_SUGGESTIONS: usize = 2;

/// Which scoring pass produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLayer {
    Exact,
    Title,
    Contextual,
}

/// One scoring pass's verdict on one candidate document
#[derive(Debug, Clone)]
struct LayerMatch {
    document_id: i64,
    confidence: f64,
    page: i32,
    snippet: String,
    evidence: String,
    layer: MatchLayer,
}

/// A calibrated suggestion for where a reference may already live
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSuggestion {
    pub document_id: i64,
    pub document_title: String,
    pub similarity: f64,
    pub page: i32,
    pub snippet: String,
    /// Raw confidence from the exact layer, when it contributed. Drives the
    /// resolved-vs-missing decision upstream.
    pub exact_confidence: Option<f64>,
    pub matched_layers: Vec<MatchLayer>,
}

/// Layered matcher over a company's document corpus
pub struct DocumentMatcher {
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    embedder: Arc<CachedEmbedder>,
    ann: Arc<AnnOptimizer>,
    max_retries: u32,
    initial_retry_delay: Duration,
}

impl DocumentMatcher {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        embedder: Arc<CachedEmbedder>,
        ann: Arc<AnnOptimizer>,
    ) -> Self {
        Self {
            documents,
            chunks,
            embedder,
            ann,
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(1000),
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, initial_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_retry_delay = initial_delay;
        self
    }

    /// Find at most two suggestions for where `reference` may already be
    /// satisfied within the company, excluding the referencing document.
    /// Exhausted retries on the document listing propagate; everything else
    /// degrades to fewer suggestions.
    pub async fn find_suggestions(
        &self,
        reference: &DocumentReference,
        company_id: i64,
        current_document_id: i64,
    ) -> Result<Vec<DocumentSuggestion>> {
        let documents = with_retry(
            "company document listing",
            self.max_retries,
            self.initial_retry_delay,
            || self.documents.company_documents(company_id, Some(current_document_id)),
        )
        .await?;

        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let document_ids: Vec<i64> = documents.iter().map(|d| d.id).collect();
        let titles: HashMap<i64, String> =
            documents.iter().map(|d| (d.id, d.title.clone())).collect();

        let mut matches = self.exact_reference_matches(reference, &document_ids).await;
        matches.extend(title_matches(reference, &documents));

        let strong = matches
            .iter()
            .filter(|m| m.confidence > STRONG_CONFIDENCE)
            .count();
        if strong < STRONG_CANDIDATE_TARGET {
            debug!(
                reference = %reference.document_name,
                strong,
                "Few strong candidates, running contextual search"
            );
            matches.extend(self.contextual_matches(reference, &document_ids).await);
        }

        Ok(reduce(matches, &titles))
    }

    /// Layer 1: literal containment of the name, a quoted variant, and the
    /// type + last-word variant
    async fn exact_reference_matches(
        &self,
        reference: &DocumentReference,
        document_ids: &[i64],
    ) -> Vec<LayerMatch> {
        let name = reference.document_name.to_lowercase();
        let quoted = format!("\"{}\"", name);
        let variant = match reference.document_name.split_whitespace().last() {
            Some(last) => format!("{} {}", reference.document_type.to_lowercase(), last.to_lowercase()),
            None => return Vec::new(),
        };

        let mut matches = Vec::new();
        for term in [name.clone(), quoted.clone(), variant] {
            if term.len() < 3 {
                continue;
            }

            let needle = term.replace('"', "");
            let rows = match self.chunks.chunks_containing(document_ids, &needle, 3).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(term = %needle, error = %e, "Exact containment query failed");
                    continue;
                }
            };

            for row in rows {
                let content = row.content.to_lowercase();
                let has_quoted = content.contains(&quoted);
                let has_exact = content.contains(&name);

                let (confidence, evidence) = if has_quoted {
                    (0.95, "Exact quoted reference")
                } else if has_exact {
                    (0.85, "Exact name match")
                } else {
                    (0.70, "Type and identifier match")
                };

                matches.push(LayerMatch {
                    document_id: row.document_id,
                    confidence,
                    page: row.page,
                    snippet: truncate_text(&row.content, 120),
                    evidence: evidence.to_string(),
                    layer: MatchLayer::Exact,
                });
            }
        }

        matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(MAX_SUGGESTIONS);
        matches
    }

    /// Layer 3: paraphrased ANN queries restricted to the other documents,
    /// best hit per document, each validated by layer 4
    async fn contextual_matches(
        &self,
        reference: &DocumentReference,
        document_ids: &[i64],
    ) -> Vec<LayerMatch> {
        let last_word = reference
            .document_name
            .split_whitespace()
            .last()
            .unwrap_or(&reference.document_name);
        let queries = [
            format!("{} containing {}", reference.document_type, last_word),
            format!("document attachment {}", reference.document_name),
            format!("referenced {}", reference.document_name),
        ];

        // best raw hit per candidate document across all paraphrases
        let mut best: HashMap<i64, (f64, i32, String)> = HashMap::new();

        for query in &queries {
            let embedding = self.embedder.embed_or_empty(query).await;
            if embedding.is_empty() {
                continue;
            }

            let hits = match self
                .ann
                .search_similar_chunks(
                    &embedding,
                    document_ids,
                    CONTEXTUAL_QUERY_LIMIT,
                    CONTEXTUAL_DISTANCE_THRESHOLD,
                )
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(query = %query, error = %e, "Contextual ANN query failed");
                    continue;
                }
            };

            for hit in hits {
                // scaled down so contextual evidence alone never rivals
                // an exact match
                let similarity = ((1.0 - hit.distance) * 0.7).max(0.0);
                let entry = best.entry(hit.chunk.document_id).or_insert((
                    similarity,
                    hit.chunk.page,
                    hit.chunk.content.clone(),
                ));
                if similarity > entry.0 {
                    *entry = (similarity, hit.chunk.page, hit.chunk.content.clone());
                }
            }
        }

        best.into_iter()
            .filter_map(|(document_id, (similarity, page, content))| {
                validate_contextual_match(reference, &content, similarity).map(
                    |(confidence, evidence)| LayerMatch {
                        document_id,
                        confidence,
                        page,
                        snippet: truncate_text(&content, 100),
                        evidence,
                        layer: MatchLayer::Contextual,
                    },
                )
            })
            .collect()
    }
}

/// Layer 2: compare the reference's identifier and type against titles
fn title_matches(reference: &DocumentReference, documents: &[DocumentRecord]) -> Vec<LayerMatch> {
    let clean_name = clean_text(&reference.document_name);
    let clean_type = clean_text(&reference.document_type);
    let identifier = extract_identifier(&reference.document_name);

    let mut matches = Vec::new();
    for doc in documents {
        let title = clean_text(&doc.title);

        let both_present = identifier
            .as_ref()
            .map(|id| title.contains(id.as_str()) && !clean_type.is_empty() && title.contains(&clean_type))
            .unwrap_or(false);
        let adjacent = identifier
            .as_ref()
            .map(|id| title.contains(&format!("{clean_type} {id}")))
            .unwrap_or(false);

        let (confidence, evidence) = if both_present && adjacent {
            (0.92, "Identifier and type in title")
        } else if !clean_name.is_empty() && title.contains(&clean_name) {
            (0.88, "Document name in title")
        } else if both_present {
            (0.75, "Type and identifier in title, not adjacent")
        } else if !clean_type.is_empty() && title.contains(&clean_type) {
            (0.45, "Document type in title")
        } else {
            continue;
        };

        if confidence > MIN_SIMILARITY {
            matches.push(LayerMatch {
                document_id: doc.id,
                confidence,
                page: 1,
                snippet: format!("Title: \"{}\"", doc.title),
                evidence: evidence.to_string(),
                layer: MatchLayer::Title,
            });
        }
    }

    matches
}

/// Layer 4: certify a contextual hit only when its chunk text actually
/// speaks about the reference
fn validate_contextual_match(
    reference: &DocumentReference,
    content: &str,
    base_similarity: f64,
) -> Option<(f64, String)> {
    let content_lower = content.to_lowercase();
    let name = reference.document_name.to_lowercase();
    let doc_type = reference.document_type.to_lowercase();

    let has_name = content_lower.contains(&name);
    let has_type = !doc_type.is_empty() && content_lower.contains(&doc_type);
    let has_keyword = has_reference_keyword(&content_lower);

    let mut confidence = base_similarity;
    let mut evidence = Vec::new();

    if has_name {
        confidence += 0.25;
        evidence.push("contains document name");
    }
    if has_type && has_keyword {
        confidence += 0.15;
        evidence.push("document type with reference context");
    }
    // long chunks without the name are likely coincidental neighbors
    if content.len() > 500 && !has_name {
        confidence -= 0.1;
    }

    let valid = (has_name || (has_type && has_keyword)) && confidence > MIN_SIMILARITY;
    valid.then(|| {
        (
            confidence.min(MAX_CONTEXTUAL_CONFIDENCE),
            evidence.join(", "),
        )
    })
}

/// Merge all layers into final suggestions: max confidence wins per
/// document, exact-layer scores are boosted, multi-layer and ANN-usage
/// bonuses apply, everything is capped and thresholded
fn reduce(matches: Vec<LayerMatch>, titles: &HashMap<i64, String>) -> Vec<DocumentSuggestion> {
    let mut grouped: HashMap<i64, Vec<LayerMatch>> = HashMap::new();
    for m in matches {
        grouped.entry(m.document_id).or_default().push(m);
    }

    let mut suggestions: Vec<DocumentSuggestion> = grouped
        .into_iter()
        .filter_map(|(document_id, layer_matches)| {
            let best = layer_matches
                .iter()
                .max_by(|a, b| {
                    boosted(a)
                        .partial_cmp(&boosted(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })?
                .clone();

            let mut layers: Vec<MatchLayer> = Vec::new();
            for m in &layer_matches {
                if !layers.contains(&m.layer) {
                    layers.push(m.layer);
                }
            }

            let mut score = boosted(&best);
            if layers.len() > 1 {
                score += 0.10;
            }
            if layers.contains(&MatchLayer::Contextual) {
                score += 0.05;
            }
            let score = score.min(MAX_SIMILARITY);

            if score < MIN_SIMILARITY {
                return None;
            }

            let exact_confidence = layer_matches
                .iter()
                .filter(|m| m.layer == MatchLayer::Exact)
                .map(|m| m.confidence)
                .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.max(c))));

            Some(DocumentSuggestion {
                document_id,
                document_title: titles
                    .get(&document_id)
                    .cloned()
                    .unwrap_or_else(|| format!("Document {document_id}")),
                similarity: (score * 100.0).round() / 100.0,
                page: best.page,
                snippet: format!("{} ({})", best.snippet, best.evidence),
                exact_confidence,
                matched_layers: layers,
            })
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

/// Exact-layer matches carry a 1.2x boost into the final score
fn boosted(m: &LayerMatch) -> f64 {
    match m.layer {
        MatchLayer::Exact => (m.confidence * 1.2).min(MAX_SIMILARITY),
        _ => m.confidence,
    }
}
