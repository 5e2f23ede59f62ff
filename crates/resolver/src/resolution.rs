//! Reference resolution with durable outcome caching
//!
//! Every `(company, reference name)` pair is resolved at most once per
//! cache lifetime: a stored outcome short-circuits the layered search
//! entirely and is returned verbatim. Outcomes are recorded append-only;
//! correcting a stale verdict goes through the store's invalidate hook,
//! never through an update.

use crate::extractor::DocumentReference;
use crate::matcher::{DocumentMatcher, DocumentSuggestion};
use chrono::Utc;
use docsense_common::{ResolutionDetails, ResolutionRecord, ResolutionStore, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Exact-layer confidence at or above which a reference counts as
/// resolved rather than merely suggested
const RESOLVED_CONFIDENCE: f64 = 0.85;

/// The verdict for one reference
#[derive(Debug, Clone)]
pub enum ResolutionOutcome {
    /// The referenced artifact exists in another company document
    Resolved {
        document_id: i64,
        page: i32,
        snippet: String,
    },
    /// Not found; the best surviving suggestions ride along
    Missing {
        suggestions: Vec<DocumentSuggestion>,
    },
}

impl ResolutionOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolutionOutcome::Resolved { .. })
    }
}

/// Cache-fronted layered resolver
pub struct ReferenceResolver {
    matcher: DocumentMatcher,
    resolutions: Arc<dyn ResolutionStore>,
}

impl ReferenceResolver {
    pub fn new(matcher: DocumentMatcher, resolutions: Arc<dyn ResolutionStore>) -> Self {
        Self {
            matcher,
            resolutions,
        }
    }

    /// Resolve one reference for a company, consulting the durable cache
    /// first. Only exhausted-retry infrastructure errors propagate.
    pub async fn resolve(
        &self,
        reference: &DocumentReference,
        company_id: i64,
        current_document_id: i64,
    ) -> Result<ResolutionOutcome> {
        let start = Instant::now();

        if let Some(cached) = self
            .resolutions
            .find_resolution(company_id, &reference.document_name)
            .await?
        {
            docsense_common::metrics::record_cache(true, "resolution");
            debug!(
                reference = %reference.document_name,
                company_id,
                "Resolution served from cache"
            );
            return Ok(outcome_from_record(cached));
        }
        docsense_common::metrics::record_cache(false, "resolution");

        let suggestions = self
            .matcher
            .find_suggestions(reference, company_id, current_document_id)
            .await?;

        let outcome = match suggestions.iter().find(|s| {
            s.exact_confidence
                .map(|c| c >= RESOLVED_CONFIDENCE)
                .unwrap_or(false)
        }) {
            Some(best) => ResolutionOutcome::Resolved {
                document_id: best.document_id,
                page: best.page,
                snippet: best.snippet.clone(),
            },
            None => ResolutionOutcome::Missing { suggestions },
        };

        self.record_outcome(reference, company_id, &outcome).await?;

        let label = if outcome.is_resolved() { "resolved" } else { "missing" };
        docsense_common::metrics::record_resolution(start.elapsed().as_secs_f64(), label);
        info!(
            reference = %reference.document_name,
            company_id,
            outcome = label,
            "Reference resolved"
        );

        Ok(outcome)
    }

    async fn record_outcome(
        &self,
        reference: &DocumentReference,
        company_id: i64,
        outcome: &ResolutionOutcome,
    ) -> Result<()> {
        let record = match outcome {
            ResolutionOutcome::Resolved {
                document_id,
                page,
                snippet,
            } => ResolutionRecord {
                company_id,
                reference_name: reference.document_name.clone(),
                resolved_document_id: Some(*document_id),
                details: Some(ResolutionDetails {
                    document_id: *document_id,
                    page: *page,
                    snippet: snippet.clone(),
                }),
                created_at: Utc::now(),
            },
            ResolutionOutcome::Missing { .. } => ResolutionRecord {
                company_id,
                reference_name: reference.document_name.clone(),
                resolved_document_id: None,
                details: None,
                created_at: Utc::now(),
            },
        };

        self.resolutions.append_resolution(record).await
    }
}

fn outcome_from_record(record: ResolutionRecord) -> ResolutionOutcome {
    match (record.resolved_document_id, record.details) {
        (Some(document_id), Some(details)) => ResolutionOutcome::Resolved {
            document_id,
            page: details.page,
            snippet: details.snippet,
        },
        (Some(document_id), None) => ResolutionOutcome::Resolved {
            document_id,
            page: 1,
            snippet: String::new(),
        },
        (None, _) => ResolutionOutcome::Missing {
            suggestions: Vec::new(),
        },
    }
}
