//! Reference extraction and resolution over a company document corpus.
//!
//! A document mentions artifacts that should exist elsewhere in the
//! corpus ("Exhibit A", "Schedule 3.1"). This crate extracts those
//! references with a completion model, resolves each one through layered
//! matching (exact text, title heuristics, contextual vector search with
//! validation), caches verdicts durably, and rolls everything up into a
//! predictive analysis of what is present and what is missing.

pub mod analysis;
pub mod extractor;
pub mod matcher;
pub mod patterns;
pub mod resolution;
pub mod websearch;

pub use analysis::{
    AnalysisEngine, MissingDocumentPrediction, PredictiveAnalysis, Priority, ResolvedReference,
};
pub use extractor::{deduplicate_references, DocumentReference, ReferenceExtractor};
pub use matcher::{DocumentMatcher, DocumentSuggestion, MatchLayer};
pub use resolution::{ReferenceResolver, ResolutionOutcome};
pub use websearch::{DuckDuckGoSearch, SearchResult, WebSearch};
