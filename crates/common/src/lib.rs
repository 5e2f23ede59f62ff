//! Docsense Common Library
//!
//! Shared code for the Docsense retrieval and resolution crates including:
//! - Database models, store traits and repository implementations
//! - Embedding client abstraction with caching
//! - Chat completion client for structured extraction
//! - Error types and handling
//! - Configuration management
//! - Retry policy helpers
//! - Metrics and observability
//! - Vector math primitives

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod retry;
pub mod vector;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{
    ChunkFilter, ChunkRecord, ChunkStore, DocumentRecord, DocumentStore, MemoryStore, Repository,
    ResolutionDetails, ResolutionRecord, ResolutionStore, ScoredChunk,
};
pub use embeddings::{CachedEmbedder, Embedder, EmbeddingCache, MockEmbedder};
pub use errors::{AppError, Result};
pub use llm::{CompletionClient, MockCompletionClient};
pub use retry::with_retry;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
