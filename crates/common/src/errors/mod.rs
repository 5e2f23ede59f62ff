//! Error types for the Docsense retrieval core
//!
//! Provides a single error enum shared by every crate in the workspace,
//! with helpers for classifying transient failures that are worth
//! retrying versus failures that trigger a retrieval fallback tier.

use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    // Empty candidate sets: the scoped chunk set had zero rows.
    // Callers treat this as a fallback trigger, never a user-facing error.
    #[error("No chunks found for {scope}")]
    NoChunksFound { scope: String },

    // Resource errors
    #[error("Document not found: {id}")]
    DocumentNotFound { id: i64 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Completion service error: {message}")]
    CompletionError { message: String },

    #[error("Completion timeout after {timeout_ms}ms")]
    CompletionTimeout { timeout_ms: u64 },

    #[error("Web search error: {message}")]
    WebSearchError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Retry exhaustion wraps the final attempt's message
    #[error("Operation '{operation}' failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        message: String,
    },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// True for infrastructure failures that a retry policy may recover from
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::DatabaseConnection { .. }
                | AppError::HttpClient(_)
                | AppError::WebSearchError { .. }
        )
    }

    /// True when the error marks an empty candidate set, which downgrades
    /// retrieval to the next fallback tier rather than failing the call
    pub fn is_empty_candidate_set(&self) -> bool {
        matches!(self, AppError::NoChunksFound { .. })
    }

    /// True for provider deadline expiries, which call sites accept as an
    /// empty result unless they carry an explicit retry policy
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingTimeout { .. } | AppError::CompletionTimeout { .. }
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}
