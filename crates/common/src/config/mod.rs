//! Configuration management for Docsense
//!
//! Supports loading configuration from:
//! - A .env file, when present
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{env}.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Completion (LLM) provider configuration
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Retrieval tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Reference resolution tuning
    #[serde(default)]
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_provider_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_provider_timeout(),
            max_retries: default_provider_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    /// API key for the completion service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Chat model to use
    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Sampling temperature; extraction calls want this low
    #[serde(default = "default_completion_temperature")]
    pub temperature: f32,

    /// Request deadline in milliseconds
    #[serde(default = "default_completion_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            model: default_completion_model(),
            temperature: default_completion_temperature(),
            timeout_ms: default_completion_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Ensemble weight for the lexical signal
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,

    /// Ensemble weight for the ANN signal
    #[serde(default = "default_ann_weight")]
    pub ann_weight: f64,

    /// Results per document-scope query
    #[serde(default = "default_document_top_k")]
    pub document_top_k: usize,

    /// Results per company-scope query
    #[serde(default = "default_company_top_k")]
    pub company_top_k: usize,

    /// Maximum vector distance for ANN hits
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,

    /// Cluster cache staleness in seconds
    #[serde(default = "default_cluster_ttl")]
    pub cluster_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_weight: default_lexical_weight(),
            ann_weight: default_ann_weight(),
            document_top_k: default_document_top_k(),
            company_top_k: default_company_top_k(),
            distance_threshold: default_distance_threshold(),
            cluster_ttl_secs: default_cluster_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Deadline for reference-extraction completion calls, in milliseconds
    #[serde(default = "default_extraction_timeout_ms")]
    pub extraction_timeout_ms: u64,

    /// Concurrent reference resolutions
    #[serde(default = "default_resolution_concurrency")]
    pub resolution_concurrency: usize,

    /// Concurrent web-search lookups
    #[serde(default = "default_web_search_concurrency")]
    pub web_search_concurrency: usize,

    /// Retry attempts for company-document listing
    #[serde(default = "default_provider_retries")]
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt
    #[serde(default = "default_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            extraction_timeout_ms: default_extraction_timeout_ms(),
            resolution_concurrency: default_resolution_concurrency(),
            web_search_concurrency: default_web_search_concurrency(),
            max_retries: default_provider_retries(),
            initial_retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-ada-002".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_provider_timeout() -> u64 { 30 }
fn default_provider_retries() -> u32 { 3 }
fn default_completion_model() -> String { "gpt-4.1".to_string() }
fn default_completion_temperature() -> f32 { 0.1 }
fn default_completion_timeout_ms() -> u64 { 30_000 }
fn default_lexical_weight() -> f64 { 0.4 }
fn default_ann_weight() -> f64 { 0.6 }
fn default_document_top_k() -> usize { 5 }
fn default_company_top_k() -> usize { 10 }
fn default_distance_threshold() -> f64 { 0.7 }
fn default_cluster_ttl() -> u64 { 3600 }
fn default_extraction_timeout_ms() -> u64 { 30_000 }
fn default_resolution_concurrency() -> usize { 20 }
fn default_web_search_concurrency() -> usize { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        // a missing .env file is not an error
        dotenvy::dotenv().ok();

        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__DATABASE__URL=postgres://...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Extraction deadline as a Duration
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver.extraction_timeout_ms)
    }

    /// Cluster cache TTL as a Duration
    pub fn cluster_ttl(&self) -> Duration {
        Duration::from_secs(self.retrieval.cluster_ttl_secs)
    }

    /// Ensemble weights ordered [lexical, ann]
    pub fn ensemble_weights(&self) -> [f64; 2] {
        [self.retrieval.lexical_weight, self.retrieval.ann_weight]
    }
}
