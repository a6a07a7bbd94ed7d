//! DrugVista Common Library
//!
//! Shared code for all DrugVista crates including:
//! - Domain models (documents, evidence, stages, artifacts)
//! - Embedding client abstraction
//! - Reasoning-model client abstraction
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, PipelineErrorKind, Result};
pub use llm::ReasoningModel;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Confidence assigned to a stage whose output carries no confidence signal
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;
