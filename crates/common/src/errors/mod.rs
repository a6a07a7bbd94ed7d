//! Error types for DrugVista services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Pipeline error kinds, so callers can tell recoverable stage failures apart
//! - HTTP status code mapping
//! - Structured error responses

use crate::models::Stage;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,
    PayloadTooLarge,

    // Resource errors (4xxx)
    NotFound,
    DocumentNotFound,

    // Conflict errors (5xxx)
    DuplicateDocument,

    // Pipeline errors (6xxx)
    RetrievalError,
    StageModelError,
    StageParseError,
    AssemblyError,
    PipelineTimeout,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,
            ErrorCode::PayloadTooLarge => 1004,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::DocumentNotFound => 4002,

            // Conflicts (5xxx)
            ErrorCode::DuplicateDocument => 5002,

            // Pipeline (6xxx)
            ErrorCode::RetrievalError => 6001,
            ErrorCode::StageModelError => 6002,
            ErrorCode::StageParseError => 6003,
            ErrorCode::AssemblyError => 6004,
            ErrorCode::PipelineTimeout => 6005,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// The failure taxonomy of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    Retrieval,
    Embedding,
    StageModel,
    StageParse,
    Assembly,
    Timeout,
}

impl PipelineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineErrorKind::Retrieval => "retrieval",
            PipelineErrorKind::Embedding => "embedding",
            PipelineErrorKind::StageModel => "stage_model",
            PipelineErrorKind::StageParse => "stage_parse",
            PipelineErrorKind::Assembly => "assembly",
            PipelineErrorKind::Timeout => "timeout",
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            PipelineErrorKind::Retrieval => ErrorCode::RetrievalError,
            PipelineErrorKind::Embedding => ErrorCode::EmbeddingError,
            PipelineErrorKind::StageModel => ErrorCode::StageModelError,
            PipelineErrorKind::StageParse => ErrorCode::StageParseError,
            PipelineErrorKind::Assembly => ErrorCode::AssemblyError,
            PipelineErrorKind::Timeout => ErrorCode::PipelineTimeout,
        }
    }

    /// HTTP status for a run that failed with this kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineErrorKind::Assembly => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl std::fmt::Display for PipelineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    // Conflict errors
    #[error("Duplicate document: {id}")]
    DuplicateDocument { id: String },

    // Pipeline errors
    #[error("Retrieval failed: {message}")]
    Retrieval { message: String },

    #[error("{stage} stage model call failed: {message}")]
    StageModel { stage: Stage, message: String },

    #[error("{stage} stage output rejected: {message}")]
    StageParse { stage: Stage, message: String },

    #[error("Artifact assembly failed: {message}")]
    Assembly { message: String },

    #[error("Pipeline timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Upstream service error: {message}")]
    Upstream { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::DuplicateDocument { .. } => ErrorCode::DuplicateDocument,
            AppError::Retrieval { .. } => ErrorCode::RetrievalError,
            AppError::StageModel { .. } => ErrorCode::StageModelError,
            AppError::StageParse { .. } => ErrorCode::StageParseError,
            AppError::Assembly { .. } => ErrorCode::AssemblyError,
            AppError::Timeout { .. } => ErrorCode::PipelineTimeout,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::Upstream { .. } | AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Pipeline failure kind, if this error belongs to the pipeline taxonomy
    pub fn pipeline_kind(&self) -> Option<PipelineErrorKind> {
        match self {
            AppError::Retrieval { .. } => Some(PipelineErrorKind::Retrieval),
            AppError::EmbeddingError { .. } => Some(PipelineErrorKind::Embedding),
            AppError::StageModel { .. } => Some(PipelineErrorKind::StageModel),
            AppError::StageParse { .. } => Some(PipelineErrorKind::StageParse),
            AppError::Assembly { .. } => Some(PipelineErrorKind::Assembly),
            AppError::Timeout { .. } => Some(PipelineErrorKind::Timeout),
            _ => None,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::InvalidFormat { .. } => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            AppError::NotFound { .. } | AppError::DocumentNotFound { .. } => {
                StatusCode::NOT_FOUND
            }

            // 409 Conflict
            AppError::DuplicateDocument { .. } => StatusCode::CONFLICT,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 500 Internal Server Error
            AppError::Assembly { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Retrieval { .. }
            | AppError::StageModel { .. }
            | AppError::StageParse { .. }
            | AppError::EmbeddingError { .. }
            | AppError::Upstream { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &AppError, details: Option<serde_json::Value>) -> Self {
        Self::with_code(error.code(), error.to_string(), details)
    }

    pub fn with_code(code: ErrorCode, message: String, details: Option<serde_json::Value>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                message,
                details,
                request_id: None,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        (status, Json(ErrorResponse::new(&self, None))).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
