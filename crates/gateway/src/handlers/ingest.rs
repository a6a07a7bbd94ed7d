//! Document ingestion handlers
//!
//! Uploaded content is split into records, embedded, and appended to the
//! index through a copy-on-write swap: a batch either lands completely or
//! not at all, and in-flight analyses keep the index they started with.

use axum::{extract::State, http::StatusCode, Json};
use base64::{engine::general_purpose::STANDARD, Engine};
use drugvista_common::{
    errors::{AppError, Result},
    metrics::RequestMetrics,
    models::DocumentCategory,
};
use drugvista_search::{embed_documents, records_from_upload, text_record, SourceDocument, UploadFormat};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::{info, warn};
use validator::Validate;

use crate::AppState;

/// File upload sent inline.
///
/// `.txt`, `.csv` and `.json` files may use either body field; `.pdf` and
/// `.docx` files must use `content_base64`.
#[derive(Debug, Deserialize, Validate)]
pub struct IngestRequest {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,

    /// File content as UTF-8 text
    #[serde(default)]
    pub content: Option<String>,

    /// File content as standard base64
    #[serde(default)]
    pub content_base64: Option<String>,

    /// paper, clinical_trial, market, patient_data
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
}

/// A single free-text document
#[derive(Debug, Deserialize, Validate)]
pub struct IngestTextRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,

    pub content: String,

    #[serde(default = "default_doc_type")]
    pub doc_type: String,
}

impl IngestRequest {
    /// Raw file bytes from whichever body field was sent
    fn body(&self, format: UploadFormat) -> Result<Cow<'_, [u8]>> {
        match (&self.content, &self.content_base64) {
            (Some(_), None) if format.is_binary() => Err(AppError::Validation {
                message: "PDF and DOCX files must be sent as content_base64".to_string(),
                field: Some("content_base64".to_string()),
            }),
            (Some(text), None) => Ok(Cow::Borrowed(text.as_bytes())),
            (None, Some(encoded)) => STANDARD
                .decode(encoded.trim())
                .map(Cow::Owned)
                .map_err(|e| AppError::Validation {
                    message: format!("content_base64 is not valid base64: {}", e),
                    field: Some("content_base64".to_string()),
                }),
            _ => Err(AppError::Validation {
                message: "exactly one of content or content_base64 is required".to_string(),
                field: Some("content".to_string()),
            }),
        }
    }
}

fn default_doc_type() -> String {
    "other".to_string()
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub source: String,
    pub category: DocumentCategory,
    pub records_added: usize,
    pub document_ids: Vec<String>,
    pub total_documents: usize,
    /// Whether the index snapshot on disk reflects this ingest
    pub persisted: bool,
}

fn validation(e: validator::ValidationErrors) -> AppError {
    AppError::Validation {
        message: e.to_string(),
        field: None,
    }
}

fn check_size(state: &AppState, size: usize) -> Result<()> {
    let limit = state.config.server.max_upload_bytes;
    if size > limit {
        return Err(AppError::PayloadTooLarge { size, limit });
    }
    Ok(())
}

/// Ingest an uploaded file
pub async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    let metrics = RequestMetrics::start("POST", "/v1/ingest");

    let result = async {
        request.validate().map_err(validation)?;
        let format = UploadFormat::from_filename(&request.filename)?;
        let body = request.body(format)?;
        check_size(&state, body.len())?;

        let category = DocumentCategory::parse(&request.doc_type);
        let records = records_from_upload(&request.filename, &body, category)?;
        add_records(&state, request.filename.clone(), category, records).await
    }
    .await;

    metrics.finish(status_of(&result));
    result.map(|response| (StatusCode::CREATED, Json(response)))
}

/// Ingest one text document
pub async fn ingest_text(
    State(state): State<AppState>,
    Json(request): Json<IngestTextRequest>,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    let metrics = RequestMetrics::start("POST", "/v1/ingest-text");

    let result = async {
        request.validate().map_err(validation)?;
        check_size(&state, request.content.len())?;

        let category = DocumentCategory::parse(&request.doc_type);
        let record = text_record(&request.title, &request.content, category)?;
        add_records(&state, request.title.clone(), category, vec![record]).await
    }
    .await;

    metrics.finish(status_of(&result));
    result.map(|response| (StatusCode::CREATED, Json(response)))
}

fn status_of<T>(result: &Result<T>) -> u16 {
    match result {
        Ok(_) => StatusCode::CREATED.as_u16(),
        Err(e) => e.status_code().as_u16(),
    }
}

/// Embed records and swap them into the index as one batch
async fn add_records(
    state: &AppState,
    source: String,
    category: DocumentCategory,
    records: Vec<SourceDocument>,
) -> Result<IngestResponse> {
    let documents = embed_documents(records, state.embedder.as_ref(), state.config.embedding.batch_size).await?;
    let document_ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();

    let index = state
        .index
        .update(move |index| documents.into_iter().try_for_each(|d| index.add(d)))
        .await?;

    let persisted = match state.persist_index().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Ingested documents are not yet persisted");
            false
        }
    };

    info!(
        source = %source,
        records = document_ids.len(),
        total = index.len(),
        persisted,
        "Documents ingested"
    );

    Ok(IngestResponse {
        source,
        category,
        records_added: document_ids.len(),
        document_ids,
        total_documents: index.len(),
        persisted,
    })
}
