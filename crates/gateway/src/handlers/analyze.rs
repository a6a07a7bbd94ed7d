//! Analysis handlers

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use drugvista_common::{
    errors::{AppError, ErrorResponse},
    metrics::RequestMetrics,
    models::{AnalysisArtifact, ConfidenceLevel, EvidenceItem, StageResult},
};
use drugvista_context::{pipeline::TransitionRecord, PipelineFailure};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;

/// Analysis request
#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(min = 3, max = 2000, message = "query must be 3 to 2000 characters"))]
    pub query: String,
}

impl AnalyzeRequest {
    /// The trimmed query, if it passes validation
    fn into_query(mut self) -> Result<String, AppError> {
        self.query = self.query.trim().to_string();
        self.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: Some("query".to_string()),
        })?;
        Ok(self.query)
    }
}

/// Explained analysis: the artifact plus everything that produced it
#[derive(Serialize)]
pub struct ExplainResponse {
    pub run_id: Uuid,
    pub query: String,
    pub artifact: AnalysisArtifact,
    pub confidence_level: ConfidenceLevel,
    pub explanation: String,
    pub stages: Vec<StageResult>,
    pub evidence: Vec<EvidenceItem>,
    pub transitions: Vec<TransitionRecord>,
    pub processing_time_ms: u64,
}

/// Why an analysis request produced no artifact
#[derive(Debug)]
pub enum AnalyzeError {
    /// Rejected before a run started
    Rejected(AppError),
    /// The run itself failed
    Failed(PipelineFailure),
}

impl AnalyzeError {
    fn status(&self) -> StatusCode {
        match self {
            AnalyzeError::Rejected(e) => e.status_code(),
            AnalyzeError::Failed(f) => f.kind.status_code(),
        }
    }
}

impl From<AppError> for AnalyzeError {
    fn from(e: AppError) -> Self {
        AnalyzeError::Rejected(e)
    }
}

impl From<PipelineFailure> for AnalyzeError {
    fn from(f: PipelineFailure) -> Self {
        AnalyzeError::Failed(f)
    }
}

impl IntoResponse for AnalyzeError {
    fn into_response(self) -> Response {
        match self {
            AnalyzeError::Rejected(e) => e.into_response(),
            AnalyzeError::Failed(failure) => {
                let status = failure.kind.status_code();
                let details = serde_json::json!({
                    "run_id": failure.run_id,
                    "kind": failure.kind,
                    "failed_stage": failure.failed_stage,
                    "last_completed_stage": failure.last_completed_stage,
                });
                let body = ErrorResponse::with_code(failure.kind.error_code(), failure.message, Some(details));
                (status, Json(body)).into_response()
            }
        }
    }
}

fn finish<T>(metrics: RequestMetrics, result: &Result<T, AnalyzeError>) {
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status(),
    };
    metrics.finish(status.as_u16());
}

/// Run the full pipeline and return the artifact
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisArtifact>, AnalyzeError> {
    let metrics = RequestMetrics::start("POST", "/v1/analyze");

    let result = match request.into_query() {
        Ok(query) => state.pipeline.analyze(&query).await.map_err(AnalyzeError::from),
        Err(e) => Err(e.into()),
    };

    finish(metrics, &result);
    result.map(Json)
}

/// Run the full pipeline and return the artifact with its explanation and trace
pub async fn explain(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<ExplainResponse>, AnalyzeError> {
    let metrics = RequestMetrics::start("POST", "/v1/analyze/explain");
    let result = explain_query(&state, request).await;
    finish(metrics, &result);
    result.map(Json)
}

async fn explain_query(state: &AppState, request: AnalyzeRequest) -> Result<ExplainResponse, AnalyzeError> {
    let query = request.into_query()?;
    let start = Instant::now();
    let run = state.pipeline.execute(&query).await;

    let complete = run.is_complete();
    let artifact = match run.artifact.clone() {
        Some(artifact) if complete => artifact,
        _ => {
            return Err(match run.into_outcome() {
                Err(failure) => failure.into(),
                Ok(_) => AppError::Internal {
                    message: "run finished without a terminal state".to_string(),
                }
                .into(),
            })
        }
    };

    let explanation = state.pipeline.assembler().explain(&run, &artifact);

    Ok(ExplainResponse {
        run_id: run.run_id,
        query: run.query,
        confidence_level: ConfidenceLevel::from_score(artifact.confidence_score),
        artifact,
        explanation,
        stages: run.results,
        evidence: run.evidence.into_vec(),
        transitions: run.transitions,
        processing_time_ms: start.elapsed().as_millis() as u64,
    })
}
