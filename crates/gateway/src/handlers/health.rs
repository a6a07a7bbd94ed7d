//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub index: CheckResult,
    pub embedder: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: drugvista_common::VERSION.to_string(),
    })
}

/// Readiness probe - the embedder must answer; an empty index is still ready
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let documents = state.index.snapshot().len();
    let index_check = CheckResult {
        status: "up".to_string(),
        latency_ms: None,
        documents: Some(documents),
        error: None,
    };

    let start = std::time::Instant::now();
    let embedder_check = match state.embedder.embed("readiness probe").await {
        Ok(_) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            documents: None,
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            documents: None,
            error: Some(e.to_string()),
        },
    };

    let all_healthy = embedder_check.status == "up";

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks {
            index: index_check,
            embedder: embedder_check,
        },
    })
}
