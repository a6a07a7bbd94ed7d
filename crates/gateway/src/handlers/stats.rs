//! Index statistics

use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::AppState;

#[derive(Serialize)]
pub struct StatsResponse {
    pub documents: usize,
    /// Vector width of the index; unset while it is empty
    pub dimension: Option<usize>,
    pub embedding_dimension: usize,
    pub categories: BTreeMap<&'static str, usize>,
    pub embedding_model: String,
    pub reasoning_model: String,
    pub version: &'static str,
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let index = state.index.snapshot();

    let mut categories = BTreeMap::new();
    for document in index.documents() {
        *categories.entry(document.category.as_str()).or_insert(0) += 1;
    }

    Json(StatsResponse {
        documents: index.len(),
        dimension: index.dimension(),
        embedding_dimension: state.embedder.dimension(),
        categories,
        embedding_model: state.embedder.model_name().to_string(),
        reasoning_model: state.pipeline.model_name().to_string(),
        version: drugvista_common::VERSION,
    })
}
