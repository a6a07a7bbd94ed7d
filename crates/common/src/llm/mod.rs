//! Reasoning-model service abstraction
//!
//! The pipeline talks to language models only through [`ReasoningModel`]:
//! one prompt in, one raw-text or structured response out. Retries for
//! transient transport failures live inside the implementations.

mod offline;
mod openai;

pub use offline::RuleBasedModel;
pub use openai::OpenAIChatModel;

use crate::config::LlmConfig;
use crate::errors::Result;
use crate::models::Stage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single model call
#[derive(Debug, Clone, Serialize)]
pub struct ModelInvocation {
    /// Stage issuing the call
    pub stage: Stage,

    /// Fully rendered prompt
    pub prompt: String,

    /// JSON description of the expected output object
    pub schema_hint: serde_json::Value,

    /// Sampling temperature
    pub temperature: f32,
}

/// What a model returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum ModelResponse {
    /// Free text that should contain a JSON object
    Text(String),
    /// An already-decoded JSON value
    Structured(serde_json::Value),
}

/// Trait for reasoning-model invocation
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    /// Invoke the model once
    async fn invoke(&self, invocation: &ModelInvocation) -> Result<ModelResponse>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create a reasoning model based on configuration
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn ReasoningModel>> {
    match config.provider.as_str() {
        "openai" => match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Ok(Arc::new(OpenAIChatModel::new(key.to_string(), config)?)),
            None => {
                tracing::warn!("llm.api_key not set, falling back to offline rule-based model");
                Ok(Arc::new(RuleBasedModel::new()))
            }
        },
        "offline" => Ok(Arc::new(RuleBasedModel::new())),
        other => {
            tracing::warn!(provider = other, "Unknown LLM provider, using offline rule-based model");
            Ok(Arc::new(RuleBasedModel::new()))
        }
    }
}
