//! Stage execution
//!
//! One [`StageRequest`] in, one validated [`StageResult`] out. The executor
//! renders the stage prompt, invokes the reasoning model exactly once, and
//! validates what comes back. Retrying is the pipeline's decision.

mod parser;
pub mod prompts;

pub use parser::OutputParser;

use drugvista_common::errors::{AppError, Result};
use drugvista_common::llm::{ModelInvocation, ReasoningModel};
use drugvista_common::models::{EvidenceItem, Stage, StageResult};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Everything a stage sees
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: Stage,
    /// Results of the stages already completed, in order
    pub prior_context: Vec<StageResult>,
    pub evidence: Vec<EvidenceItem>,
    pub query: String,
    /// Set on the retry after unparseable output
    pub strict_format: bool,
}

pub struct StageExecutor {
    model: Arc<dyn ReasoningModel>,
    parser: OutputParser,
}

impl StageExecutor {
    pub fn new(model: Arc<dyn ReasoningModel>) -> Self {
        Self {
            model,
            parser: OutputParser::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    #[instrument(
        skip(self, request),
        fields(
            stage = %request.stage,
            strict = request.strict_format,
            evidence = request.evidence.len()
        )
    )]
    pub async fn run(&self, request: &StageRequest) -> Result<StageResult> {
        let invocation = ModelInvocation {
            stage: request.stage,
            prompt: prompts::render(request),
            schema_hint: prompts::schema_hint(request.stage),
            temperature: request.stage.temperature(),
        };

        let start = Instant::now();
        let response = self.model.invoke(&invocation).await.map_err(|e| match e {
            AppError::StageModel { .. } => e,
            other => AppError::StageModel {
                stage: request.stage,
                message: other.to_string(),
            },
        })?;

        tracing::debug!(
            model = self.model.model_name(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Model responded"
        );

        let result = self.parser.parse(request.stage, response, &request.evidence)?;

        tracing::debug!(
            citations = result.cited_evidence.len(),
            confidence = result.raw_confidence,
            "Stage output validated"
        );

        Ok(result)
    }
}
