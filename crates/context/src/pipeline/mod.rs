//! Reasoning pipeline
//!
//! Drives one query through the Context, Clinical, Market and Decision
//! stages. Each run is pinned to one index snapshot, accumulates evidence
//! in a capped [`EvidenceSet`](drugvista_common::models::EvidenceSet), and
//! ends either `Complete` with an artifact or `Failed` with a
//! [`PipelineFailure`]. The whole run is bounded by a single timeout.

mod query;
mod run;
mod state;

pub use query::{FieldQueryStrategy, NoRefinement, QueryStrategy};
pub use run::{PipelineFailure, PipelineRun};
pub use state::{transition, PipelineState, StageOutcome, TransitionRecord, MAX_STAGE_ATTEMPTS};

use crate::assembler::ResultAssembler;
use crate::executor::{StageExecutor, StageRequest};
use drugvista_common::config::AppConfig;
use drugvista_common::errors::{AppError, Result};
use drugvista_common::llm::ReasoningModel;
use drugvista_common::metrics;
use drugvista_common::models::{AnalysisArtifact, Stage};
use drugvista_search::{PinnedRetriever, Retriever, VectorRetriever};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Evidence retrieved for the raw query
    pub top_k: usize,
    /// Evidence retrieved per refinement sub-query
    pub refine_k: usize,
    /// Cap on evidence accumulated per run
    pub max_evidence: usize,
    /// Budget for the whole run
    pub timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            refine_k: 3,
            max_evidence: 24,
            timeout: Duration::from_secs(120),
        }
    }
}

impl From<&AppConfig> for PipelineOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            refine_k: config.retrieval.refine_k,
            max_evidence: config.pipeline.max_evidence,
            timeout: config.pipeline_timeout(),
        }
    }
}

pub struct ReasoningPipeline {
    retriever: VectorRetriever,
    executor: StageExecutor,
    strategy: Arc<dyn QueryStrategy>,
    assembler: ResultAssembler,
    options: PipelineOptions,
}

impl ReasoningPipeline {
    pub fn new(retriever: VectorRetriever, model: Arc<dyn ReasoningModel>, options: PipelineOptions) -> Self {
        Self {
            retriever,
            executor: StageExecutor::new(model),
            strategy: Arc::new(FieldQueryStrategy::default()),
            assembler: ResultAssembler::new(),
            options,
        }
    }

    /// Build from application configuration
    pub fn from_config(config: &AppConfig, retriever: VectorRetriever, model: Arc<dyn ReasoningModel>) -> Self {
        let pipeline = Self::new(retriever, model, PipelineOptions::from(config));
        if config.pipeline.refine_queries {
            pipeline
        } else {
            pipeline.with_strategy(Arc::new(NoRefinement))
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn QueryStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn assembler(&self) -> &ResultAssembler {
        &self.assembler
    }

    pub fn model_name(&self) -> &str {
        self.executor.model_name()
    }

    /// Run a query and return only the artifact or the failure
    pub async fn analyze(&self, query: &str) -> std::result::Result<AnalysisArtifact, PipelineFailure> {
        self.execute(query).await.into_outcome()
    }

    /// Run a query and return the full run record
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn execute(&self, query: &str) -> PipelineRun {
        let mut run = PipelineRun::new(query, self.options.max_evidence);
        tracing::Span::current().record("run_id", tracing::field::display(run.run_id));

        let retriever = self.retriever.pin();
        let start = Instant::now();
        info!(
            documents = retriever.index().len(),
            model = self.executor.model_name(),
            "Pipeline run started"
        );

        let budget = self.options.timeout;
        if tokio::time::timeout(budget, self.drive(&mut run, &retriever)).await.is_err() {
            warn!(timeout_ms = budget.as_millis() as u64, state = %run.state, "Pipeline run timed out");
            run.record_error(&AppError::Timeout {
                timeout_ms: budget.as_millis() as u64,
            });
        }

        let elapsed = start.elapsed();
        match &run.failure {
            None => {
                metrics::record_pipeline(elapsed.as_secs_f64(), "complete");
                info!(
                    evidence = run.evidence.len(),
                    latency_ms = elapsed.as_millis() as u64,
                    confidence = run.artifact.as_ref().map(|a| a.confidence_score),
                    "Pipeline run complete"
                );
            }
            Some(failure) => {
                metrics::record_pipeline(elapsed.as_secs_f64(), failure.kind.as_str());
                error!(
                    kind = %failure.kind,
                    failed_stage = ?failure.failed_stage,
                    last_completed_stage = ?failure.last_completed_stage,
                    latency_ms = elapsed.as_millis() as u64,
                    error = %failure.message,
                    "Pipeline run failed"
                );
            }
        }

        run
    }

    async fn drive(&self, run: &mut PipelineRun, retriever: &PinnedRetriever) {
        match retriever.retrieve(&run.query, self.options.top_k).await {
            Ok(items) => {
                let added = run.evidence.extend(items);
                info!(evidence = added, "Initial evidence retrieved");
            }
            Err(e) => {
                run.record_error(&e);
                return;
            }
        }

        while let PipelineState::Running { stage, attempt } = run.state {
            if attempt == 0 {
                if let Err(e) = self.refine_evidence(run, retriever, stage).await {
                    run.record_error(&e);
                    return;
                }
            }

            let request = StageRequest {
                stage,
                prior_context: run.results.clone(),
                evidence: run.evidence.as_slice().to_vec(),
                query: run.query.clone(),
                strict_format: attempt > 0,
            };

            let started = Instant::now();
            let outcome = self.executor.run(&request).await;
            let elapsed = started.elapsed();

            match outcome {
                Ok(result) => {
                    metrics::record_stage(stage.as_str(), StageOutcome::Succeeded.as_str(), elapsed.as_secs_f64());
                    info!(
                        stage = %stage,
                        attempt,
                        confidence = result.raw_confidence,
                        citations = result.cited_evidence.len(),
                        latency_ms = elapsed.as_millis() as u64,
                        "Stage complete"
                    );
                    run.results.push(result);

                    if stage.next().is_some() {
                        run.advance(StageOutcome::Succeeded);
                    } else {
                        match self.assembler.assemble(run) {
                            Ok(artifact) => {
                                run.artifact = Some(artifact);
                                run.advance(StageOutcome::Succeeded);
                            }
                            Err(e) => {
                                run.record_error(&e);
                            }
                        }
                    }
                }
                Err(e) => {
                    let outcome = StageOutcome::from_error(&e);
                    metrics::record_stage(stage.as_str(), outcome.as_str(), elapsed.as_secs_f64());

                    if let PipelineState::Running { attempt: next_attempt, .. } = run.record_error(&e) {
                        metrics::record_parse_retry(stage.as_str());
                        warn!(
                            stage = %stage,
                            attempt = next_attempt,
                            error = %e,
                            "Stage output rejected, retrying with strict formatting"
                        );
                    }
                }
            }
        }
    }

    /// Widen the run's evidence before `stage` using the previous stage's output
    async fn refine_evidence(&self, run: &mut PipelineRun, retriever: &PinnedRetriever, stage: Stage) -> Result<()> {
        let Some(completed) = run.results.last() else {
            return Ok(());
        };

        let queries = self.strategy.refine(&run.query, completed, stage);
        if queries.is_empty() {
            return Ok(());
        }

        let items = retriever.retrieve_many(&queries, self.options.refine_k).await?;
        let added = run.evidence.extend(items);
        tracing::debug!(
            stage = %stage,
            queries = queries.len(),
            added,
            total = run.evidence.len(),
            "Evidence refined"
        );
        Ok(())
    }
}
