//! A single pipeline run and its failure report

use super::state::{transition, PipelineState, StageOutcome, TransitionRecord};
use chrono::{DateTime, Utc};
use drugvista_common::errors::{AppError, PipelineErrorKind};
use drugvista_common::models::{AnalysisArtifact, EvidenceSet, Stage, StageResult};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Why a run produced no artifact
#[derive(Debug, Clone, Serialize, Error)]
#[error("run {run_id} failed with {kind} error: {message}")]
pub struct PipelineFailure {
    pub run_id: Uuid,
    pub kind: PipelineErrorKind,
    /// Stage running when the failure happened
    pub failed_stage: Option<Stage>,
    /// Last stage whose result was kept
    pub last_completed_stage: Option<Stage>,
    pub message: String,
}

/// The full, inspectable record of one query
#[derive(Debug, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: PipelineState,
    /// Completed stage results in stage order
    pub results: Vec<StageResult>,
    pub evidence: EvidenceSet,
    pub transitions: Vec<TransitionRecord>,
    pub failure: Option<PipelineFailure>,
    pub artifact: Option<AnalysisArtifact>,
}

impl PipelineRun {
    pub fn new(query: impl Into<String>, max_evidence: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            query: query.into(),
            started_at: Utc::now(),
            finished_at: None,
            state: PipelineState::INITIAL,
            results: Vec::new(),
            evidence: EvidenceSet::with_capacity_limit(max_evidence),
            transitions: Vec::new(),
            failure: None,
            artifact: None,
        }
    }

    pub fn result(&self, stage: Stage) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    pub fn last_completed_stage(&self) -> Option<Stage> {
        self.results.last().map(|r| r.stage)
    }

    pub fn is_complete(&self) -> bool {
        self.state == PipelineState::Complete
    }

    /// Apply an outcome to the state machine and log the transition
    pub(crate) fn advance(&mut self, outcome: StageOutcome) -> PipelineState {
        let from = self.state;
        let to = transition(from, outcome);
        self.transitions.push(TransitionRecord {
            from,
            outcome,
            to,
            at: Utc::now(),
        });
        self.state = to;

        tracing::debug!(
            run_id = %self.run_id,
            from = %from,
            outcome = outcome.as_str(),
            to = %to,
            "Pipeline transition"
        );

        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        to
    }

    /// Record an error as the outcome of the current step.
    ///
    /// If it moves the run to `Failed`, the failure report is captured.
    pub(crate) fn record_error(&mut self, error: &AppError) -> PipelineState {
        let failed_stage = self.state.stage();
        let was_terminal = self.state.is_terminal();
        let to = self.advance(StageOutcome::from_error(error));

        if to == PipelineState::Failed && !was_terminal {
            self.failure = Some(PipelineFailure {
                run_id: self.run_id,
                kind: error.pipeline_kind().unwrap_or(PipelineErrorKind::StageModel),
                failed_stage,
                last_completed_stage: self.last_completed_stage(),
                message: error.to_string(),
            });
        }
        to
    }

    /// The artifact, or the failure report. Never both, never neither.
    pub fn into_outcome(self) -> Result<AnalysisArtifact, PipelineFailure> {
        match (self.artifact, self.failure) {
            (Some(artifact), None) if self.state == PipelineState::Complete => Ok(artifact),
            (_, Some(failure)) => Err(failure),
            _ => Err(PipelineFailure {
                run_id: self.run_id,
                kind: PipelineErrorKind::Assembly,
                failed_stage: self.state.stage(),
                last_completed_stage: self.results.last().map(|r| r.stage),
                message: format!("run ended in state {} without an artifact", self.state),
            }),
        }
    }
}
