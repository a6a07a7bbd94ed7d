//! Pipeline state machine
//!
//! All control flow of a run is decided by [`transition`], a pure function
//! of the current state and the outcome of the step just taken.

use chrono::{DateTime, Utc};
use drugvista_common::errors::AppError;
use drugvista_common::models::Stage;
use serde::Serialize;
use std::fmt;

/// Attempts allowed per stage: the first call plus one strict-format retry
pub const MAX_STAGE_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Running { stage: Stage, attempt: u8 },
    Complete,
    Failed,
}

impl PipelineState {
    pub const INITIAL: PipelineState = PipelineState::Running {
        stage: Stage::Context,
        attempt: 0,
    };

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Complete | PipelineState::Failed)
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Running { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Running { stage, attempt } => write!(f, "Running({}, attempt {})", stage, attempt),
            PipelineState::Complete => f.write_str("Complete"),
            PipelineState::Failed => f.write_str("Failed"),
        }
    }
}

/// What happened in the step just taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    ParseFailed,
    ModelFailed,
    RetrievalFailed,
    TimedOut,
    AssemblyFailed,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Succeeded => "succeeded",
            StageOutcome::ParseFailed => "parse_failed",
            StageOutcome::ModelFailed => "model_failed",
            StageOutcome::RetrievalFailed => "retrieval_failed",
            StageOutcome::TimedOut => "timed_out",
            StageOutcome::AssemblyFailed => "assembly_failed",
        }
    }

    /// Classify an error raised while a stage was running
    pub fn from_error(error: &AppError) -> Self {
        match error {
            AppError::StageParse { .. } => StageOutcome::ParseFailed,
            AppError::Retrieval { .. } | AppError::EmbeddingError { .. } => StageOutcome::RetrievalFailed,
            AppError::Timeout { .. } => StageOutcome::TimedOut,
            AppError::Assembly { .. } => StageOutcome::AssemblyFailed,
            _ => StageOutcome::ModelFailed,
        }
    }
}

/// Next state for `(state, outcome)`. Terminal states never change.
pub fn transition(state: PipelineState, outcome: StageOutcome) -> PipelineState {
    match (state, outcome) {
        (PipelineState::Complete | PipelineState::Failed, _) => state,
        (PipelineState::Running { stage, .. }, StageOutcome::Succeeded) => match stage.next() {
            Some(next) => PipelineState::Running { stage: next, attempt: 0 },
            None => PipelineState::Complete,
        },
        (PipelineState::Running { stage, attempt }, StageOutcome::ParseFailed)
            if attempt + 1 < MAX_STAGE_ATTEMPTS =>
        {
            PipelineState::Running {
                stage,
                attempt: attempt + 1,
            }
        }
        (PipelineState::Running { .. }, _) => PipelineState::Failed,
    }
}

/// One entry of a run's transition log
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: PipelineState,
    pub outcome: StageOutcome,
    pub to: PipelineState,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(stage: Stage, attempt: u8) -> PipelineState {
        PipelineState::Running { stage, attempt }
    }

    #[test]
    fn test_happy_path_visits_every_stage() {
        let mut state = PipelineState::INITIAL;
        let mut visited = Vec::new();
        while let Some(stage) = state.stage() {
            visited.push(stage);
            state = transition(state, StageOutcome::Succeeded);
        }
        assert_eq!(visited, Stage::ALL.to_vec());
        assert_eq!(state, PipelineState::Complete);
    }

    #[test]
    fn test_parse_failure_retries_once() {
        let retry = transition(running(Stage::Market, 0), StageOutcome::ParseFailed);
        assert_eq!(retry, running(Stage::Market, 1));
        assert_eq!(transition(retry, StageOutcome::ParseFailed), PipelineState::Failed);
        assert_eq!(transition(retry, StageOutcome::Succeeded), running(Stage::Decision, 0));
    }

    #[test]
    fn test_other_failures_are_fatal() {
        for outcome in [
            StageOutcome::ModelFailed,
            StageOutcome::RetrievalFailed,
            StageOutcome::TimedOut,
            StageOutcome::AssemblyFailed,
        ] {
            assert_eq!(transition(running(Stage::Clinical, 0), outcome), PipelineState::Failed);
        }
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for outcome in [StageOutcome::Succeeded, StageOutcome::ParseFailed, StageOutcome::TimedOut] {
            assert_eq!(transition(PipelineState::Complete, outcome), PipelineState::Complete);
            assert_eq!(transition(PipelineState::Failed, outcome), PipelineState::Failed);
        }
    }

    #[test]
    fn test_outcome_classification() {
        let parse = AppError::StageParse {
            stage: Stage::Context,
            message: "bad".into(),
        };
        assert_eq!(StageOutcome::from_error(&parse), StageOutcome::ParseFailed);
        assert_eq!(
            StageOutcome::from_error(&AppError::Timeout { timeout_ms: 10 }),
            StageOutcome::TimedOut
        );
    }
}
