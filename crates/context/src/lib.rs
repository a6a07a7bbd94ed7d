//! DrugVista Context Engine
//!
//! Turns a free-text query into an [`AnalysisArtifact`] by:
//! - Retrieving evidence for the query and for refined sub-queries
//! - Running the Context, Clinical, Market and Decision stages in order
//! - Validating every stage's output and citations
//! - Assembling the artifact and its confidence score
//!
//! [`AnalysisArtifact`]: drugvista_common::models::AnalysisArtifact

pub mod assembler;
pub mod executor;
pub mod pipeline;

pub use assembler::{aggregate_confidence, ResultAssembler};
pub use executor::{StageExecutor, StageRequest};
pub use pipeline::{
    FieldQueryStrategy, NoRefinement, PipelineFailure, PipelineOptions, PipelineRun, PipelineState,
    QueryStrategy, ReasoningPipeline, StageOutcome,
};
