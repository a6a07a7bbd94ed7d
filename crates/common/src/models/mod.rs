//! Domain models shared by retrieval and reasoning

mod artifact;
mod document;
mod evidence;
mod stage;

pub use artifact::{AnalysisArtifact, ConfidenceLevel};
pub use document::{Document, DocumentCategory};
pub use evidence::{EvidenceItem, EvidenceSet};
pub use stage::{FieldKind, FieldSpec, FieldValue, Stage, StageResult};
