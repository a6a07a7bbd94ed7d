//! Reasoning stages, their output schemas, and stage results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One step of the fixed four-stage reasoning sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Context,
    Clinical,
    Market,
    Decision,
}

/// Value type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-empty string
    Text,
    /// Array of strings (may be empty)
    List,
}

/// A required field of a stage's output schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn text(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Text }
}

const fn list(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::List }
}

const CONTEXT_SCHEMA: &[FieldSpec] = &[text("summary"), text("intent"), list("entities")];
const CLINICAL_SCHEMA: &[FieldSpec] = &[text("viability"), list("risks"), text("findings")];
const MARKET_SCHEMA: &[FieldSpec] = &[text("signal"), list("risks"), text("outlook")];
const DECISION_SCHEMA: &[FieldSpec] = &[text("recommendation"), text("rationale")];

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 4] = [Stage::Context, Stage::Clinical, Stage::Market, Stage::Decision];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Context => "Context",
            Stage::Clinical => "Clinical",
            Stage::Market => "Market",
            Stage::Decision => "Decision",
        }
    }

    /// Position in the fixed stage order
    pub fn index(&self) -> usize {
        match self {
            Stage::Context => 0,
            Stage::Clinical => 1,
            Stage::Market => 2,
            Stage::Decision => 3,
        }
    }

    /// The stage that follows this one, `None` after Decision
    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.index() + 1).copied()
    }

    /// Required output fields
    pub fn schema(&self) -> &'static [FieldSpec] {
        match self {
            Stage::Context => CONTEXT_SCHEMA,
            Stage::Clinical => CLINICAL_SCHEMA,
            Stage::Market => MARKET_SCHEMA,
            Stage::Decision => DECISION_SCHEMA,
        }
    }

    /// Sampling temperature; later stages are more conservative
    pub fn temperature(&self) -> f32 {
        match self {
            Stage::Context => 0.3,
            Stage::Clinical | Stage::Market => 0.2,
            Stage::Decision => 0.1,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated output field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::List(_) => FieldKind::List,
        }
    }
}

/// Structured output of one completed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,

    /// Schema fields keyed by name
    pub structured_fields: BTreeMap<String, FieldValue>,

    /// Cited document ids, first citation first, no duplicates
    pub cited_evidence: Vec<String>,

    /// Stage confidence in [0, 1]
    pub raw_confidence: f64,
}

impl StageResult {
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.structured_fields.get(field) {
            Some(FieldValue::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn list(&self, field: &str) -> Option<&[String]> {
        match self.structured_fields.get(field) {
            Some(FieldValue::List(values)) => Some(values.as_slice()),
            _ => None,
        }
    }
}
