//! The analysis artifact emitted across the API boundary

use serde::{Deserialize, Serialize};

/// Final structured output of a completed pipeline run.
///
/// This is the wire contract of the analyze endpoint; field names are stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisArtifact {
    pub clinical_viability: String,
    pub key_evidence: Vec<String>,
    pub major_risks: Vec<String>,
    pub market_signal: String,
    pub recommendation: String,
    pub confidence_score: f64,
}

/// Coarse confidence band used in explanations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "HIGH",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::Low => "LOW",
        }
    }
}
