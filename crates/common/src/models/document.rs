//! Corpus document model

use serde::{Deserialize, Serialize};

/// Coarse document category, used for labelling evidence in prompts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    Paper,
    ClinicalTrial,
    Market,
    PatientData,
    #[default]
    Other,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::Paper => "paper",
            DocumentCategory::ClinicalTrial => "clinical_trial",
            DocumentCategory::Market => "market",
            DocumentCategory::PatientData => "patient_data",
            DocumentCategory::Other => "other",
        }
    }

    /// Parse a free-form category name (as sent with uploads)
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "paper" | "papers" => DocumentCategory::Paper,
            "clinical_trial" | "clinical_trials" | "trial" => DocumentCategory::ClinicalTrial,
            "market" => DocumentCategory::Market,
            "patient_data" | "patient" => DocumentCategory::PatientData,
            _ => DocumentCategory::Other,
        }
    }
}

/// A corpus document with its embedding.
///
/// Immutable once ingested; the vector index owns it until the next rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable document identifier
    pub id: String,

    /// Full document text
    pub text: String,

    /// Human-readable label surfaced as evidence (usually a file name)
    pub source_label: String,

    /// Category metadata
    #[serde(default)]
    pub category: DocumentCategory,

    /// Embedding vector as produced by the embedder
    pub embedding: Vec<f32>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        source_label: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_label: source_label.into(),
            category: DocumentCategory::Other,
            embedding,
        }
    }

    pub fn with_category(mut self, category: DocumentCategory) -> Self {
        self.category = category;
        self
    }

    /// First `max_chars` characters of the text, trimmed
    pub fn excerpt(&self, max_chars: usize) -> String {
        self.text.trim().chars().take(max_chars).collect::<String>().trim_end().to_string()
    }
}
