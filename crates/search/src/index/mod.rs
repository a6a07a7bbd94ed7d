//! In-memory vector index
//!
//! Documents are stored with an L2-normalised copy of their embedding, so
//! cosine similarity reduces to an inner product. Search is exhaustive.

mod handle;
mod snapshot;

pub use handle::IndexHandle;
pub use snapshot::IndexSnapshot;

use drugvista_common::errors::{AppError, Result};
use drugvista_common::models::Document;
use std::collections::HashMap;

/// A nearest-neighbour hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub document_id: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    document: Document,
    normalized: Vec<f32>,
}

/// Exhaustive cosine-similarity index over corpus documents
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from documents, in order
    pub fn from_documents<I: IntoIterator<Item = Document>>(documents: I) -> Result<Self> {
        let mut index = Self::new();
        for document in documents {
            index.add(document)?;
        }
        Ok(index)
    }

    /// Add a document. Ids must be unique and all vectors share one dimension.
    pub fn add(&mut self, document: Document) -> Result<()> {
        if self.positions.contains_key(&document.id) {
            return Err(AppError::DuplicateDocument { id: document.id });
        }
        if document.embedding.is_empty() {
            return Err(AppError::Validation {
                message: format!("document {} has an empty embedding", document.id),
                field: Some("embedding".to_string()),
            });
        }
        if document.embedding.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Validation {
                message: format!("document {} has a non-finite embedding value", document.id),
                field: Some("embedding".to_string()),
            });
        }
        match self.dimension {
            Some(dim) if dim != document.embedding.len() => {
                return Err(AppError::Validation {
                    message: format!(
                        "document {} has dimension {}, index expects {}",
                        document.id,
                        document.embedding.len(),
                        dim
                    ),
                    field: Some("embedding".to_string()),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(document.embedding.len()),
        }

        let normalized = normalize(&document.embedding);
        self.positions.insert(document.id.clone(), self.entries.len());
        self.entries.push(IndexEntry {
            document,
            normalized,
        });
        Ok(())
    }

    /// Top-`k` documents by cosine similarity, best first.
    ///
    /// Equal scores keep insertion order. An empty index yields no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != dimension {
            return Err(AppError::Retrieval {
                message: format!(
                    "query vector has dimension {}, index expects {}",
                    query.len(),
                    dimension
                ),
            });
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Retrieval {
                message: "query vector contains non-finite values".to_string(),
            });
        }

        let query = normalize(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| {
                let score = entry
                    .normalized
                    .iter()
                    .zip(&query)
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                (pos, score)
            })
            .collect();

        // Stable sort: ties stay in insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| SearchHit {
                document_id: self.entries[pos].document.id.clone(),
                score,
            })
            .collect())
    }

    pub fn get(&self, document_id: &str) -> Option<&Document> {
        self.positions
            .get(document_id)
            .map(|&pos| &self.entries[pos].document)
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.positions.contains_key(document_id)
    }

    /// Documents in insertion order
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.entries.iter().map(|e| &e.document)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}
