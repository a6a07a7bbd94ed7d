//! Evidence items and the ordered, deduplicating evidence set

use super::DocumentCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A scored excerpt from the corpus, attached to a run as justification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub document_id: String,
    pub source_label: String,
    pub relevance_score: f32,
    pub excerpt: String,
    #[serde(default)]
    pub category: DocumentCategory,
}

/// Evidence keyed by document id, in first-insertion order.
///
/// Re-inserting a known document keeps its position and raises its score to
/// the higher of the two. Once `capacity` is reached new documents are dropped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvidenceSet {
    items: Vec<EvidenceItem>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
    capacity: Option<usize>,
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Insert an item; returns true if it was a new document
    pub fn insert(&mut self, item: EvidenceItem) -> bool {
        if let Some(&pos) = self.positions.get(&item.document_id) {
            let existing = &mut self.items[pos];
            if item.relevance_score > existing.relevance_score {
                existing.relevance_score = item.relevance_score;
            }
            return false;
        }

        if self.capacity.is_some_and(|cap| self.items.len() >= cap) {
            return false;
        }

        self.positions.insert(item.document_id.clone(), self.items.len());
        self.items.push(item);
        true
    }

    /// Insert many items; returns the number of new documents
    pub fn extend<I: IntoIterator<Item = EvidenceItem>>(&mut self, items: I) -> usize {
        let mut added = 0;
        for item in items {
            if self.insert(item) {
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.positions.contains_key(document_id)
    }

    pub fn get(&self, document_id: &str) -> Option<&EvidenceItem> {
        self.positions.get(document_id).map(|&pos| &self.items[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|cap| self.items.len() >= cap)
    }

    pub fn into_vec(self) -> Vec<EvidenceItem> {
        self.items
    }
}
