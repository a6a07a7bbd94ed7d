//! Evidence retrieval
//!
//! A retriever turns query text into scored [`EvidenceItem`]s. Retrieval is
//! all-or-nothing: any failure while embedding or searching surfaces as
//! `AppError::Retrieval` and no partial result is returned.

mod vector;

pub use vector::{PinnedRetriever, VectorRetriever};

use async_trait::async_trait;
use drugvista_common::config::RetrievalConfig;
use drugvista_common::errors::Result;
use drugvista_common::models::{EvidenceItem, EvidenceSet};

/// Shaping applied to every retrieved hit
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Maximum excerpt length in characters
    pub excerpt_chars: usize,
    /// Hits scoring below this are dropped
    pub min_relevance: Option<f32>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            excerpt_chars: 500,
            min_relevance: None,
        }
    }
}

impl From<&RetrievalConfig> for RetrievalOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            excerpt_chars: config.excerpt_chars,
            min_relevance: config.min_relevance,
        }
    }
}

/// Common trait for evidence retrievers
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` evidence items for the query, best first
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<EvidenceItem>>;

    /// Retrieve for several sub-queries and merge.
    ///
    /// Duplicates keep their highest score. The result is ordered by score,
    /// with ties left in first-seen order.
    async fn retrieve_many(&self, queries: &[String], k: usize) -> Result<Vec<EvidenceItem>> {
        let mut merged = EvidenceSet::new();
        for query in queries {
            merged.extend(self.retrieve(query, k).await?);
        }

        let mut items = merged.into_vec();
        items.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        Ok(items)
    }
}
