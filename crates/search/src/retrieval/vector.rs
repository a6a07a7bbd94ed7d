//! Vector similarity retrieval over the in-memory index

use super::{RetrievalOptions, Retriever};
use crate::index::{IndexHandle, VectorIndex};
use async_trait::async_trait;
use drugvista_common::embeddings::Embedder;
use drugvista_common::errors::{AppError, Result};
use drugvista_common::metrics;
use drugvista_common::models::EvidenceItem;
use std::sync::Arc;
use std::time::Instant;

/// Retriever over the live index.
///
/// Each call reads whatever index is current. Use [`VectorRetriever::pin`]
/// when several retrievals must see the same index.
#[derive(Clone)]
pub struct VectorRetriever {
    handle: IndexHandle,
    embedder: Arc<dyn Embedder>,
    options: RetrievalOptions,
}

impl VectorRetriever {
    pub fn new(handle: IndexHandle, embedder: Arc<dyn Embedder>, options: RetrievalOptions) -> Self {
        Self {
            handle,
            embedder,
            options,
        }
    }

    /// Bind to the current index snapshot
    pub fn pin(&self) -> PinnedRetriever {
        PinnedRetriever {
            index: self.handle.snapshot(),
            embedder: Arc::clone(&self.embedder),
            options: self.options.clone(),
        }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<EvidenceItem>> {
        self.pin().retrieve(query, k).await
    }
}

/// Retriever bound to one immutable index snapshot
#[derive(Clone)]
pub struct PinnedRetriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    options: RetrievalOptions,
}

impl PinnedRetriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>, options: RetrievalOptions) -> Self {
        Self {
            index,
            embedder,
            options,
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }
}

#[async_trait]
impl Retriever for PinnedRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<EvidenceItem>> {
        if self.index.is_empty() || k == 0 {
            tracing::debug!(query, "Index empty or k=0, skipping retrieval");
            return Ok(Vec::new());
        }

        let start = Instant::now();

        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| AppError::Retrieval {
                message: format!("query embedding failed: {}", e),
            })?;

        let hits = self.index.search(&vector, k)?;

        let mut items = Vec::with_capacity(hits.len());
        for hit in hits {
            if self.options.min_relevance.is_some_and(|min| hit.score < min) {
                continue;
            }
            let document = self.index.get(&hit.document_id).ok_or_else(|| AppError::Retrieval {
                message: format!("index returned unknown document {}", hit.document_id),
            })?;
            items.push(EvidenceItem {
                document_id: document.id.clone(),
                source_label: document.source_label.clone(),
                relevance_score: hit.score,
                excerpt: document.excerpt(self.options.excerpt_chars),
                category: document.category,
            });
        }

        let elapsed = start.elapsed();
        metrics::record_retrieval(elapsed.as_secs_f64(), items.len());
        tracing::debug!(
            query,
            k,
            results = items.len(),
            latency_ms = elapsed.as_millis() as u64,
            "Vector retrieval complete"
        );

        Ok(items)
    }
}
