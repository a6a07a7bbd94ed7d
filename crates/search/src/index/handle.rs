//! Shared, atomically replaceable index

use super::VectorIndex;
use drugvista_common::errors::Result;
use drugvista_common::metrics;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Holds the active index.
///
/// Readers take an `Arc` snapshot and keep it for as long as they need a
/// consistent view. Writers build a new index off to the side and swap it
/// in; in-flight readers never observe a half-updated index.
#[derive(Clone)]
pub struct IndexHandle {
    current: Arc<RwLock<Arc<VectorIndex>>>,
    writer: Arc<Mutex<()>>,
}

impl IndexHandle {
    pub fn new(index: VectorIndex) -> Self {
        metrics::record_index_size(index.len());
        Self {
            current: Arc::new(RwLock::new(Arc::new(index))),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// The index as of now
    pub fn snapshot(&self) -> Arc<VectorIndex> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a fully built index
    pub fn replace(&self, index: VectorIndex) {
        let documents = index.len();
        let next = Arc::new(index);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        metrics::record_index_size(documents);
        tracing::info!(documents, "Vector index replaced");
    }

    /// Copy-on-write update. Concurrent updates are serialised so none is lost.
    pub async fn update<F>(&self, apply: F) -> Result<Arc<VectorIndex>>
    where
        F: FnOnce(&mut VectorIndex) -> Result<()>,
    {
        let _guard = self.writer.lock().await;
        let mut next = (*self.snapshot()).clone();
        apply(&mut next)?;
        self.replace(next);
        Ok(self.snapshot())
    }
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self::new(VectorIndex::new())
    }
}
