//! Shared application state and index bootstrap

use drugvista_common::{
    config::AppConfig,
    embeddings::{create_embedder, Embedder},
    errors::Result,
    llm::{create_model, ReasoningModel},
    models::Document,
};
use drugvista_context::ReasoningPipeline;
use drugvista_search::{
    build_index, embed_documents, DirectoryCorpus, IndexHandle, IndexSnapshot, RetrievalOptions,
    SourceDocument, VectorIndex, VectorRetriever,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub index: IndexHandle,
    pub embedder: Arc<dyn Embedder>,
    pub pipeline: Arc<ReasoningPipeline>,
    persist_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        index: VectorIndex,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ReasoningModel>,
    ) -> Self {
        let handle = IndexHandle::new(index);
        let retriever = VectorRetriever::new(
            handle.clone(),
            embedder.clone(),
            RetrievalOptions::from(&config.retrieval),
        );
        let pipeline = ReasoningPipeline::from_config(&config, retriever, model);

        Self {
            config: Arc::new(config),
            index: handle,
            embedder,
            pipeline: Arc::new(pipeline),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Build collaborators from configuration and load the corpus
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let model = create_model(&config.llm)?;
        info!(
            embedding_model = embedder.model_name(),
            reasoning_model = model.model_name(),
            "Model collaborators ready"
        );

        let index = load_index(&config, embedder.as_ref()).await?;
        Ok(Self::new(config, index, embedder, model))
    }

    /// Write the current index to the snapshot file.
    ///
    /// Saves are serialised and always capture the latest index, so the file
    /// never ends up older than an acknowledged ingest.
    pub async fn persist_index(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let index = self.index.snapshot();
        IndexSnapshot::capture(&index, self.embedder.model_name())
            .save(&self.config.corpus.index_path)
            .await
    }
}

/// Restore the index from its snapshot, or build it from the corpus directory.
///
/// A snapshot made with a different embedding model is not reused as is:
/// the corpus is rebuilt and any snapshot documents it does not contain
/// (earlier uploads) are re-embedded into the new index. An unreadable
/// snapshot is moved aside rather than overwritten.
async fn load_index(config: &AppConfig, embedder: &dyn Embedder) -> Result<VectorIndex> {
    let path = &config.corpus.index_path;
    let mut carried = Vec::new();

    match IndexSnapshot::load(path).await {
        Ok(Some(snapshot)) if snapshot_matches(&snapshot, embedder) => {
            info!(
                path = %path.display(),
                documents = snapshot.documents.len(),
                created_at = %snapshot.created_at,
                "Restoring index from snapshot"
            );
            match snapshot.into_index() {
                Ok(index) => return Ok(index),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Index snapshot inconsistent, rebuilding");
                    set_aside(path).await;
                }
            }
        }
        Ok(Some(snapshot)) => {
            warn!(
                snapshot_model = %snapshot.model,
                embedding_model = embedder.model_name(),
                documents = snapshot.documents.len(),
                "Index snapshot was built with another embedding model, re-embedding"
            );
            carried = snapshot.documents;
        }
        Ok(None) => info!(path = %path.display(), "No index snapshot found"),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Index snapshot unreadable, rebuilding");
            set_aside(path).await;
        }
    }

    let corpus = DirectoryCorpus::new(config.corpus.data_dir.clone());
    let mut index = build_index(&corpus, embedder, config.embedding.batch_size).await?;

    let uploads: Vec<SourceDocument> = carried
        .into_iter()
        .filter(|d| !index.contains(&d.id))
        .map(source_of)
        .collect();
    if !uploads.is_empty() {
        let count = uploads.len();
        for document in embed_documents(uploads, embedder, config.embedding.batch_size).await? {
            index.add(document)?;
        }
        info!(documents = count, "Carried snapshot documents into the rebuilt index");
    }

    if let Err(e) = IndexSnapshot::capture(&index, embedder.model_name()).save(path).await {
        warn!(error = %e, "Failed to save index snapshot");
    }
    Ok(index)
}

async fn set_aside(path: &Path) {
    match IndexSnapshot::set_aside(path).await {
        Ok(aside) => warn!(path = %aside.display(), "Kept the previous snapshot file"),
        Err(e) => warn!(error = %e, path = %path.display(), "Could not move the previous snapshot aside"),
    }
}

fn source_of(document: Document) -> SourceDocument {
    SourceDocument {
        id: document.id,
        text: document.text,
        source_label: document.source_label,
        category: document.category,
    }
}

fn snapshot_matches(snapshot: &IndexSnapshot, embedder: &dyn Embedder) -> bool {
    snapshot.model == embedder.model_name()
        && snapshot.dimension.map_or(true, |d| d == embedder.dimension())
}
