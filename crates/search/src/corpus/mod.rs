//! Document store
//!
//! Sources produce raw [`SourceDocument`]s; [`build_index`] embeds them in
//! batches and assembles a fresh [`VectorIndex`].

mod extract;
mod upload;

pub use upload::{records_from_upload, text_record, UploadFormat, MIN_RECORD_CHARS};

use crate::index::VectorIndex;
use async_trait::async_trait;
use drugvista_common::embeddings::Embedder;
use drugvista_common::errors::{AppError, Result};
use drugvista_common::models::{Document, DocumentCategory};
use std::path::{Path, PathBuf};

/// A corpus document before embedding
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub id: String,
    pub text: String,
    pub source_label: String,
    pub category: DocumentCategory,
}

/// Anything that can enumerate corpus documents
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn load(&self) -> Result<Vec<SourceDocument>>;
}

/// In-memory source
pub struct StaticSource(pub Vec<SourceDocument>);

#[async_trait]
impl DocumentSource for StaticSource {
    async fn load(&self) -> Result<Vec<SourceDocument>> {
        Ok(self.0.clone())
    }
}

/// Subdirectories of the data directory and the category each holds
const CORPUS_LAYOUT: &[(&str, DocumentCategory)] = &[
    ("papers", DocumentCategory::Paper),
    ("clinical_trials", DocumentCategory::ClinicalTrial),
    ("market", DocumentCategory::Market),
];

/// Text files laid out as `papers/`, `clinical_trials/` and `market/`
pub struct DirectoryCorpus {
    root: PathBuf,
}

impl DirectoryCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "txt") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl DocumentSource for DirectoryCorpus {
    async fn load(&self) -> Result<Vec<SourceDocument>> {
        let mut documents = Vec::new();

        for (subdir, category) in CORPUS_LAYOUT {
            let dir = self.root.join(subdir);
            if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                tracing::warn!(dir = %dir.display(), "Corpus directory missing, skipping");
                continue;
            }

            for path in Self::read_dir_sorted(&dir).await? {
                let text = tokio::fs::read_to_string(&path).await?;
                if text.trim().chars().count() < MIN_RECORD_CHARS {
                    tracing::debug!(path = %path.display(), "Skipping near-empty document");
                    continue;
                }
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                documents.push(SourceDocument {
                    id: format!("{}/{}", subdir, file_name),
                    text,
                    source_label: file_name,
                    category: *category,
                });
            }
        }

        tracing::info!(
            root = %self.root.display(),
            documents = documents.len(),
            "Corpus loaded"
        );
        Ok(documents)
    }
}

/// Embed source documents in batches of `batch_size`
pub async fn embed_documents(
    sources: Vec<SourceDocument>,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<Vec<Document>> {
    let mut documents = Vec::with_capacity(sources.len());

    for chunk in sources.chunks(batch_size.max(1)) {
        let texts: Vec<String> = chunk.iter().map(|d| d.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != chunk.len() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "embedder returned {} vectors for {} documents",
                    vectors.len(),
                    chunk.len()
                ),
            });
        }

        for (source, vector) in chunk.iter().zip(vectors) {
            documents.push(
                Document::new(source.id.clone(), source.text.clone(), source.source_label.clone(), vector)
                    .with_category(source.category),
            );
        }
    }

    Ok(documents)
}

/// Load every document from `source`, embed, and build a new index
pub async fn build_index(
    source: &dyn DocumentSource,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<VectorIndex> {
    let sources = source.load().await?;
    let count = sources.len();
    tracing::info!(documents = count, model = embedder.model_name(), "Building vector index");

    let documents = embed_documents(sources, embedder, batch_size).await?;
    let index = VectorIndex::from_documents(documents)?;

    tracing::info!(documents = index.len(), dimension = ?index.dimension(), "Vector index built");
    Ok(index)
}
