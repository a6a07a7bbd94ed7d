//! On-disk index snapshots
//!
//! The whole index (documents plus raw vectors) is serialised as one JSON
//! file. Writes go to a sibling temp file first and are renamed into place.

use super::VectorIndex;
use chrono::{DateTime, Utc};
use drugvista_common::errors::{AppError, Result};
use drugvista_common::models::Document;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    /// Embedding model that produced the vectors
    pub model: String,
    pub dimension: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub documents: Vec<Document>,
}

impl IndexSnapshot {
    pub fn capture(index: &VectorIndex, model: &str) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            model: model.to_string(),
            dimension: index.dimension(),
            created_at: Utc::now(),
            documents: index.documents().cloned().collect(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec(self)?;
        let tmp = sibling_path(path, ".tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;

        tracing::info!(
            path = %path.display(),
            documents = self.documents.len(),
            "Index snapshot saved"
        );
        Ok(())
    }

    /// Load a snapshot; `Ok(None)` when no file exists yet
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: Self = serde_json::from_slice(&body)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AppError::InvalidFormat {
                message: format!(
                    "unsupported index snapshot version {} (expected {})",
                    snapshot.version, SNAPSHOT_VERSION
                ),
            });
        }
        Ok(Some(snapshot))
    }

    /// Rebuild the index, re-validating every document
    pub fn into_index(self) -> Result<VectorIndex> {
        VectorIndex::from_documents(self.documents)
    }

    /// Move an unusable snapshot file out of the way so the next save does
    /// not overwrite it. Returns where it now lives.
    pub async fn set_aside(path: &Path) -> Result<PathBuf> {
        let aside = sibling_path(path, ".unreadable");
        tokio::fs::rename(path, &aside).await?;
        Ok(aside)
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "index.json".into());
    name.push(suffix);
    path.with_file_name(name)
}
