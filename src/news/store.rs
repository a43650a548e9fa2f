// src/news/store.rs
//! Secondary, best-effort persistence of the latest snapshot: one document, replaced
//! wholesale on every publish.

use super::types::NewsSnapshot;
use crate::error::CoreError;
use async_trait::async_trait;
use log::{debug, info};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<NewsSnapshot>, CoreError>;

    async fn save(&self, snapshot: &NewsSnapshot) -> Result<(), CoreError>;

    fn describe(&self) -> String;
}

/// JSON file store. Writes go to a sibling temp file which is then renamed over the
/// target, so a crash mid-write never leaves a truncated document.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh sibling path per save, so overlapping saves never share a temp file.
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Option<NewsSnapshot>, CoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No stored snapshot at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: NewsSnapshot = serde_json::from_slice(&bytes)?;
        info!(
            "Loaded stored snapshot from {} ({} items)",
            self.path.display(),
            snapshot.len()
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &NewsSnapshot) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();
        let written = match tokio::fs::write(&temp, json).await {
            Ok(()) => tokio::fs::rename(&temp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tokio::fs::remove_file(&temp).await.ok();
            return Err(e.into());
        }
        debug!("Saved snapshot to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
