//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::store::{CheckpointID, CheckpointStore};
use crate::CheckpointFile;

/// Filesystem implementation of CheckpointStore trait.
///
/// Stores one JSON file per checkpoint id. Writes go to a temporary file
/// that is synced and then renamed over the previous checkpoint.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, id: &CheckpointID) -> PathBuf {
        self.dir.join(format!("{}.json", id.key()))
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn store_checkpoint(&self, id: &CheckpointID, file: &CheckpointFile) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.with_context(|| {
            format!(
                "Failed to create checkpoint directory {}",
                self.dir.display()
            )
        })?;

        let path = self.path_for(id);
        let tmp_path = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(file)?;

        {
            let mut tmp = tokio::fs::File::create(&tmp_path)
                .await
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            tmp.write_all(contents.as_bytes()).await?;
            tmp.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to replace checkpoint {}", path.display()))?;
        sync_dir(&self.dir).await?;

        tracing::debug!("Stored checkpoint to {}", path.display());
        Ok(())
    }

    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<CheckpointFile>> {
        let path = self.path_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read checkpoint {}", path.display()))
            }
        };

        let file = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint {}", path.display()))?;
        Ok(Some(file))
    }
}

/// Flush the directory entry so a completed rename survives a crash.
#[cfg(unix)]
pub(crate) async fn sync_dir(dir: &Path) -> Result<()> {
    let handle = tokio::fs::File::open(dir)
        .await
        .with_context(|| format!("Failed to open checkpoint directory {}", dir.display()))?;
    handle
        .sync_all()
        .await
        .with_context(|| format!("Failed to sync checkpoint directory {}", dir.display()))
}

// Directories cannot be opened for syncing on this platform.
#[cfg(not(unix))]
pub(crate) async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
