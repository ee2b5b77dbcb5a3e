use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::target::warehouse::{Stage, StagedFile};

/// Stages exports by copying them into a local directory.
#[derive(Debug, Clone)]
pub struct LocalStage {
    dir: PathBuf,
    prefix: String,
    staged: Arc<Mutex<Vec<String>>>,
}

impl LocalStage {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            staged: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Keys currently held by the stage.
    pub async fn staged_keys(&self) -> Vec<String> {
        self.staged.lock().await.clone()
    }
}

impl Stage for LocalStage {
    async fn upload(&self, local_path: &Path, file_name: &str) -> SyncResult<StagedFile> {
        let key = format!("{}{file_name}", self.prefix);
        let staged_path = self.dir.join(&key);

        let upload = async {
            if let Some(parent) = staged_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(local_path, &staged_path).await
        };
        upload
            .await
            .map_err(|err| sync_error!(ErrorKind::StageUploadFailed, "Failed to stage export", err))?;
        self.staged.lock().await.push(key.clone());

        Ok(StagedFile {
            key,
            uri: format!("file://{}", staged_path.display()),
        })
    }

    async fn remove(&self, staged: &StagedFile) -> SyncResult<()> {
        tokio::fs::remove_file(self.dir.join(&staged.key))
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::StageCleanupFailed,
                    "Failed to remove staged export",
                    err
                )
            })?;
        self.staged.lock().await.retain(|key| key != &staged.key);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_creates_prefix_directories() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("orders.csv.gz");
        std::fs::write(&export, b"data").unwrap();
        let stage = LocalStage::new(dir.path().join("stage"), "exports/daily/");

        let staged = stage.upload(&export, "orders.csv.gz").await.unwrap();

        assert_eq!(staged.key, "exports/daily/orders.csv.gz");
        assert!(dir.path().join("stage/exports/daily/orders.csv.gz").exists());
        assert_eq!(stage.staged_keys().await, vec![staged.key.clone()]);

        stage.remove(&staged).await.unwrap();
        assert!(stage.staged_keys().await.is_empty());
    }
}
