//! Singer state file writer.

use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bookmark::Bookmark;
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;

const BOOKMARKS_KEY: &str = "bookmarks";

/// Serializes writers of the state file across concurrently synced tables.
///
/// Held only around a read-modify-write of the file.
pub type StateLock = Arc<Mutex<()>>;

pub fn new_state_lock() -> StateLock {
    Arc::new(Mutex::new(()))
}

/// A singer state file: `{"currently_syncing": ..., "bookmarks": {stream_id: bookmark}}`.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> StateFile {
        StateFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the bookmark of `stream_id`, keeping every other key of the file in place.
    pub async fn save_bookmark(
        &self,
        lock: &StateLock,
        stream_id: &str,
        bookmark: &Bookmark,
    ) -> SyncResult<()> {
        let _guard = lock.lock().await;

        let mut state = self.read().await?;
        let bookmark = serde_json::to_value(bookmark)?;

        let Some(state_map) = state.as_object_mut() else {
            return Err(sync_error!(
                ErrorKind::StateFileError,
                "State file does not contain a JSON object",
                self.path.display()
            ));
        };

        let bookmarks = state_map
            .entry(BOOKMARKS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !bookmarks.is_object() {
            *bookmarks = Value::Object(Map::new());
        }
        if let Some(bookmarks) = bookmarks.as_object_mut() {
            bookmarks.insert(stream_id.to_owned(), bookmark);
        }

        let contents = serde_json::to_vec(&state)?;
        tokio::fs::write(&self.path, contents).await.map_err(|err| {
            sync_error!(
                ErrorKind::StateFileError,
                "Failed to write state file",
                format!("{}: {err}", self.path.display())
            )
        })?;

        info!(stream_id, "bookmark saved");

        Ok(())
    }

    async fn read(&self) -> SyncResult<Value> {
        match tokio::fs::read(&self.path).await {
            Ok(contents) if contents.iter().all(u8::is_ascii_whitespace) => Ok(empty_state()),
            Ok(contents) => serde_json::from_slice(&contents).map_err(|err| {
                sync_error!(
                    ErrorKind::StateFileError,
                    "State file is not valid JSON",
                    format!("{}: {err}", self.path.display())
                )
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(empty_state()),
            Err(err) => Err(sync_error!(
                ErrorKind::StateFileError,
                "Failed to read state file",
                format!("{}: {err}", self.path.display())
            )),
        }
    }
}

fn empty_state() -> Value {
    json!({ "currently_syncing": null, "bookmarks": {} })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::LogPosition;

    async fn read_json(path: &Path) -> Value {
        serde_json::from_slice(&tokio::fs::read(path).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::new(dir.path().join("state.json"));

        state
            .save_bookmark(&new_state_lock(), "shop-public-orders", &LogPosition::Lsn(7).into())
            .await
            .unwrap();

        assert_eq!(
            read_json(state.path()).await,
            json!({
                "currently_syncing": null,
                "bookmarks": {"shop-public-orders": {"lsn": 7, "version": 1}}
            })
        );
    }

    #[tokio::test]
    async fn test_existing_keys_kept_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(
            &path,
            r#"{"bookmarks":{"b-stream":{"lsn":1,"version":1},"a-stream":{"lsn":2,"version":1}},"currently_syncing":"x","extra":true}"#,
        )
        .await
        .unwrap();
        let state = StateFile::new(&path);

        state
            .save_bookmark(&new_state_lock(), "b-stream", &LogPosition::Lsn(9).into())
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            contents,
            r#"{"bookmarks":{"b-stream":{"lsn":9,"version":1},"a-stream":{"lsn":2,"version":1}},"currently_syncing":"x","extra":true}"#
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_keep_every_bookmark() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::new(dir.path().join("state.json"));
        let lock = new_state_lock();

        let mut handles = Vec::new();
        for i in 0..16u64 {
            let state = state.clone();
            let lock = lock.clone();
            handles.push(tokio::spawn(async move {
                state
                    .save_bookmark(&lock, &format!("stream-{i}"), &LogPosition::Lsn(i).into())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = read_json(state.path()).await;
        assert_eq!(state["bookmarks"].as_object().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_invalid_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let err = StateFile::new(&path)
            .save_bookmark(&new_state_lock(), "s", &LogPosition::Lsn(1).into())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StateFileError);
    }
}
