//! Staging of export files in object storage through `object_store`.

use fastsync::error::{ErrorKind, SyncError, SyncResult};
use fastsync::sync_error;
use fastsync::target::warehouse::{Stage, StagedFile};
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore, PutPayload};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Bytes read from the export file per upload part.
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Parts uploaded concurrently for one file.
const MAX_CONCURRENT_PARTS: usize = 4;

/// A bucket exports are uploaded to before the warehouse loads them.
#[derive(Clone)]
pub struct ObjectStoreStage {
    store: Arc<dyn ObjectStore>,
    /// Url scheme of the bucket, `gs` or `s3`.
    scheme: &'static str,
    bucket: String,
    prefix: String,
    chunk_size: usize,
}

impl ObjectStoreStage {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scheme: &'static str,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> ObjectStoreStage {
        ObjectStoreStage {
            store,
            scheme,
            bucket: bucket.into(),
            prefix: prefix.into(),
            chunk_size: UPLOAD_CHUNK_SIZE,
        }
    }

    /// Object key and url an export is staged under.
    fn staged_file(&self, file_name: &str) -> StagedFile {
        let key = format!("{}{file_name}", self.prefix);
        let uri = format!("{}://{}/{key}", self.scheme, self.bucket);

        StagedFile { key, uri }
    }

    /// Uploads `local_path` as a multipart upload, aborted when any part or the completion fails.
    async fn upload_file(&self, local_path: &Path, key: &ObjectPath) -> SyncResult<()> {
        let mut file = File::open(local_path).await?;
        let mut upload = self
            .store
            .put_multipart(key)
            .await
            .map_err(|err| stage_error(ErrorKind::StageUploadFailed, err))?;

        let result = match self.upload_parts(&mut file, upload.as_mut()).await {
            Ok(()) => upload
                .complete()
                .await
                .map(|_| ())
                .map_err(|err| stage_error(ErrorKind::StageUploadFailed, err)),
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            if let Err(abort_err) = upload.abort().await {
                warn!(key = %key, error = %abort_err, "could not abort multipart upload");
            }
            return Err(err);
        }

        Ok(())
    }

    async fn upload_parts(&self, file: &mut File, upload: &mut dyn MultipartUpload) -> SyncResult<()> {
        let mut parts = JoinSet::new();

        loop {
            let mut chunk = Vec::with_capacity(self.chunk_size);
            (&mut *file)
                .take(self.chunk_size as u64)
                .read_to_end(&mut chunk)
                .await?;
            if chunk.is_empty() {
                break;
            }

            while parts.len() >= MAX_CONCURRENT_PARTS {
                join_part(&mut parts).await?;
            }
            let last = chunk.len() < self.chunk_size;
            parts.spawn(upload.put_part(PutPayload::from(chunk)));
            if last {
                break;
            }
        }

        while !parts.is_empty() {
            join_part(&mut parts).await?;
        }

        Ok(())
    }
}

async fn join_part(parts: &mut JoinSet<object_store::Result<()>>) -> SyncResult<()> {
    match parts.join_next().await {
        Some(Ok(Ok(()))) | None => Ok(()),
        Some(Ok(Err(err))) => Err(stage_error(ErrorKind::StageUploadFailed, err)),
        Some(Err(err)) => Err(sync_error!(
            ErrorKind::StageUploadFailed,
            "Upload part task failed",
            err
        )),
    }
}

impl fmt::Debug for ObjectStoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreStage")
            .field("bucket", &format!("{}://{}", self.scheme, self.bucket))
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Stage for ObjectStoreStage {
    async fn upload(&self, local_path: &Path, file_name: &str) -> SyncResult<StagedFile> {
        let staged = self.staged_file(file_name);
        let key = ObjectPath::from(staged.key.as_str());

        debug!(uri = %staged.uri, "uploading export");
        self.upload_file(local_path, &key).await.map_err(|err| {
            // Local read errors surface as upload failures of the table.
            match err.kind() {
                ErrorKind::StageUploadFailed => err,
                _ => sync_error!(ErrorKind::StageUploadFailed, "Failed to read export for upload", err),
            }
        })?;

        Ok(staged)
    }

    async fn remove(&self, staged: &StagedFile) -> SyncResult<()> {
        self.store
            .delete(&ObjectPath::from(staged.key.as_str()))
            .await
            .map_err(|err| stage_error(ErrorKind::StageCleanupFailed, err))
    }
}

pub(crate) fn stage_error(kind: ErrorKind, err: object_store::Error) -> SyncError {
    let description = match kind {
        ErrorKind::StageCleanupFailed => "Failed to remove staged object",
        ErrorKind::StageUploadFailed => "Failed to upload export to the stage",
        _ => "Object storage request failed",
    };

    sync_error!(kind, description, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use object_store::memory::InMemory;
    use object_store::{
        GetOptions, GetResult, ListResult, ObjectMeta, PutMultipartOpts, PutOptions, PutResult,
        UploadPart,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Accepts multipart uploads but rejects every part, recording whether the upload was
    /// aborted.
    #[derive(Debug, Default)]
    struct RejectingStore {
        inner: InMemory,
        aborted: Arc<AtomicBool>,
    }

    impl fmt::Display for RejectingStore {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("RejectingStore")
        }
    }

    #[derive(Debug)]
    struct RejectingUpload {
        aborted: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MultipartUpload for RejectingUpload {
        fn put_part(&mut self, _data: PutPayload) -> UploadPart {
            Box::pin(async {
                Err(object_store::Error::Generic {
                    store: "RejectingStore",
                    source: "part rejected".into(),
                })
            })
        }

        async fn complete(&mut self) -> object_store::Result<PutResult> {
            Err(object_store::Error::NotImplemented)
        }

        async fn abort(&mut self) -> object_store::Result<()> {
            self.aborted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl ObjectStore for RejectingStore {
        async fn put_opts(
            &self,
            location: &ObjectPath,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            _location: &ObjectPath,
            _opts: PutMultipartOpts,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            Ok(Box::new(RejectingUpload {
                aborted: self.aborted.clone(),
            }))
        }

        async fn get_opts(
            &self,
            location: &ObjectPath,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn delete(&self, location: &ObjectPath) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(
            &self,
            prefix: Option<&ObjectPath>,
        ) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&ObjectPath>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(
            &self,
            from: &ObjectPath,
            to: &ObjectPath,
        ) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    fn stage(prefix: &str) -> (ObjectStoreStage, Arc<InMemory>) {
        let store = Arc::new(InMemory::new());

        (
            ObjectStoreStage::new(store.clone(), "gs", "acme-stage", prefix),
            store,
        )
    }

    #[test]
    fn test_staged_file_uses_prefix_and_scheme() {
        let (stage, _) = stage("fastsync/");

        assert_eq!(
            stage.staged_file("pipelinewise_fastsync_shop_public.orders_20240101-000000.csv.gz"),
            StagedFile {
                key: "fastsync/pipelinewise_fastsync_shop_public.orders_20240101-000000.csv.gz"
                    .to_owned(),
                uri: "gs://acme-stage/fastsync/pipelinewise_fastsync_shop_public.orders_20240101-000000.csv.gz"
                    .to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn test_upload_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("export.csv.gz");
        tokio::fs::write(&local, b"1,2,3\n").await.unwrap();
        let (stage, store) = stage("");

        let staged = stage.upload(&local, "export.csv.gz").await.unwrap();
        let stored = store
            .get(&ObjectPath::from("export.csv.gz"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(stored.as_ref(), b"1,2,3\n");

        stage.remove(&staged).await.unwrap();
        assert!(store.get(&ObjectPath::from("export.csv.gz")).await.is_err());
    }

    #[tokio::test]
    async fn test_upload_in_several_parts() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("export.csv.gz");
        let contents: Vec<u8> = (0..=255u8).cycle().take(70).collect();
        tokio::fs::write(&local, &contents).await.unwrap();
        let (mut stage, store) = stage("exports/");
        stage.chunk_size = 8;

        stage.upload(&local, "export.csv.gz").await.unwrap();

        let stored = store
            .get(&ObjectPath::from("exports/export.csv.gz"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(stored.as_ref(), contents.as_slice());
    }

    #[tokio::test]
    async fn test_rejected_part_aborts_the_upload() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("export.csv.gz");
        tokio::fs::write(&local, vec![7u8; 64]).await.unwrap();
        let store = Arc::new(RejectingStore::default());
        let mut stage = ObjectStoreStage::new(store.clone(), "s3", "acme-stage", "");
        stage.chunk_size = 8;

        let err = stage.upload(&local, "export.csv.gz").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StageUploadFailed);
        assert!(store.aborted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_export_is_an_upload_failure() {
        let (stage, _) = stage("");

        let err = stage
            .upload(Path::new("/does/not/exist.csv.gz"), "exist.csv.gz")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StageUploadFailed);
    }
}
