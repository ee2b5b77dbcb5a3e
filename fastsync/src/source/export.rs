use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::sync_error;
use crate::table::TableName;

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Builds the export file name of a table.
pub fn export_file_name(database_name: &str, table: &TableName, now: DateTime<Utc>) -> String {
    format!(
        "pipelinewise_fastsync_{database_name}_{}_{}.csv.gz",
        table.qualified_name(),
        now.format("%Y%m%d-%H%M%S")
    )
}

/// CSV writer buffering rows in memory, in the export file layout (no header row).
pub(crate) fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new())
}

/// Returns the rows buffered so far and leaves `csv` writing into an empty buffer.
pub(crate) fn take_chunk(csv: &mut csv::Writer<Vec<u8>>) -> SyncResult<Bytes> {
    let full = std::mem::replace(csv, csv_writer());
    let buffer = full.into_inner().map_err(|err| err.into_error())?;

    Ok(Bytes::from(buffer))
}

/// A local export, removed from disk when dropped.
#[derive(Debug)]
pub struct ExportFile {
    path: PathBuf,
    file_name: String,
}

impl ExportFile {
    pub fn new(export_dir: &Path, file_name: String) -> ExportFile {
        ExportFile {
            path: export_dir.join(&file_name),
            file_name,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl Drop for ExportFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), error = %err, "could not remove export file");
            }
            _ => {}
        }
    }
}

/// Gzip compresses CSV chunks into an export file on a blocking thread.
#[derive(Debug)]
pub(crate) struct ExportWriter {
    sender: mpsc::Sender<Bytes>,
    handle: JoinHandle<SyncResult<()>>,
}

impl ExportWriter {
    pub(crate) fn create(export: &ExportFile) -> ExportWriter {
        let (sender, mut receiver) = mpsc::channel::<Bytes>(WRITER_CHANNEL_CAPACITY);
        let path = export.path().to_path_buf();

        let handle = tokio::task::spawn_blocking(move || -> SyncResult<()> {
            let file = File::create(&path)?;
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

            while let Some(chunk) = receiver.blocking_recv() {
                encoder.write_all(&chunk)?;
            }

            encoder.finish()?.flush()?;

            Ok(())
        });

        ExportWriter { sender, handle }
    }

    /// Queues a chunk of CSV data. Fails when the writer stopped on an earlier error.
    pub(crate) async fn write(&self, chunk: Bytes) -> SyncResult<()> {
        self.sender.send(chunk).await.map_err(|_| {
            sync_error!(
                ErrorKind::SourceIoError,
                "Export writer stopped before the export completed"
            )
        })
    }

    /// Flushes every queued chunk and closes the file.
    pub(crate) async fn finish(self) -> SyncResult<()> {
        drop(self.sender);

        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(sync_error!(
                ErrorKind::SourceIoError,
                "Export writer task failed",
                err
            )),
        }
    }

    /// Stops the writer after a failed export, returning its own error if it had one.
    pub(crate) async fn abort(self) -> Option<SyncError> {
        self.finish().await.err()
    }
}
