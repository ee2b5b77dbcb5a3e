use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::bail;
use crate::bookmark::LogPosition;
use crate::error::{ErrorKind, SyncResult};
use crate::source::{
    ExportFile, ExportWriter, Source, SourceConnection, csv_writer, take_chunk,
};
use crate::table::TableName;
use crate::types::{SourceColumn, SourceKind};

#[derive(Debug, Clone)]
struct MemorySourceTable {
    columns: Vec<SourceColumn>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone)]
struct SourceData {
    database_name: String,
    kind: SourceKind,
    tables: HashMap<String, MemorySourceTable>,
    log_position: Option<LogPosition>,
    failing_exports: HashSet<String>,
    panicking_exports: HashSet<String>,
}

/// A source serving tables from memory, with injectable failures.
///
/// Tables are addressed by their identifier as selected, for example `public.orders`.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<SourceData>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(database_name: impl Into<String>) -> Self {
        let data = SourceData {
            database_name: database_name.into(),
            kind: SourceKind::Postgres,
            tables: HashMap::new(),
            log_position: None,
            failing_exports: HashSet::new(),
            panicking_exports: HashSet::new(),
        };

        Self {
            data: Arc::new(data),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        Arc::make_mut(&mut self.data).kind = kind;
        self
    }

    pub fn with_table(
        mut self,
        identifier: &str,
        columns: Vec<SourceColumn>,
        rows: Vec<Vec<Option<String>>>,
    ) -> Self {
        Arc::make_mut(&mut self.data)
            .tables
            .insert(identifier.to_owned(), MemorySourceTable { columns, rows });
        self
    }

    /// Log position reported to log based bookmarks. Without one they fail with
    /// [`ErrorKind::LogPositionUnavailable`].
    pub fn with_log_position(mut self, position: LogPosition) -> Self {
        Arc::make_mut(&mut self.data).log_position = Some(position);
        self
    }

    /// Makes the export of `identifier` fail with [`ErrorKind::SourceQueryFailed`].
    pub fn fail_export(mut self, identifier: &str) -> Self {
        Arc::make_mut(&mut self.data)
            .failing_exports
            .insert(identifier.to_owned());
        self
    }

    /// Makes the export of `identifier` panic.
    pub fn panic_on_export(mut self, identifier: &str) -> Self {
        Arc::make_mut(&mut self.data)
            .panicking_exports
            .insert(identifier.to_owned());
        self
    }

    pub fn opened_connections(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed_connections(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Source for MemorySource {
    type Connection = MemorySourceConnection;

    fn kind(&self) -> SourceKind {
        self.data.kind
    }

    fn database_name(&self) -> &str {
        &self.data.database_name
    }

    fn default_schema(&self) -> Option<&str> {
        match self.data.kind {
            SourceKind::Postgres => Some("public"),
            SourceKind::MySql => Some(&self.data.database_name),
        }
    }

    fn stream_id(&self, table: &TableName) -> String {
        format!("{}-{}", self.data.database_name, table.stream_name())
    }

    async fn connect(&self) -> SyncResult<MemorySourceConnection> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(MemorySourceConnection {
            data: self.data.clone(),
            closed: self.closed.clone(),
        })
    }
}

pub struct MemorySourceConnection {
    data: Arc<SourceData>,
    closed: Arc<AtomicUsize>,
}

impl MemorySourceConnection {
    fn table(&self, table: &TableName) -> SyncResult<&MemorySourceTable> {
        match self.data.tables.get(&table.to_string()) {
            Some(source_table) => Ok(source_table),
            None => bail!(ErrorKind::SourceSchemaError, "Table does not exist", table),
        }
    }
}

impl SourceConnection for MemorySourceConnection {
    async fn log_position(&mut self) -> SyncResult<LogPosition> {
        match &self.data.log_position {
            Some(position) => Ok(position.clone()),
            None => bail!(
                ErrorKind::LogPositionUnavailable,
                "No log position configured"
            ),
        }
    }

    async fn max_value(&mut self, table: &TableName, column: &str) -> SyncResult<serde_json::Value> {
        let source_table = self.table(table)?;
        let Some(index) = source_table.columns.iter().position(|c| c.name == column) else {
            bail!(ErrorKind::SourceSchemaError, "Column does not exist", column);
        };

        let max = source_table
            .rows
            .iter()
            .filter_map(|row| row.get(index).cloned().flatten())
            .max();

        Ok(max.map(serde_json::Value::String).unwrap_or_default())
    }

    async fn table_columns(&mut self, table: &TableName) -> SyncResult<Vec<SourceColumn>> {
        Ok(self
            .data
            .tables
            .get(&table.to_string())
            .map(|source_table| source_table.columns.clone())
            .unwrap_or_default())
    }

    async fn export_table(
        &mut self,
        table: &TableName,
        columns: &[SourceColumn],
        export: &ExportFile,
    ) -> SyncResult<u64> {
        let identifier = table.to_string();
        if self.data.panicking_exports.contains(&identifier) {
            panic!("injected export panic for {identifier}");
        }
        if self.data.failing_exports.contains(&identifier) {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Injected export failure",
                identifier
            );
        }

        let source_table = self.table(table)?;
        let indexes: Vec<usize> = columns
            .iter()
            .filter_map(|column| {
                source_table
                    .columns
                    .iter()
                    .position(|c| c.name == column.name)
            })
            .collect();
        let extracted_at = Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string();

        let mut csv = csv_writer();
        for row in &source_table.rows {
            let mut record: Vec<&str> = indexes
                .iter()
                .map(|index| row.get(*index).and_then(|v| v.as_deref()).unwrap_or_default())
                .collect();
            record.extend([extracted_at.as_str(), extracted_at.as_str(), ""]);
            csv.write_record(&record)?;
        }

        let writer = ExportWriter::create(export);
        writer.write(take_chunk(&mut csv)?).await?;
        writer.finish().await?;

        Ok(source_table.rows.len() as u64)
    }

    async fn close(self) -> SyncResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}
