//! Source databases tables are exported from.

mod export;
mod mysql;
mod postgres;

pub use export::{ExportFile, export_file_name};
pub(crate) use export::{ExportWriter, csv_writer, take_chunk};
pub use mysql::{MySqlConnection, MySqlSource};
pub use postgres::{PostgresConnection, PostgresSource, connect_postgres};

use std::future::Future;

use crate::bookmark::LogPosition;
use crate::error::SyncResult;
use crate::table::TableName;
use crate::types::{SourceColumn, SourceKind};

/// A source database, able to open connections used by a single table sync.
pub trait Source {
    type Connection: SourceConnection + Send;

    fn kind(&self) -> SourceKind;

    /// Database name used in export file names and stream ids.
    fn database_name(&self) -> &str;

    /// Schema a table selected without one is read from, if the source knows it up front.
    fn default_schema(&self) -> Option<&str> {
        None
    }

    /// Key of a table's bookmark in the state file.
    fn stream_id(&self, table: &TableName) -> String;

    fn connect(&self) -> impl Future<Output = SyncResult<Self::Connection>> + Send;
}

/// A connection dedicated to one table sync.
pub trait SourceConnection {
    /// Current position of the database's change log.
    fn log_position(&mut self) -> impl Future<Output = SyncResult<LogPosition>> + Send;

    /// Current maximum of `column`, as JSON.
    fn max_value(
        &mut self,
        table: &TableName,
        column: &str,
    ) -> impl Future<Output = SyncResult<serde_json::Value>> + Send;

    /// Columns of `table` in ordinal order.
    fn table_columns(
        &mut self,
        table: &TableName,
    ) -> impl Future<Output = SyncResult<Vec<SourceColumn>>> + Send;

    /// Writes every row of `table` to `export` as headerless gzip CSV: `columns` followed by
    /// the three audit columns. Returns the number of exported rows.
    fn export_table(
        &mut self,
        table: &TableName,
        columns: &[SourceColumn],
        export: &ExportFile,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    fn close(self) -> impl Future<Output = SyncResult<()>> + Send;
}
