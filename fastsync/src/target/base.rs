use fastsync_config::shared::Grantee;
use std::future::Future;

use crate::error::{SyncError, SyncResult};
use crate::obfuscation::ObfuscationRule;
use crate::source::ExportFile;
use crate::table::TableName;
use crate::types::{ColumnDefinition, TargetKind};

/// Which of the two tables of a synced table an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// The table readers query.
    Live,
    /// The `_temp` table an export is loaded into before the swap.
    Temp,
}

/// Result of a swap that made the new data visible.
#[derive(Debug)]
pub enum SwapOutcome {
    Completed,
    /// The live table was replaced but dropping the leftover temporary table failed.
    CleanupFailed(SyncError),
}

/// A warehouse the exported tables are loaded into.
///
/// Every method waits for the warehouse to report completion before returning.
pub trait Target {
    fn kind(&self) -> TargetKind;

    /// Schema the temporary tables of `schema` are created in.
    fn temp_schema<'a>(&'a self, schema: &'a str) -> &'a str {
        schema
    }

    /// Creates `schema` if missing.
    fn create_schema(&self, schema: &str) -> impl Future<Output = SyncResult<()>> + Send;

    /// Creates a table with `columns` followed by the audit columns.
    ///
    /// A [`TableKind::Temp`] table replaces any previous one, a [`TableKind::Live`] table is only
    /// created when missing.
    fn create_table(
        &self,
        schema: &str,
        table: &TableName,
        kind: TableKind,
        columns: &[ColumnDefinition],
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Bulk loads an export into the temporary table.
    fn load_table(
        &self,
        schema: &str,
        table: &TableName,
        export: &ExportFile,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Applies every rule to the temporary table in a single statement.
    fn obfuscate_columns(
        &self,
        schema: &str,
        table: &TableName,
        rules: &[ObfuscationRule],
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Replaces the live table with the temporary table.
    ///
    /// Fails with [`crate::error::ErrorKind::SwapFailed`] when the live table could not be
    /// replaced, in which case it still holds its previous contents.
    fn swap_tables(
        &self,
        schema: &str,
        table: &TableName,
    ) -> impl Future<Output = SyncResult<SwapOutcome>> + Send;

    fn grant_usage_on_schema(
        &self,
        schema: &str,
        grantee: &Grantee,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    fn grant_select_on_schema(
        &self,
        schema: &str,
        grantee: &Grantee,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Whether schemas must be created up front, one at a time, instead of by each table.
    fn requires_serial_schema_creation(&self) -> bool {
        false
    }
}
