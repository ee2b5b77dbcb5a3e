//! A [`Target`] assembled from a SQL [`Dialect`], a [`QueryClient`] running the statements and
//! a [`Stage`] holding exports while the warehouse loads them.

use fastsync_config::shared::Grantee;
use std::future::Future;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, SyncResult};
use crate::obfuscation::{ObfuscationRule, obfuscation_update};
use crate::source::ExportFile;
use crate::sync_error;
use crate::table::TableName;
use crate::target::base::{SwapOutcome, TableKind, Target};
use crate::target::dialect::{CreateMode, Dialect};
use crate::types::{ColumnDefinition, TargetKind};

/// An export uploaded to object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Object key, `{prefix}{file_name}`.
    pub key: String,
    /// Full object url, for example `gs://bucket/key` or `s3://bucket/key`.
    pub uri: String,
}

/// Runs SQL against a warehouse.
pub trait QueryClient: Send + Sync {
    /// Executes `statements` in order, each one only after the previous completed.
    fn execute(&self, statements: &[String]) -> impl Future<Output = SyncResult<()>> + Send;
}

/// Object storage the warehouse bulk loads from.
pub trait Stage: Send + Sync {
    fn upload(
        &self,
        local_path: &Path,
        file_name: &str,
    ) -> impl Future<Output = SyncResult<StagedFile>> + Send;

    fn remove(&self, staged: &StagedFile) -> impl Future<Output = SyncResult<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct WarehouseTarget<D, C, S> {
    dialect: D,
    client: C,
    stage: S,
}

impl<D, C, S> WarehouseTarget<D, C, S>
where
    D: Dialect,
    C: QueryClient,
    S: Stage,
{
    pub fn new(dialect: D, client: C, stage: S) -> Self {
        Self {
            dialect,
            client,
            stage,
        }
    }

    /// Schema and raw table name addressed by `kind`.
    fn locate<'a>(&'a self, schema: &'a str, table: &TableName, kind: TableKind) -> (&'a str, String) {
        match kind {
            TableKind::Live => (schema, table.name.clone()),
            TableKind::Temp => (self.dialect.temp_schema(schema), table.temp_name()),
        }
    }

    async fn execute_one(&self, statement: String) -> SyncResult<()> {
        self.client.execute(&[statement]).await
    }
}

impl<D, C, S> Target for WarehouseTarget<D, C, S>
where
    D: Dialect,
    C: QueryClient,
    S: Stage,
{
    fn kind(&self) -> TargetKind {
        self.dialect.kind()
    }

    fn temp_schema<'a>(&'a self, schema: &'a str) -> &'a str {
        self.dialect.temp_schema(schema)
    }

    async fn create_schema(&self, schema: &str) -> SyncResult<()> {
        let statements = self.dialect.create_schema(schema);
        debug!(schema, statements = statements.len(), "creating schema");

        self.client.execute(&statements).await
    }

    async fn create_table(
        &self,
        schema: &str,
        table: &TableName,
        kind: TableKind,
        columns: &[ColumnDefinition],
    ) -> SyncResult<()> {
        let (schema, name) = self.locate(schema, table, kind);
        let mode = match kind {
            TableKind::Temp => CreateMode::Replace,
            TableKind::Live => CreateMode::IfNotExists,
        };

        let statements = self.dialect.create_table(schema, &name, columns, mode);
        debug!(schema, table = %name, statements = statements.len(), "creating table");

        self.client.execute(&statements).await
    }

    async fn load_table(
        &self,
        schema: &str,
        table: &TableName,
        export: &ExportFile,
    ) -> SyncResult<()> {
        let staged = self.stage.upload(export.path(), export.file_name()).await?;
        debug!(key = %staged.key, "export staged");

        let (schema, name) = self.locate(schema, table, TableKind::Temp);
        // Not logged, the statement may carry credentials.
        let copy = self.dialect.copy_into(schema, &name, &staged);
        let result = self.execute_one(copy).await;

        if let Err(err) = self.stage.remove(&staged).await {
            warn!(key = %staged.key, error = %err, "could not remove staged export");
        }

        result
    }

    async fn obfuscate_columns(
        &self,
        schema: &str,
        table: &TableName,
        rules: &[ObfuscationRule],
    ) -> SyncResult<()> {
        let (schema, name) = self.locate(schema, table, TableKind::Temp);

        match obfuscation_update(&self.dialect, schema, &name, rules) {
            Some(update) => {
                info!(table = %table, rules = rules.len(), "obfuscating columns");
                self.execute_one(update).await
            }
            None => Ok(()),
        }
    }

    async fn swap_tables(&self, schema: &str, table: &TableName) -> SyncResult<SwapOutcome> {
        let swap = self.dialect.swap_tables(schema, table);

        if let Err(err) = self.client.execute(&swap.replace).await {
            return Err(sync_error!(
                ErrorKind::SwapFailed,
                "Failed to replace the live table with the temporary table",
                err
            ));
        }

        if swap.cleanup.is_empty() {
            return Ok(SwapOutcome::Completed);
        }

        match self.client.execute(&swap.cleanup).await {
            Ok(()) => Ok(SwapOutcome::Completed),
            Err(err) => Ok(SwapOutcome::CleanupFailed(sync_error!(
                ErrorKind::TempTableCleanupFailed,
                "Failed to drop the temporary table after the swap",
                err
            ))),
        }
    }

    async fn grant_usage_on_schema(&self, schema: &str, grantee: &Grantee) -> SyncResult<()> {
        self.execute_one(self.dialect.grant_usage_on_schema(schema, grantee))
            .await
    }

    async fn grant_select_on_schema(&self, schema: &str, grantee: &Grantee) -> SyncResult<()> {
        self.execute_one(self.dialect.grant_select_on_schema(schema, grantee))
            .await
    }

    fn requires_serial_schema_creation(&self) -> bool {
        self.dialect.requires_serial_schema_creation()
    }
}
