//! Full sync of a single table, from the source export to the grants on the target schema.

use chrono::Utc;
use fastsync_config::shared::{Catalog, TransformationConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bail;
use crate::bookmark::{Bookmark, capture_bookmark};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::obfuscation::obfuscation_rules;
use crate::schema::TablePlan;
use crate::source::{ExportFile, Source, SourceConnection, export_file_name};
use crate::state::{StateFile, StateLock};
use crate::target::{SwapOutcome, TableKind, Target};
use crate::types::{SourceColumn, is_reserved_column, map_columns};

/// Read-only inputs shared by every table of a run, plus the state lock.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub transformations: Arc<TransformationConfig>,
    pub catalog: Arc<Catalog>,
    pub state_file: StateFile,
    pub state_lock: StateLock,
    pub export_dir: PathBuf,
}

/// A table that was synced, possibly leaving something behind.
#[derive(Debug)]
pub struct TableSyncOutcome {
    /// Cleanup that failed after the new data became visible.
    pub residual_cleanup: Option<SyncError>,
}

struct SourceExport {
    bookmark: Option<Bookmark>,
    columns: Vec<SourceColumn>,
    export: ExportFile,
}

async fn export_from_source<C>(
    connection: &mut C,
    plan: &TablePlan,
    default_schema: Option<&str>,
    catalog: &Catalog,
    export: ExportFile,
) -> SyncResult<SourceExport>
where
    C: SourceConnection + Send,
{
    let table = &plan.table;

    let bookmark = capture_bookmark(connection, table, default_schema, catalog).await?;

    let columns: Vec<SourceColumn> = connection
        .table_columns(table)
        .await?
        .into_iter()
        .filter(|column| !is_reserved_column(&column.name))
        .collect();
    if columns.is_empty() {
        bail!(
            ErrorKind::MissingTableSchema,
            "Table has no columns or does not exist",
            table
        );
    }

    info!(table = %table, columns = columns.len(), "exporting table");
    connection.export_table(table, &columns, &export).await?;

    Ok(SourceExport {
        bookmark,
        columns,
        export,
    })
}

/// Syncs one table: bookmark, export, temporary table load, obfuscation, swap, state and grants.
///
/// The steps run strictly in order. The source connection is closed as soon as the export is
/// written, whether it succeeded or not, and the local export is removed on every path.
pub async fn sync_table<S, T>(
    plan: &TablePlan,
    source: &S,
    target: &T,
    context: &SyncContext,
) -> SyncResult<TableSyncOutcome>
where
    S: Source,
    T: Target,
{
    let table = &plan.table;
    let schema = plan.target_schema.as_str();

    let file_name = export_file_name(source.database_name(), table, Utc::now());
    let export = ExportFile::new(&context.export_dir, file_name);

    let mut connection = source.connect().await?;
    let exported = export_from_source(
        &mut connection,
        plan,
        source.default_schema(),
        &context.catalog,
        export,
    )
    .await;
    if let Err(err) = connection.close().await {
        warn!(table = %table, error = %err, "could not close source connection");
    }
    let SourceExport {
        bookmark,
        columns,
        export,
    } = exported?;

    let column_definitions = map_columns(source.kind(), target.kind(), &columns);

    if !target.requires_serial_schema_creation() {
        target.create_schema(schema).await?;
    }

    info!(table = %table, schema, "loading temporary table");
    target
        .create_table(schema, table, TableKind::Temp, &column_definitions)
        .await?;
    target.load_table(schema, table, &export).await?;
    drop(export);

    let rules = obfuscation_rules(table, &context.transformations);
    target.obfuscate_columns(schema, table, &rules).await?;

    target
        .create_table(schema, table, TableKind::Live, &column_definitions)
        .await?;

    let residual_cleanup = match target.swap_tables(schema, table).await? {
        SwapOutcome::Completed => None,
        SwapOutcome::CleanupFailed(err) => {
            warn!(table = %table, error = %err, "live table replaced but temporary table cleanup failed");
            Some(err)
        }
    };
    info!(table = %table, schema, "live table replaced");

    if let Some(bookmark) = &bookmark {
        context
            .state_file
            .save_bookmark(&context.state_lock, &source.stream_id(table), bookmark)
            .await?;
    }

    for grantee in &plan.grantees {
        target.grant_usage_on_schema(schema, grantee).await?;
        target.grant_select_on_schema(schema, grantee).await?;
    }

    Ok(TableSyncOutcome { residual_cleanup })
}
