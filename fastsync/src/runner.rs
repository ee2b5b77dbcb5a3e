//! Fan-out of table syncs over a bounded number of concurrent tokio tasks.

use fastsync_config::shared::TargetSchemaConfig;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::schema::{
    TablePlan, check_temp_table_collisions, distinct_target_schemas, resolve_plans,
};
use crate::source::Source;
use crate::sync::{SyncContext, sync_table};
use crate::sync_error;
use crate::table::TableName;
use crate::target::Target;

/// Run-wide settings.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Maximum number of tables synced at once, the number of available cores when unset.
    pub max_parallelism: Option<NonZeroUsize>,
}

impl RunSettings {
    pub fn parallelism(&self) -> usize {
        match self.max_parallelism {
            Some(max) => max.get(),
            None => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

/// A table whose sync failed.
#[derive(Debug)]
pub struct TableFailure {
    pub table: TableName,
    pub error: SyncError,
}

impl fmt::Display for TableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.table, self.error)
    }
}

/// Outcome of a run.
#[derive(Debug)]
pub struct SyncSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<TableFailure>,
    /// Synced tables that left a temporary table or staged object behind.
    pub residual_cleanups: Vec<TableFailure>,
    pub parallelism: usize,
    pub elapsed: Duration,
}

impl SyncSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Parses table identifiers, dropping repeated ones.
pub fn parse_tables<I, T>(identifiers: I) -> SyncResult<Vec<TableName>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut tables: Vec<TableName> = Vec::new();
    for identifier in identifiers {
        let table = TableName::parse(identifier.as_ref())?;
        if !tables.contains(&table) {
            tables.push(table);
        }
    }

    Ok(tables)
}

/// Syncs every table, at most `settings.parallelism()` at a time.
///
/// Configuration problems and schema creation failures abort the run before any table is
/// touched. Failures of single tables are collected in the returned summary.
pub async fn run_fastsync<S, T>(
    source: S,
    target: T,
    tables: Vec<TableName>,
    schema_config: &TargetSchemaConfig,
    context: SyncContext,
    settings: &RunSettings,
) -> SyncResult<SyncSummary>
where
    S: Source + Send + Sync + 'static,
    T: Target + Send + Sync + 'static,
{
    let start = Instant::now();
    let parallelism = settings.parallelism();

    let plans = resolve_plans(&tables, schema_config)?;
    check_temp_table_collisions(&plans, |schema| target.temp_schema(schema).to_owned())?;

    tokio::fs::create_dir_all(&context.export_dir)
        .await
        .map_err(|err| {
            sync_error!(
                ErrorKind::IoError,
                "Failed to create the export directory",
                format!("{}: {err}", context.export_dir.display())
            )
        })?;

    info!(
        tables = %tables.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
        total = tables.len(),
        parallelism,
        "starting sync"
    );

    if target.requires_serial_schema_creation() {
        for schema in distinct_target_schemas(&plans) {
            debug!(schema = %schema, "creating target schema");
            target.create_schema(&schema).await?;
        }
    }

    let source = Arc::new(source);
    let target = Arc::new(target);
    let context = Arc::new(context);
    let permits = Arc::new(Semaphore::new(parallelism));

    let mut handles = Vec::with_capacity(plans.len());
    for plan in plans {
        let source = source.clone();
        let target = target.clone();
        let context = context.clone();
        let permits = permits.clone();
        let table = plan.table.clone();

        let span = tracing::info_span!("table_sync", table = %plan.table);
        let handle = tokio::spawn(
            async move {
                let permit = permits.acquire_owned().await.map_err(|err| {
                    sync_error!(ErrorKind::InvalidState, "Worker pool closed", err)
                })?;

                let result = sync_plan(&plan, source.as_ref(), target.as_ref(), &context).await;
                drop(permit);

                result
            }
            .instrument(span),
        );

        handles.push((table, handle));
    }

    let total = handles.len();
    let mut failed = Vec::new();
    let mut residual_cleanups = Vec::new();

    for (table, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(err) => Err(sync_error!(
                ErrorKind::TableSyncWorkerPanic,
                "Table sync task panicked",
                err
            )),
        };

        match result {
            Ok(Some(error)) => residual_cleanups.push(TableFailure { table, error }),
            Ok(None) => {}
            Err(error) => failed.push(TableFailure { table, error }),
        }
    }

    let summary = SyncSummary {
        total,
        succeeded: total - failed.len(),
        failed,
        residual_cleanups,
        parallelism,
        elapsed: start.elapsed(),
    };
    log_summary(&summary);

    Ok(summary)
}

async fn sync_plan<S, T>(
    plan: &TablePlan,
    source: &S,
    target: &T,
    context: &SyncContext,
) -> SyncResult<Option<SyncError>>
where
    S: Source,
    T: Target,
{
    info!(table = %plan.table, schema = %plan.target_schema, "syncing table");

    match sync_table(plan, source, target, context).await {
        Ok(outcome) => {
            info!(table = %plan.table, "table synced");
            Ok(outcome.residual_cleanup)
        }
        Err(err) => {
            error!(table = %plan.table, error = %err, "table sync failed");
            Err(err)
        }
    }
}

fn log_summary(summary: &SyncSummary) {
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed.len(),
        parallelism = summary.parallelism,
        elapsed_secs = summary.elapsed.as_secs_f64(),
        "sync finished"
    );

    for residual in &summary.residual_cleanups {
        warn!("residual cleanup: {residual}");
    }
    for failure in &summary.failed {
        error!("table sync failed: {failure}");
    }
}
