use fastsync::runner::{RunSettings, SyncSummary, parse_tables, run_fastsync};
use fastsync::source::{MySqlSource, PostgresSource, Source};
use fastsync::state::{StateFile, new_state_lock};
use fastsync::sync::SyncContext;
use fastsync::table::TableName;
use fastsync::target::Target;
use fastsync::target::memory::MemoryTarget;
use fastsync_config::load_json_file;
use fastsync_config::shared::{
    BigQueryTargetConfig, MySqlTapConfig, PostgresTapConfig, RedshiftTargetConfig,
    SnowflakeTargetConfig, TargetSchemaConfig,
};
use fastsync_targets::bigquery::bigquery_target;
use fastsync_targets::redshift::redshift_target;
use fastsync_targets::snowflake::snowflake_target;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Args, SourceArg, TargetArg, load_catalog, load_settings, load_transformations};

/// Everything a run needs besides the source and the target.
struct RunInputs {
    tables: Vec<TableName>,
    context: SyncContext,
    settings: RunSettings,
}

/// Loads the configs named by `args` and syncs every selected table.
pub async fn run(args: Args) -> anyhow::Result<SyncSummary> {
    let inputs = RunInputs {
        tables: parse_tables(&args.tables)?,
        context: SyncContext {
            transformations: Arc::new(load_transformations(args.transform.as_deref())?),
            catalog: Arc::new(load_catalog(args.properties.as_deref())?),
            state_file: StateFile::new(&args.state),
            state_lock: new_state_lock(),
            export_dir: args.export_dir.clone(),
        },
        settings: RunSettings {
            max_parallelism: args.max_parallelism()?,
        },
    };

    // Static dispatch over every source and target pair, verbose but without trait objects.
    match args.source {
        SourceArg::Postgres => {
            let config: PostgresTapConfig = load_settings(&args.tap)?;
            config.validate()?;
            debug!(
                host = %config.connection.host,
                port = config.connection.port,
                dbname = %config.connection.dbname,
                tls_enabled = config.connection.tls.enabled,
                slot_name = %config.slot_name(),
                "postgres tap config"
            );

            run_with_source(PostgresSource::new(config), &args, inputs).await
        }
        SourceArg::Mysql => {
            let config: MySqlTapConfig = load_settings(&args.tap)?;
            config.validate()?;
            debug!(host = %config.connection.host, "mysql tap config");

            run_with_source(MySqlSource::new(config), &args, inputs).await
        }
    }
}

async fn run_with_source<S>(source: S, args: &Args, inputs: RunInputs) -> anyhow::Result<SyncSummary>
where
    S: Source + Send + Sync + 'static,
{
    match args.target {
        TargetArg::Bigquery => {
            let config: BigQueryTargetConfig = load_settings(&args.target_config)?;
            config.validate()?;
            let target = bigquery_target(&config).await?;

            start(source, target, &config.schema, inputs).await
        }
        TargetArg::Redshift => {
            let config: RedshiftTargetConfig = load_settings(&args.target_config)?;
            config.validate()?;
            let target = redshift_target(&config)?;

            start(source, target, &config.schema, inputs).await
        }
        TargetArg::Snowflake => {
            let config: SnowflakeTargetConfig = load_settings(&args.target_config)?;
            config.validate()?;
            let target = snowflake_target(&config)?;

            start(source, target, &config.schema, inputs).await
        }
        TargetArg::Memory => {
            let config: TargetSchemaConfig = load_json_file(&args.target_config)?;

            start(source, MemoryTarget::new(), &config, inputs).await
        }
    }
}

async fn start<S, T>(
    source: S,
    target: T,
    schema_config: &TargetSchemaConfig,
    inputs: RunInputs,
) -> anyhow::Result<SyncSummary>
where
    S: Source + Send + Sync + 'static,
    T: Target + Send + Sync + 'static,
{
    info!(
        source = ?source.kind(),
        target = ?target.kind(),
        database = %source.database_name(),
        "source and target ready"
    );

    let summary = run_fastsync(
        source,
        target,
        inputs.tables,
        schema_config,
        inputs.context,
        &inputs.settings,
    )
    .await?;

    Ok(summary)
}
