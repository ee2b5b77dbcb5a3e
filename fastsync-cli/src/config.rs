use anyhow::Context;
use clap::{Parser, ValueEnum};
use fastsync_config::shared::{Catalog, TransformationConfig, ValidationError};
use fastsync_config::{Config, load_config_file, load_json_file};
use serde::de::DeserializeOwned;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    Postgres,
    Mysql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    Bigquery,
    Redshift,
    Snowflake,
    /// Keeps loaded tables in memory, for dry runs.
    Memory,
}

/// Copies whole tables from a tap database into a warehouse.
#[derive(Debug, Parser)]
#[command(name = "fastsync", version)]
pub struct Args {
    #[arg(long, value_enum)]
    pub source: SourceArg,

    #[arg(long, value_enum)]
    pub target: TargetArg,

    /// Tap connection config (JSON).
    #[arg(long)]
    pub tap: PathBuf,

    /// Target config (JSON).
    #[arg(long)]
    pub target_config: PathBuf,

    /// Transformation config with obfuscation rules (JSON).
    #[arg(long)]
    pub transform: Option<PathBuf>,

    /// Singer catalog selecting the replication method of each table (JSON).
    #[arg(long)]
    pub properties: Option<PathBuf>,

    /// State file receiving the bookmarks.
    #[arg(long)]
    pub state: PathBuf,

    /// Tables to sync, as `schema.table`.
    #[arg(long, value_delimiter = ',', required = true)]
    pub tables: Vec<String>,

    /// Directory exports are written to before they are staged.
    #[arg(long)]
    pub export_dir: PathBuf,

    /// Maximum number of tables synced at once. Defaults to the number of cores.
    #[arg(long)]
    pub max_parallelism: Option<usize>,
}

impl Args {
    pub fn max_parallelism(&self) -> Result<Option<NonZeroUsize>, ValidationError> {
        match self.max_parallelism {
            Some(max) => NonZeroUsize::new(max)
                .map(Some)
                .ok_or(ValidationError::MaxParallelismZero),
            None => Ok(None),
        }
    }
}

/// Loads a tap or target config, applying `APP_TAP__*` or `APP_TARGET__*` overrides.
pub fn load_settings<T>(path: &Path) -> anyhow::Result<T>
where
    T: Config + DeserializeOwned,
{
    load_config_file::<T>(path).with_context(|| format!("failed to load {}", path.display()))
}

pub fn load_transformations(path: Option<&Path>) -> anyhow::Result<TransformationConfig> {
    match path {
        Some(path) => Ok(load_json_file(path)?),
        None => Ok(TransformationConfig::default()),
    }
}

/// Loads the catalog. Without one every table is synced as `FULL_TABLE`.
pub fn load_catalog(path: Option<&Path>) -> anyhow::Result<Catalog> {
    match path {
        Some(path) => Ok(load_json_file(path)?),
        None => Ok(Catalog::default()),
    }
}
