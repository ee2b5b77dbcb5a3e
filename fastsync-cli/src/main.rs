use clap::Parser;
use fastsync_telemetry::tracing::init_tracing_with_run_id;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Args;
use crate::core::run;

mod config;
mod core;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let run_id = Uuid::new_v4().to_string();
    let log_flusher = init_tracing_with_run_id(env!("CARGO_BIN_NAME"), Some(run_id.clone()))?;
    info!(run_id = %run_id, "starting fastsync");

    let summary = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args))?;

    // `exit` skips destructors, buffered log lines are flushed first.
    drop(log_flusher);
    if summary.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}

async fn async_main(args: Args) -> anyhow::Result<fastsync::runner::SyncSummary> {
    match run(args).await {
        Ok(summary) => Ok(summary),
        Err(err) => {
            error!("fastsync failed: {err:#}");
            Err(err)
        }
    }
}
