//! A binary that drives the ride-sharing workload against the database and
//! reports per-operation latencies.

use anyhow::Context;
use clap::{Args, Command, FromArgMatches};

use colored::Colorize;
use log::{error, info};
use movr_driver::config::{DatabaseConfig, MetricsConfig, RetryConfig, WorkloadConfig};
use movr_driver::db::executor::TransactionExecutor;
use movr_driver::db::storage_postgres::StoragePostgres;
use movr_driver::stats::Stats;
use movr_driver::workload::error::WorkloadError;
use movr_driver::workload::{self, Workload};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Create env logger.
    let name = "[movr]".cyan();
    movr_driver::logging::init_logging(name);

    let cli = Command::new("MovR workload driver CLI");
    let cli = DatabaseConfig::augment_args(cli);
    let cli = WorkloadConfig::augment_args(cli);
    let cli = RetryConfig::augment_args(cli);
    let cli = MetricsConfig::augment_args(cli);
    let matches = cli.get_matches();
    let database_config =
        DatabaseConfig::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let workload_config =
        WorkloadConfig::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let retry_config = RetryConfig::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let metrics_config =
        MetricsConfig::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());

    movr_driver::metrics::init(&metrics_config).context("Unable to start the metrics exporter")?;

    let cancel = CancellationToken::new();
    let cancel_on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping after the current ride");
            cancel_on_interrupt.cancel();
        }
    });

    let storage = StoragePostgres::connect(&database_config)
        .await
        .context("Could not open connection to database")?;
    let executor = TransactionExecutor::new(retry_config.retry_policy(), cancel.clone());
    let stats = Arc::new(Stats::new(workload_config.stats_interval()));

    let actors = match workload::prepare(&storage, &executor, &stats).await {
        Ok(actors) => actors,
        Err(WorkloadError::Cancelled) => {
            info!("Interrupted before the first ride");
            return Ok(());
        }
        Err(e) => {
            error!("Workload failed to start: {e}");
            return Err(e.into());
        }
    };
    let workload = Workload::new(
        Arc::new(storage),
        executor,
        stats.clone(),
        Arc::new(actors),
        workload_config,
        cancel,
    );
    match workload.run().await {
        Ok(rides) => {
            println!("{}", stats.flush(Instant::now()));
            info!("Workload finished after {rides} rides");
            Ok(())
        }
        Err(e) => {
            error!("Workload failed: {e}");
            Err(e.into())
        }
    }
}
