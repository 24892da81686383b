//! coldsync CLI - Operate the replication queues from the terminal
//!
//! Runs the sync workers in the foreground and exposes the admin
//! operations (stats, retries, scans, restore) as subcommands.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use coldsync_core::services::MediaEnqueue;

use crate::cli::{Cli, Commands};
use crate::commands::common::{load_config, App};
use crate::commands::enqueue::{run_enqueue, run_initial_sync};
use crate::commands::failed::run_failed;
use crate::commands::reap::run_reap;
use crate::commands::restore::run_restore;
use crate::commands::retry::{run_reset, run_retry};
use crate::commands::run::run_workers;
use crate::commands::scan::run_scan;
use crate::commands::stats::run_stats;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "coldsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let app = App::open(load_config(cli.db_path)?).await?;

    match cli.command {
        Commands::Run => run_workers(app).await?,
        Commands::Enqueue {
            source,
            media_id,
            file_path,
            file_name,
            size,
            thock,
            media_type,
            origin,
            json,
        } => {
            let request = MediaEnqueue {
                source: source.into(),
                media_id,
                file_path,
                file_name,
                file_size: size,
                thock_number: thock,
                media_type,
                origin: origin.into(),
            };
            run_enqueue(&app, &request, json).await?;
        }
        Commands::Stats { json } => run_stats(&app, json).await?,
        Commands::Failed {
            queue,
            source,
            limit,
            json,
        } => run_failed(&app, queue, source.as_deref(), limit, json).await?,
        Commands::Retry { queue, source } => run_retry(&app, queue, source.as_deref()).await?,
        Commands::Reset { queue, id, json } => run_reset(&app, queue, id, json).await?,
        Commands::Scan { pool, json } => run_scan(&app, pool.as_deref(), json).await?,
        Commands::Restore { json } => run_restore(&app, json).await?,
        Commands::Reap { lease_secs, json } => run_reap(&app, lease_secs, json).await?,
        Commands::InitialSync => run_initial_sync(&app).await?,
    }

    Ok(())
}
