use coldsync_core::services::ScanOutcome;

use crate::commands::common::{print_json, App};
use crate::error::CliError;

pub async fn run_scan(app: &App, pool: Option<&str>, as_json: bool) -> Result<(), CliError> {
    let names: Vec<String> = match pool {
        Some(name) => vec![app.pools.pool(name)?.name.clone()],
        None => app.pools.pools().iter().map(|pool| pool.name.clone()).collect(),
    };
    if names.is_empty() {
        return Err(CliError::InvalidArgument(
            "No pools configured. Set SYNC_POOLS=name=/path,...".to_string(),
        ));
    }

    let mut outcomes = Vec::with_capacity(names.len());
    for name in &names {
        outcomes.push(app.pools.scan_pool(name).await?);
    }

    if as_json {
        return print_json(&outcomes);
    }
    for (name, outcome) in names.iter().zip(&outcomes) {
        println!("{}", format_scan_outcome(name, outcome));
    }
    Ok(())
}

pub fn format_scan_outcome(pool: &str, outcome: &ScanOutcome) -> String {
    match outcome {
        ScanOutcome::Completed(summary) => format!(
            "{pool}: {} files found, {} queued in {} ms",
            summary.files_found, summary.files_enqueued, summary.duration_ms
        ),
        ScanOutcome::AlreadyScanning => format!("{pool}: already being scanned, skipped"),
    }
}
