use std::time::Duration;

use coldsync_core::db::{LibSqlReplicationRepository, ReplicationRepository};
use coldsync_core::models::{QueueKind, StaleRequeue};
use serde::Serialize;

use crate::commands::common::{print_json, App};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct QueueReap {
    queue: QueueKind,
    #[serde(flatten)]
    result: StaleRequeue,
}

#[derive(Debug, Serialize)]
struct ReapReport {
    queues: Vec<QueueReap>,
    scan_flags_cleared: u64,
}

pub async fn run_reap(app: &App, lease_secs: Option<u64>, as_json: bool) -> Result<(), CliError> {
    let lease = lease_secs.map_or(app.config.claim_lease, Duration::from_secs);
    let conn = app.db.connect().await?;

    let mut queues = Vec::new();
    for queue in QueueKind::ALL {
        let result = LibSqlReplicationRepository::new(&conn, queue, &app.ctx)
            .requeue_stale(lease)
            .await?;
        queues.push(QueueReap { queue, result });
    }
    let report = ReapReport {
        queues,
        scan_flags_cleared: app
            .pools
            .clear_stale_scans(app.config.pool_scan_stale_after)
            .await?,
    };

    if as_json {
        return print_json(&report);
    }
    for entry in &report.queues {
        println!(
            "{}: {} requeued, {} dead-lettered",
            entry.queue, entry.result.requeued, entry.result.dead_lettered
        );
    }
    println!("scan flags cleared: {}", report.scan_flags_cleared);
    Ok(())
}
