use coldsync_core::models::{PoolSyncOverview, QueueStats, SourceStats};
use serde::Serialize;

use crate::commands::common::{format_stats_lines, format_timestamp, print_json, App};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub media: QueueStats,
    pub media_by_source: Vec<SourceStats>,
    pub pools: PoolSyncOverview,
}

pub async fn run_stats(app: &App, as_json: bool) -> Result<(), CliError> {
    let report = StatsReport {
        media: app.media.stats().await?,
        media_by_source: app.media.stats_by_source().await?,
        pools: app.pools.overview().await?,
    };

    if as_json {
        return print_json(&report);
    }

    for line in format_report_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_report_lines(report: &StatsReport) -> Vec<String> {
    let mut lines = format_stats_lines("media", &report.media);
    for source in &report.media_by_source {
        lines.extend(format_stats_lines(&format!("  {}", source.source), &source.stats));
    }
    lines.extend(format_stats_lines("pools", &report.pools.totals));
    for pool in &report.pools.pools {
        lines.extend(format_stats_lines(&format!("  {}", pool.pool_name), &pool.stats));
        if let Some(scan) = &pool.scan {
            lines.push(format!(
                "  last scan {}: {} found, {} queued in {} ms{}",
                format_timestamp(scan.last_scan_at),
                scan.files_found,
                scan.files_enqueued,
                scan.scan_duration_ms,
                if scan.is_scanning { " (scanning)" } else { "" }
            ));
        }
    }
    lines
}
