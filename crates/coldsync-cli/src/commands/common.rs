use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use coldsync_core::clock::SystemClock;
use coldsync_core::config::ColdsyncConfig;
use coldsync_core::db::{Database, QueueContext};
use coldsync_core::models::{BackoffSchedule, MediaSource, QueueStats};
use coldsync_core::services::{MediaSyncService, PoolSyncService};
use coldsync_core::ReplicationRecord;
use serde::Serialize;

use crate::error::CliError;

/// Everything a command needs, opened once per invocation.
pub struct App {
    pub config: ColdsyncConfig,
    pub db: Arc<Database>,
    pub ctx: QueueContext,
    pub media: MediaSyncService,
    pub pools: PoolSyncService,
}

impl App {
    pub async fn open(config: ColdsyncConfig) -> Result<Self, CliError> {
        let db = Arc::new(Database::open(&config.db_path).await?);
        let ctx = QueueContext::new(
            Arc::new(SystemClock),
            BackoffSchedule::default(),
            config.max_retries,
        );
        let targets = config.build_targets();
        let media = MediaSyncService::new(
            Arc::clone(&db),
            ctx.clone(),
            targets.clone(),
            config.local_base_dir.clone(),
        );
        let pools = PoolSyncService::new(
            Arc::clone(&db),
            ctx.clone(),
            targets.nas,
            config.pools.clone(),
        );

        Ok(Self {
            config,
            db,
            ctx,
            media,
            pools,
        })
    }
}

pub fn load_config(db_path: Option<PathBuf>) -> Result<ColdsyncConfig, CliError> {
    let mut config = ColdsyncConfig::from_env()?;
    if let Some(db_path) = db_path {
        config.db_path = db_path;
    }
    Ok(config)
}

pub fn parse_media_source(source: Option<&str>) -> Result<Option<MediaSource>, CliError> {
    source
        .map(|value| {
            value
                .parse::<MediaSource>()
                .map_err(|_| CliError::InvalidArgument(format!("Unknown media source: {value}")))
        })
        .transpose()
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn format_timestamp(timestamp_ms: Option<i64>) -> String {
    timestamp_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map_or_else(
            || "-".to_string(),
            |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

pub fn format_stats_lines(label: &str, stats: &QueueStats) -> Vec<String> {
    vec![
        format!(
            "{label}: {} files ({}), {} synced ({})",
            stats.total_files,
            format_bytes(stats.total_bytes),
            stats.synced,
            format_bytes(stats.synced_bytes)
        ),
        format!(
            "  pending {} | uploading {} | failed {} (dead {}) | skipped {}",
            stats.pending, stats.uploading, stats.failed, stats.dead_lettered, stats.skipped
        ),
        format!(
            "  copies: local {} | nas {} | r2 {}",
            stats.local_synced, stats.nas_synced, stats.r2_synced
        ),
    ]
}

pub fn format_record_lines(records: &[ReplicationRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            format!(
                "#{} {} {} [{}] retries {}/{} last try {}: {}",
                record.id,
                record.source,
                record.target_key,
                record.synced_targets,
                record.retry_count,
                record.max_retries,
                format_timestamp(record.started_at),
                record.last_error.as_deref().unwrap_or("-")
            )
        })
        .collect()
}
