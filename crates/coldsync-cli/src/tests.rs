use std::collections::HashMap;
use std::path::Path;

use clap::Parser;
use coldsync_core::config::ColdsyncConfig;
use coldsync_core::models::{MediaSource, PoolSyncOverview, QueueStats, SyncStatus};
use coldsync_core::services::{MediaEnqueue, ScanOutcome, ScanSummary};
use coldsync_core::{ReplicationRecord, Target, TargetSet};
use pretty_assertions::assert_eq;

use crate::cli::{Cli, Commands, QueueArg, SourceArg, TargetArg};
use crate::commands::common::{
    format_bytes, format_record_lines, format_stats_lines, format_timestamp, parse_media_source,
    App,
};
use crate::commands::enqueue::run_enqueue;
use crate::commands::reap::run_reap;
use crate::commands::retry::run_reset;
use crate::commands::scan::format_scan_outcome;
use crate::commands::stats::{format_report_lines, StatsReport};
use crate::error::CliError;

fn config_for(dir: &Path, extra: &[(&str, String)]) -> ColdsyncConfig {
    let mut values: HashMap<String, String> = HashMap::from([
        (
            "COLDSYNC_DB_PATH".to_string(),
            dir.join("coldsync.db").display().to_string(),
        ),
        (
            "COLDSYNC_LOCAL_BASE_DIR".to_string(),
            dir.join("media").display().to_string(),
        ),
    ]);
    for (name, value) in extra {
        values.insert((*name).to_string(), value.clone());
    }
    ColdsyncConfig::from_lookup(|name| values.get(name).cloned()).unwrap()
}

fn sample_request() -> MediaEnqueue {
    MediaEnqueue {
        source: MediaSource::RoomEntry,
        media_id: 7,
        file_path: "T-100/front.jpg".to_string(),
        file_name: "front.jpg".to_string(),
        file_size: 2048,
        thock_number: "T-100".to_string(),
        media_type: "photo".to_string(),
        origin: Target::Local,
    }
}

fn sample_record() -> ReplicationRecord {
    ReplicationRecord {
        id: 12,
        source: "room_entry".to_string(),
        source_key: "7".to_string(),
        local_path: "/data/media/T-100/front.jpg".to_string(),
        target_key: "T-100/photo_front.jpg".to_string(),
        file_size: 2048,
        file_mtime: None,
        required_targets: TargetSet::of(Target::Local).with(Target::Nas),
        synced_targets: TargetSet::of(Target::Local),
        primary_location: Target::Local,
        status: SyncStatus::Failed,
        retry_count: 2,
        max_retries: 5,
        last_error: Some("nas: connection refused".to_string()),
        claimed_by: None,
        created_at: 0,
        started_at: Some(0),
        completed_at: None,
        next_retry_at: Some(60_000),
    }
}

#[test]
fn parses_enqueue_arguments() {
    let cli = Cli::try_parse_from([
        "coldsync",
        "enqueue",
        "--source",
        "gate-pass",
        "--media-id",
        "9",
        "--file-path",
        "T-1/clip.mov",
        "--file-name",
        "clip.mov",
        "--size",
        "4096",
        "--thock",
        "T-1",
        "--media-type",
        "video",
        "--origin",
        "nas",
    ])
    .unwrap();

    match cli.command {
        Commands::Enqueue {
            source,
            media_id,
            media_type,
            origin,
            json,
            ..
        } => {
            assert_eq!(source, SourceArg::GatePass);
            assert_eq!(media_id, 9);
            assert_eq!(media_type, "video");
            assert_eq!(origin, TargetArg::Nas);
            assert!(!json);
        }
        _ => panic!("expected enqueue command"),
    }
}

#[test]
fn enqueue_defaults_to_local_photo() {
    let cli = Cli::try_parse_from([
        "coldsync",
        "enqueue",
        "--source",
        "room-entry",
        "--media-id",
        "1",
        "--file-path",
        "a.jpg",
        "--file-name",
        "a.jpg",
        "--size",
        "1",
        "--thock",
        "T-1",
    ])
    .unwrap();

    match cli.command {
        Commands::Enqueue {
            media_type, origin, ..
        } => {
            assert_eq!(media_type, "photo");
            assert_eq!(Target::from(origin), Target::Local);
        }
        _ => panic!("expected enqueue command"),
    }
}

#[test]
fn failed_defaults_to_media_queue() {
    let cli = Cli::try_parse_from(["coldsync", "failed"]).unwrap();
    match cli.command {
        Commands::Failed {
            queue,
            source,
            limit,
            json,
        } => {
            assert_eq!(queue, QueueArg::Media);
            assert_eq!(source, None);
            assert_eq!(limit, 20);
            assert!(!json);
        }
        _ => panic!("expected failed command"),
    }
}

#[test]
fn db_path_is_accepted_after_the_subcommand() {
    let cli =
        Cli::try_parse_from(["coldsync", "reset", "--queue", "pool", "42", "--db-path", "x.db"])
            .unwrap();
    assert_eq!(cli.db_path.as_deref(), Some(Path::new("x.db")));
    assert!(matches!(
        cli.command,
        Commands::Reset {
            queue: QueueArg::Pool,
            id: 42,
            json: false
        }
    ));
}

#[test]
fn rejects_unknown_queue() {
    assert!(Cli::try_parse_from(["coldsync", "retry", "--queue", "photos"]).is_err());
}

#[test]
fn format_bytes_scales_units() {
    assert_eq!(format_bytes(512), "512 B");
    assert_eq!(format_bytes(1536), "1.5 KB");
    assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
}

#[test]
fn format_timestamp_handles_missing_values() {
    assert_eq!(format_timestamp(None), "-");
    assert_eq!(format_timestamp(Some(0)), "1970-01-01 00:00:00 UTC");
}

#[test]
fn parse_media_source_accepts_queue_tags() {
    assert_eq!(
        parse_media_source(Some("gate_pass")).unwrap(),
        Some(MediaSource::GatePass)
    );
    assert_eq!(parse_media_source(None).unwrap(), None);
    assert!(matches!(
        parse_media_source(Some("lobby")),
        Err(CliError::InvalidArgument(_))
    ));
}

#[test]
fn format_stats_lines_summarizes_queue() {
    let stats = QueueStats {
        total_files: 3,
        pending: 1,
        synced: 2,
        total_bytes: 3072,
        synced_bytes: 2048,
        local_synced: 3,
        nas_synced: 2,
        ..QueueStats::default()
    };

    let lines = format_stats_lines("media", &stats);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "media: 3 files (3.0 KB), 2 synced (2.0 KB)");
    assert!(lines[2].contains("local 3 | nas 2 | r2 0"));
}

#[test]
fn format_record_lines_include_error_and_targets() {
    let lines = format_record_lines(&[sample_record()]);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("#12 room_entry T-100/photo_front.jpg [local]"));
    assert!(lines[0].contains("retries 2/5"));
    assert!(lines[0].ends_with("nas: connection refused"));
}

#[test]
fn format_scan_outcome_reports_skipped_scan() {
    let summary = ScanOutcome::Completed(ScanSummary {
        pool: "bulk".to_string(),
        files_found: 10,
        files_enqueued: 4,
        duration_ms: 35,
    });
    assert_eq!(
        format_scan_outcome("bulk", &summary),
        "bulk: 10 files found, 4 queued in 35 ms"
    );
    assert_eq!(
        format_scan_outcome("bulk", &ScanOutcome::AlreadyScanning),
        "bulk: already being scanned, skipped"
    );
}

#[test]
fn format_report_lines_without_pools() {
    let report = StatsReport {
        media: QueueStats::default(),
        media_by_source: Vec::new(),
        pools: PoolSyncOverview {
            pools: Vec::new(),
            totals: QueueStats::default(),
        },
    };
    let lines = format_report_lines(&report);
    assert_eq!(lines.len(), 6);
    assert!(lines[3].starts_with("pools: 0 files"));
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_without_targets_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::open(config_for(dir.path(), &[])).await.unwrap();

    let result = run_enqueue(&app, &sample_request(), true).await;
    assert!(matches!(result, Err(CliError::NoTargets)));
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_reset_and_reap_against_directory_target() {
    let dir = tempfile::tempdir().unwrap();
    let nas = dir.path().join("nas");
    let app = App::open(config_for(
        dir.path(),
        &[("NAS_DIR", nas.display().to_string())],
    ))
    .await
    .unwrap();

    run_enqueue(&app, &sample_request(), true).await.unwrap();
    let stats = app.media.stats().await.unwrap();
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.pending, 1);

    assert!(app.media.recent_failed(None, 10).await.unwrap().is_empty());

    run_reset(&app, QueueArg::Media, 1, true).await.unwrap();
    let record = app.media.get(1).await.unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Pending);
    assert_eq!(record.required_targets, TargetSet::of(Target::Local).with(Target::Nas));

    run_reap(&app, Some(60), true).await.unwrap();
    assert!(matches!(
        run_reset(&app, QueueArg::Pool, 99, true).await,
        Err(CliError::Core(coldsync_core::Error::NotFound(_)))
    ));
}
