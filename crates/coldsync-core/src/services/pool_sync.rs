//! Storage pool replication to the NAS.
//!
//! A scanner walks each pool root and upserts one record per file; workers
//! copy pending files to the NAS under `{pool}/{relative path}`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use libsql::Connection;
use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

use crate::clock::duration_ms;
use crate::config::PoolConfig;
use crate::db::{
    Database, LibSqlReplicationRepository, LibSqlScanStateRepository, QueueContext,
    ReplicationRepository, ScanStateRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    NewRecord, PoolScanState, PoolStatus, PoolSyncOverview, QueueKind, QueueStats,
    ReplicationRecord, Target, TargetSet,
};
use crate::storage::ObjectStore;

const SKIPPED_DIRS: [&str; 3] = ["thumbs", ".thumbs", "__MACOSX"];
const TEMP_SUFFIXES: [&str; 4] = [".tmp", ".part", "~", ".swp"];

/// Result of one scan request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed(ScanSummary),
    /// Another scan of the same pool holds the scanning flag.
    AlreadyScanning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub pool: String,
    pub files_found: i64,
    pub files_enqueued: i64,
    pub duration_ms: i64,
}

/// A regular file discovered under a pool root.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PoolFile {
    absolute: PathBuf,
    /// Forward-slash path relative to the pool root.
    relative: String,
    size: i64,
    /// Unix seconds.
    mtime: i64,
}

#[derive(Clone)]
pub struct PoolSyncService {
    db: Arc<Database>,
    ctx: QueueContext,
    nas: Option<Arc<dyn ObjectStore>>,
    pools: Arc<[PoolConfig]>,
}

impl PoolSyncService {
    pub fn new(
        db: Arc<Database>,
        ctx: QueueContext,
        nas: Option<Arc<dyn ObjectStore>>,
        pools: Vec<PoolConfig>,
    ) -> Self {
        Self {
            db,
            ctx,
            nas,
            pools: pools.into(),
        }
    }

    pub fn pools(&self) -> &[PoolConfig] {
        &self.pools
    }

    pub fn pool(&self, name: &str) -> Result<&PoolConfig> {
        self.pools
            .iter()
            .find(|pool| pool.name == name)
            .ok_or_else(|| Error::NotFound(format!("pool {name}")))
    }

    fn repo<'a>(&'a self, conn: &'a Connection) -> LibSqlReplicationRepository<'a> {
        LibSqlReplicationRepository::new(conn, QueueKind::Pool, &self.ctx)
    }

    /// Walk one pool and upsert every file into the queue.
    ///
    /// Only one scan per pool runs at a time, across processes sharing the
    /// database. Scan bookkeeping is written even when the walk fails.
    pub async fn scan_pool(&self, name: &str) -> Result<ScanOutcome> {
        let pool = self.pool(name)?.clone();
        let conn = self.db.connect().await?;
        let scans = LibSqlScanStateRepository::new(&conn);
        if !scans
            .try_begin_scan(&pool.name, self.ctx.clock.now_ms())
            .await?
        {
            tracing::info!(pool = %pool.name, "Pool is already being scanned, skipping");
            return Ok(ScanOutcome::AlreadyScanning);
        }

        tracing::info!(pool = %pool.name, root = %pool.root.display(), "Starting pool scan");
        let started = Instant::now();
        let mut files_found = 0_i64;
        let mut files_enqueued = 0_i64;

        let walk = self
            .enqueue_pool_files(&conn, &pool, &mut files_found, &mut files_enqueued)
            .await;
        let elapsed = duration_ms(started.elapsed());
        scans
            .finish_scan(
                &pool.name,
                self.ctx.clock.now_ms(),
                files_found,
                files_enqueued,
                elapsed,
            )
            .await?;

        if let Err(error) = walk {
            tracing::error!(pool = %pool.name, %error, "Pool scan failed");
            return Err(error);
        }
        tracing::info!(
            pool = %pool.name,
            files_found,
            files_enqueued,
            duration_ms = elapsed,
            "Pool scan finished"
        );
        Ok(ScanOutcome::Completed(ScanSummary {
            pool: pool.name,
            files_found,
            files_enqueued,
            duration_ms: elapsed,
        }))
    }

    async fn enqueue_pool_files(
        &self,
        conn: &Connection,
        pool: &PoolConfig,
        files_found: &mut i64,
        files_enqueued: &mut i64,
    ) -> Result<()> {
        let root = pool.root.clone();
        let files = tokio::task::spawn_blocking(move || collect_pool_files(&root))
            .await
            .map_err(|error| Error::Storage(format!("pool walk task failed: {error}")))??;

        let repo = self.repo(conn);
        let required = TargetSet::of(Target::Nas);
        for file in files {
            *files_found += 1;
            let record = NewRecord::new(
                pool.name.as_str(),
                file.relative.as_str(),
                file.absolute.to_string_lossy(),
                format!("{}/{}", pool.name, file.relative),
                file.size,
                required,
            )
            .with_mtime(file.mtime);

            match repo.enqueue(&record).await {
                Ok(outcome) if outcome.queued_work() => *files_enqueued += 1,
                Ok(_) => {}
                Err(error) => tracing::warn!(
                    pool = %pool.name,
                    path = %file.relative,
                    %error,
                    "Failed to enqueue pool file"
                ),
            }
        }
        Ok(())
    }

    /// Scan one pool, or every pool, in the background.
    ///
    /// Returns the pools that were scheduled.
    pub fn trigger_scan(&self, pool: Option<&str>) -> Result<Vec<String>> {
        let names: Vec<String> = match pool {
            Some(name) => vec![self.pool(name)?.name.clone()],
            None => self.pools.iter().map(|pool| pool.name.clone()).collect(),
        };

        let service = self.clone();
        let scheduled = names.clone();
        tokio::spawn(async move {
            for name in names {
                if let Err(error) = service.scan_pool(&name).await {
                    tracing::error!(pool = %name, %error, "Triggered scan failed");
                }
            }
        });
        Ok(scheduled)
    }

    /// Claim and copy one pool file to the NAS.
    ///
    /// `Ok(false)` means the queue had nothing eligible.
    pub async fn process_one(&self, conn: &Connection, worker_id: &str) -> Result<bool> {
        let repo = self.repo(conn);
        let Some(record) = repo.claim_next(worker_id).await? else {
            return Ok(false);
        };

        let Ok(pool) = self.pool(&record.source) else {
            repo.mark_skipped(
                record.id,
                worker_id,
                &format!("unknown pool: {}", record.source),
            )
            .await?;
            return Ok(true);
        };
        let local_path = record
            .source_key
            .split('/')
            .fold(pool.root.clone(), |path, segment| path.join(segment));

        match tokio::fs::metadata(&local_path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => {
                repo.mark_skipped(record.id, worker_id, "not a regular file").await?;
                return Ok(true);
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                repo.mark_skipped(record.id, worker_id, "file not found").await?;
                return Ok(true);
            }
            Err(error) => {
                repo.mark_failed(record.id, worker_id, &format!("stat: {error}"))
                    .await?;
                return Ok(true);
            }
        }

        let Some(nas) = &self.nas else {
            repo.mark_failed(record.id, worker_id, "nas: no store configured")
                .await?;
            return Ok(true);
        };
        if let Err(error) = nas.upload_file(&local_path, &record.target_key).await {
            tracing::warn!(
                worker = worker_id,
                record_id = record.id,
                target_key = %record.target_key,
                %error,
                "Pool upload failed"
            );
            repo.mark_failed(record.id, worker_id, &format!("upload: {error}"))
                .await?;
            return Ok(true);
        }

        repo.mark_nas_synced(record.id, worker_id).await?;
        tracing::info!(
            worker = worker_id,
            record_id = record.id,
            target_key = %record.target_key,
            bytes = record.file_size,
            "Synced pool file"
        );
        Ok(true)
    }

    /// Per-pool stats and scan state plus totals.
    pub async fn overview(&self) -> Result<PoolSyncOverview> {
        let conn = self.db.connect().await?;
        let repo = self.repo(&conn);
        let scans = LibSqlScanStateRepository::new(&conn);
        let by_source = repo.stats_by_source().await?;

        let mut pools = Vec::with_capacity(self.pools.len());
        for pool in &*self.pools {
            let stats = by_source
                .iter()
                .find(|entry| entry.source == pool.name)
                .map(|entry| entry.stats.clone())
                .unwrap_or_default();
            pools.push(PoolStatus {
                pool_name: pool.name.clone(),
                root: pool.root.to_string_lossy().into_owned(),
                stats,
                scan: scans.get(&pool.name).await?,
            });
        }

        Ok(PoolSyncOverview {
            pools,
            totals: repo.stats().await?,
        })
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let conn = self.db.connect().await?;
        self.repo(&conn).stats().await
    }

    pub async fn scan_states(&self) -> Result<Vec<PoolScanState>> {
        let conn = self.db.connect().await?;
        LibSqlScanStateRepository::new(&conn).list().await
    }

    /// Return failed records of one pool (or all) to `pending`.
    pub async fn retry_failed(&self, pool: Option<&str>) -> Result<u64> {
        let conn = self.db.connect().await?;
        let count = self.repo(&conn).reset_all_failed(pool).await?;
        tracing::info!(pool = pool.unwrap_or("*"), count, "Reset failed pool records");
        Ok(count)
    }

    pub async fn recent_failed(
        &self,
        pool: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ReplicationRecord>> {
        let conn = self.db.connect().await?;
        self.repo(&conn).recent_failed(pool, limit).await
    }

    /// Clear scanning flags held longer than `max_age`.
    ///
    /// A flag younger than that belongs to a scan that may still be running,
    /// possibly in another process, and is left alone.
    pub async fn clear_stale_scans(&self, max_age: Duration) -> Result<u64> {
        let conn = self.db.connect().await?;
        let started_before = self.ctx.clock.now_ms() - duration_ms(max_age);
        LibSqlScanStateRepository::new(&conn)
            .clear_stale_scans(started_before)
            .await
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    if entry.file_type().is_dir() {
        return SKIPPED_DIRS.iter().any(|dir| *dir == name);
    }
    TEMP_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Blocking walk of a pool root.
///
/// Unreadable entries are logged and skipped; a missing root is an error.
fn collect_pool_files(root: &Path) -> Result<Vec<PoolFile>> {
    if !root.is_dir() {
        return Err(Error::InvalidInput(format!(
            "pool root {} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(root = %root.display(), %error, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::warn!(path = %entry.path().display(), %error, "Skipping unstatable file");
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.push(PoolFile {
            absolute: entry.path().to_path_buf(),
            relative,
            size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            mtime: metadata.modified().map_or(0, unix_seconds),
        });
    }
    Ok(files)
}

fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |since| i64::try_from(since.as_secs()).unwrap_or(i64::MAX))
}
