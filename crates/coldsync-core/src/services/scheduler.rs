//! Background worker lifecycle.
//!
//! The scheduler owns every spawned loop: queue workers per [`SyncJob`], one
//! scan loop per pool, and a reaper that releases abandoned claims and scan
//! flags. Starting never touches state another process may hold. Shutdown
//! is broadcast on a `watch` channel and [`SyncScheduler::stop`] waits for
//! every loop to exit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libsql::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::media_sync::MediaSyncService;
use super::pool_sync::PoolSyncService;
use crate::config::{ColdsyncConfig, PoolConfig, WorkerSettings};
use crate::db::{Database, LibSqlReplicationRepository, QueueContext, ReplicationRepository};
use crate::error::{Error, Result};
use crate::models::QueueKind;

/// A queue that workers drain one record at a time.
#[async_trait]
pub trait SyncJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Claim and process one record. `Ok(false)` means the queue is idle.
    async fn tick(&self, conn: &Connection, worker_id: &str) -> Result<bool>;
}

#[async_trait]
impl SyncJob for MediaSyncService {
    fn name(&self) -> &'static str {
        "media"
    }

    async fn tick(&self, conn: &Connection, worker_id: &str) -> Result<bool> {
        self.process_one(conn, worker_id).await
    }
}

#[async_trait]
impl SyncJob for PoolSyncService {
    fn name(&self) -> &'static str {
        "pool"
    }

    async fn tick(&self, conn: &Connection, worker_id: &str) -> Result<bool> {
        self.process_one(conn, worker_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub media: WorkerSettings,
    pub pool: WorkerSettings,
    pub pool_scan_initial_delay: Duration,
    pub pool_scan_stale_after: Duration,
    pub claim_lease: Duration,
    pub reaper_interval: Duration,
}

impl SchedulerSettings {
    pub const fn from_config(config: &ColdsyncConfig) -> Self {
        Self {
            media: config.media,
            pool: config.pool,
            pool_scan_initial_delay: config.pool_scan_initial_delay,
            pool_scan_stale_after: config.pool_scan_stale_after,
            claim_lease: config.claim_lease,
            reaper_interval: config.reaper_interval,
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SyncScheduler {
    db: Arc<Database>,
    ctx: QueueContext,
    settings: SchedulerSettings,
    media: Option<MediaSyncService>,
    pools: Option<PoolSyncService>,
    running: Option<Running>,
}

impl SyncScheduler {
    pub const fn new(db: Arc<Database>, ctx: QueueContext, settings: SchedulerSettings) -> Self {
        Self {
            db,
            ctx,
            settings,
            media: None,
            pools: None,
            running: None,
        }
    }

    #[must_use]
    pub fn with_media(mut self, service: MediaSyncService) -> Self {
        self.media = Some(service);
        self
    }

    #[must_use]
    pub fn with_pools(mut self, service: PoolSyncService) -> Self {
        self.pools = Some(service);
        self
    }

    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn every loop. Fails if the scheduler is already running.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::InvalidState(
                "scheduler is already running".to_string(),
            ));
        }

        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::new();

        if let Some(media) = &self.media {
            if media.targets().has_durable() {
                let job: Arc<dyn SyncJob> = Arc::new(media.clone());
                self.spawn_workers(&mut tasks, &shutdown, &job, self.settings.media);
            } else {
                tracing::info!("No durable target configured, media workers not started");
            }
        }

        if let Some(pools) = &self.pools {
            let job: Arc<dyn SyncJob> = Arc::new(pools.clone());
            self.spawn_workers(&mut tasks, &shutdown, &job, self.settings.pool);

            for pool in pools.pools() {
                tasks.push(tokio::spawn(run_scan_loop(
                    pools.clone(),
                    pool.clone(),
                    self.settings.pool_scan_initial_delay,
                    shutdown.subscribe(),
                )));
            }
        }

        tasks.push(tokio::spawn(run_reaper(
            Arc::clone(&self.db),
            self.ctx.clone(),
            self.pools.clone(),
            self.settings,
            shutdown.subscribe(),
        )));

        tracing::info!(tasks = tasks.len(), "Sync scheduler started");
        self.running = Some(Running { shutdown, tasks });
        Ok(())
    }

    fn spawn_workers(
        &self,
        tasks: &mut Vec<JoinHandle<()>>,
        shutdown: &watch::Sender<bool>,
        job: &Arc<dyn SyncJob>,
        settings: WorkerSettings,
    ) {
        for index in 0..settings.workers {
            let worker_id = format!("{}-{index}-{}", job.name(), Uuid::now_v7());
            tasks.push(tokio::spawn(run_worker(
                Arc::clone(&self.db),
                Arc::clone(job),
                worker_id,
                settings.poll_interval,
                shutdown.subscribe(),
            )));
        }
        tracing::info!(job = job.name(), workers = settings.workers, "Started workers");
    }

    /// Signal shutdown and wait for every loop to exit.
    ///
    /// In-flight transfers finish first; nothing is cancelled mid-record.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.shutdown.send_replace(true);
        for task in running.tasks {
            if let Err(error) = task.await {
                tracing::error!(%error, "Scheduler task panicked");
            }
        }
        tracing::info!("Sync scheduler stopped");
    }
}

/// Sleep for `duration` unless shutdown arrives first. Returns `true` on shutdown.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn run_worker(
    db: Arc<Database>,
    job: Arc<dyn SyncJob>,
    worker_id: String,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let conn = match db.connect().await {
        Ok(conn) => conn,
        Err(error) => {
            tracing::error!(worker = %worker_id, %error, "Worker could not open a connection");
            return;
        }
    };
    tracing::debug!(worker = %worker_id, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        let busy = match job.tick(&conn, &worker_id).await {
            Ok(processed) => processed,
            Err(error) => {
                // Store faults are retried on the next poll. A lost claim
                // leaves the record to whoever holds it now.
                tracing::warn!(worker = %worker_id, %error, "Worker tick failed");
                false
            }
        };
        if !busy && sleep_or_shutdown(poll_interval, &mut shutdown).await {
            break;
        }
    }
    tracing::debug!(worker = %worker_id, "Worker stopped");
}

async fn run_reaper(
    db: Arc<Database>,
    ctx: QueueContext,
    pools: Option<PoolSyncService>,
    settings: SchedulerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let conn = match db.connect().await {
        Ok(conn) => conn,
        Err(error) => {
            tracing::error!(%error, "Reaper could not open a connection");
            return;
        }
    };

    loop {
        for kind in QueueKind::ALL {
            match LibSqlReplicationRepository::new(&conn, kind, &ctx)
                .requeue_stale(settings.claim_lease)
                .await
            {
                Ok(result) if result.total() > 0 => tracing::warn!(
                    queue = %kind,
                    requeued = result.requeued,
                    dead_lettered = result.dead_lettered,
                    "Released abandoned claims"
                ),
                Ok(_) => {}
                Err(error) => tracing::warn!(queue = %kind, %error, "Reaper sweep failed"),
            }
        }
        if let Some(pools) = &pools {
            // Logged by the repository when anything is cleared.
            if let Err(error) = pools.clear_stale_scans(settings.pool_scan_stale_after).await {
                tracing::warn!(%error, "Scan flag sweep failed");
            }
        }
        if sleep_or_shutdown(settings.reaper_interval, &mut shutdown).await {
            break;
        }
    }
}

async fn run_scan_loop(
    service: PoolSyncService,
    pool: PoolConfig,
    initial_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if sleep_or_shutdown(initial_delay, &mut shutdown).await {
        return;
    }
    loop {
        if let Err(error) = service.scan_pool(&pool.name).await {
            tracing::error!(pool = %pool.name, %error, "Scheduled scan failed");
        }
        if sleep_or_shutdown(pool.scan_interval, &mut shutdown).await {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::db::{LibSqlScanStateRepository, ScanStateRepository, LEASE_EXPIRED_ERROR};
    use crate::models::{NewRecord, SyncStatus, Target, TargetSet};
    use crate::services::ScanOutcome;
    use crate::services::test_support::{manual_context, open_db, write_file};
    use crate::storage::{DirectoryStore, ObjectStore};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn settings() -> SchedulerSettings {
        let fast = WorkerSettings {
            workers: 2,
            poll_interval: Duration::from_millis(20),
        };
        SchedulerSettings {
            media: fast,
            pool: fast,
            pool_scan_initial_delay: Duration::from_secs(3_600),
            pool_scan_stale_after: Duration::from_secs(6 * 3_600),
            claim_lease: Duration::from_secs(1_800),
            reaper_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_workers_drain_pool_queue_until_stopped() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path()).await;
        let (ctx, _clock) = manual_context();
        let root = dir.path().join("pools/bulk");
        for index in 0..5 {
            write_file(&root.join(format!("{index}.bin")), b"data").await;
        }
        let nas: Arc<dyn ObjectStore> = Arc::new(DirectoryStore::new(dir.path().join("nas")));
        let pools = PoolSyncService::new(
            db.clone(),
            ctx.clone(),
            Some(nas),
            vec![PoolConfig {
                name: "bulk".to_string(),
                root,
                scan_interval: Duration::from_secs(900),
            }],
        );
        pools.scan_pool("bulk").await.unwrap();

        let mut scheduler =
            SyncScheduler::new(db.clone(), ctx, settings()).with_pools(pools.clone());
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start().await,
            Err(Error::InvalidState(_))
        ));

        tokio::time::timeout(Duration::from_secs(10), async {
            while pools.stats().await.unwrap().synced < 5 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        for index in 0..5 {
            assert!(dir.path().join(format!("nas/bulk/{index}.bin")).exists());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reaper_releases_abandoned_claim() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path()).await;
        let (ctx, clock) = manual_context();

        let conn = db.connect().await.unwrap();
        let repo = LibSqlReplicationRepository::new(&conn, QueueKind::Media, &ctx);
        let id = repo
            .enqueue(&NewRecord::new(
                "room_entry",
                "1",
                "/data/a.jpg",
                "T-1/photo_a.jpg",
                1,
                TargetSet::of(Target::Local).with(Target::Nas),
            ))
            .await
            .unwrap()
            .id();
        repo.claim_next("crashed-worker").await.unwrap().unwrap();
        clock.advance(Duration::from_secs(3_600));

        let mut scheduler = SyncScheduler::new(db.clone(), ctx.clone(), settings());
        scheduler.start().await.unwrap();
        let record = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let record = repo.get(id).await.unwrap().unwrap();
                if record.status != SyncStatus::Uploading {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        scheduler.stop().await;

        assert_eq!(record.status, SyncStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.last_error.as_deref(), Some(LEASE_EXPIRED_ERROR));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_leaves_running_scan_alone() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path()).await;
        let (ctx, clock) = manual_context();
        let root = dir.path().join("pools/bulk");
        tokio::fs::create_dir_all(&root).await.unwrap();
        let pools = PoolSyncService::new(
            db.clone(),
            ctx.clone(),
            None,
            vec![PoolConfig {
                name: "bulk".to_string(),
                root,
                scan_interval: Duration::from_secs(900),
            }],
        );

        // Another process is mid-scan.
        let conn = db.connect().await.unwrap();
        let scans = LibSqlScanStateRepository::new(&conn);
        assert!(scans.try_begin_scan("bulk", clock.now_ms()).await.unwrap());

        let mut scheduler =
            SyncScheduler::new(db.clone(), ctx, settings()).with_pools(pools.clone());
        scheduler.start().await.unwrap();
        // Let the reaper sweep a few times.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!scans.try_begin_scan("bulk", clock.now_ms()).await.unwrap());
        assert_eq!(
            pools.scan_pool("bulk").await.unwrap(),
            ScanOutcome::AlreadyScanning
        );

        // Once the flag outlives the staleness bound the reaper releases it.
        clock.advance(settings().pool_scan_stale_after);
        tokio::time::timeout(Duration::from_secs(10), async {
            while scans.get("bulk").await.unwrap().unwrap().is_scanning {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        scheduler.stop().await;
        assert!(scans.try_begin_scan("bulk", clock.now_ms()).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_without_start_is_noop() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path()).await;
        let mut scheduler = SyncScheduler::new(db, QueueContext::default(), settings());
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sleep_or_shutdown_wakes_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let sleeper = tokio::spawn(async move {
            sleep_or_shutdown(Duration::from_secs(3_600), &mut rx).await
        });
        tx.send_replace(true);
        let stopped = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert!(stopped);
    }
}
