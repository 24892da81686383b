//! Media replication: room-entry and gate-pass captures to NAS and R2.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use libsql::Connection;
use serde::{Deserialize, Serialize};

use super::file_exists;
use super::restore::RestoreState;
use crate::db::{
    Database, LibSqlMediaRepository, LibSqlReplicationRepository, MediaRepository, QueueContext,
    ReplicationRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    is_convertible_video, mp4_variant, EnqueueOutcome, MediaSource, NewRecord, QueueKind,
    QueueStats, ReplicationRecord, SourceStats, Target, TargetSet,
};
use crate::storage::Targets;

/// Videos may still be converting; give them this many short retries.
const VIDEO_CONVERSION_RETRIES: i64 = 3;
const VIDEO_CONVERSION_DELAY: Duration = Duration::from_secs(30);
const INITIAL_SYNC_BATCH: usize = 100;

/// Request to replicate one business media row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEnqueue {
    pub source: MediaSource,
    pub media_id: i64,
    /// Path relative to the local media root.
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub thock_number: String,
    /// `photo` or `video`.
    pub media_type: String,
    /// Where the capture was first written.
    #[serde(default = "default_origin")]
    pub origin: Target,
}

const fn default_origin() -> Target {
    Target::Local
}

/// Replicates business media files to the configured durable targets.
#[derive(Clone)]
pub struct MediaSyncService {
    pub(super) db: Arc<Database>,
    pub(super) ctx: QueueContext,
    pub(super) targets: Targets,
    local_base_dir: PathBuf,
    pub(super) restore: Arc<RestoreState>,
}

impl MediaSyncService {
    pub fn new(
        db: Arc<Database>,
        ctx: QueueContext,
        targets: Targets,
        local_base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db,
            ctx,
            targets,
            local_base_dir: local_base_dir.into(),
            restore: Arc::new(RestoreState::default()),
        }
    }

    pub const fn targets(&self) -> &Targets {
        &self.targets
    }

    /// Local copy plus every configured durable target.
    pub fn required_targets(&self) -> TargetSet {
        Target::ALL
            .into_iter()
            .filter(|target| *target == Target::Local || self.targets.get(*target).is_some())
            .collect()
    }

    fn repo<'a>(&'a self, conn: &'a Connection) -> LibSqlReplicationRepository<'a> {
        LibSqlReplicationRepository::new(conn, QueueKind::Media, &self.ctx)
    }

    /// Queue a media row for replication.
    ///
    /// Returns `Ok(None)` when no durable target is configured.
    pub async fn enqueue_media(&self, request: &MediaEnqueue) -> Result<Option<EnqueueOutcome>> {
        if !self.targets.has_durable() {
            tracing::debug!(
                source = %request.source,
                media_id = request.media_id,
                "No durable target configured, not queueing media"
            );
            return Ok(None);
        }
        if request.origin != Target::Local && self.targets.get(request.origin).is_none() {
            return Err(Error::InvalidInput(format!(
                "origin {} is not a configured target",
                request.origin
            )));
        }

        let local_path = self.local_base_dir.join(&request.file_path);
        let target_key = format!(
            "{}/{}_{}",
            request.thock_number, request.media_type, request.file_name
        );
        let record = NewRecord::new(
            request.source.as_str(),
            request.media_id.to_string(),
            local_path.to_string_lossy(),
            target_key,
            request.file_size,
            self.required_targets(),
        )
        .with_primary(request.origin);

        let conn = self.db.connect().await?;
        let outcome = self.repo(&conn).enqueue(&record).await?;
        Ok(Some(outcome))
    }

    /// Claim and process one media record.
    ///
    /// Transfer problems become queue transitions; only store errors are
    /// returned. `Ok(false)` means the queue had nothing eligible.
    pub async fn process_one(&self, conn: &Connection, worker_id: &str) -> Result<bool> {
        let repo = self.repo(conn);
        let Some(mut record) = repo.claim_next(worker_id).await? else {
            return Ok(false);
        };

        tracing::info!(
            worker = worker_id,
            record_id = record.id,
            source = %record.source,
            target_key = %record.target_key,
            "Processing media record"
        );

        if record.required_targets.contains(Target::Local) && !record.local_synced() {
            match self.pull_primary(&record).await {
                Ok(bytes) => {
                    tracing::info!(
                        worker = worker_id,
                        record_id = record.id,
                        bytes,
                        from = %record.primary_location,
                        "Pulled primary copy to local disk"
                    );
                    record = repo.mark_local_synced(record.id, worker_id).await?;
                }
                Err(error) => {
                    repo.mark_failed(record.id, worker_id, &format!("local: {error}"))
                        .await?;
                    return Ok(true);
                }
            }
        }

        let Some(local_path) = self
            .resolve_local_file(&repo, &mut record, worker_id)
            .await?
        else {
            self.handle_missing_file(&repo, &record, worker_id).await?;
            return Ok(true);
        };

        let mut errors = Vec::new();
        for target in Target::DURABLE {
            if !record.missing_targets().contains(target) {
                continue;
            }
            let Some(store) = self.targets.get(target) else {
                errors.push(format!("{target}: no store configured"));
                continue;
            };

            match store.upload_file(&local_path, &record.target_key).await {
                Ok(()) => {
                    record = repo.mark_target_synced(record.id, worker_id, target).await?;
                    if target == Target::R2 {
                        self.flag_cloud_synced(conn, &record).await;
                    }
                    tracing::info!(
                        worker = worker_id,
                        record_id = record.id,
                        %target,
                        target_key = %record.target_key,
                        "Uploaded media"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        worker = worker_id,
                        record_id = record.id,
                        %target,
                        %error,
                        "Media upload failed"
                    );
                    errors.push(format!("{target}: {error}"));
                }
            }
        }

        if !errors.is_empty() {
            repo.mark_failed(record.id, worker_id, &errors.join("; "))
                .await?;
        }
        Ok(true)
    }

    async fn pull_primary(&self, record: &ReplicationRecord) -> Result<u64> {
        let store = self.targets.get(record.primary_location).ok_or_else(|| {
            Error::Storage(format!(
                "primary location {} has no configured store",
                record.primary_location
            ))
        })?;
        store
            .download_file(&record.target_key, Path::new(&record.local_path))
            .await
    }

    /// Find the file on disk, following a video conversion to `.mp4`.
    async fn resolve_local_file(
        &self,
        repo: &LibSqlReplicationRepository<'_>,
        record: &mut ReplicationRecord,
        worker_id: &str,
    ) -> Result<Option<PathBuf>> {
        let local_path = PathBuf::from(&record.local_path);
        if file_exists(&local_path).await? {
            return Ok(Some(local_path));
        }

        let Some(converted) = mp4_variant(&record.local_path) else {
            return Ok(None);
        };
        if converted == record.local_path || !file_exists(Path::new(&converted)).await? {
            return Ok(None);
        }

        let target_key =
            mp4_variant(&record.target_key).unwrap_or_else(|| record.target_key.clone());
        repo.update_location(record.id, worker_id, &converted, &target_key)
            .await?;
        tracing::info!(
            record_id = record.id,
            from = %record.local_path,
            to = %converted,
            "Following converted video"
        );
        record.local_path.clone_from(&converted);
        record.target_key = target_key;
        Ok(Some(PathBuf::from(converted)))
    }

    async fn handle_missing_file(
        &self,
        repo: &LibSqlReplicationRepository<'_>,
        record: &ReplicationRecord,
        worker_id: &str,
    ) -> Result<()> {
        if is_convertible_video(&record.local_path) && record.retry_count < VIDEO_CONVERSION_RETRIES
        {
            tracing::info!(
                worker = worker_id,
                record_id = record.id,
                local_path = %record.local_path,
                "File not found, video may still be converting"
            );
            repo.mark_retry(
                record.id,
                worker_id,
                "file not found (video converting?)",
                VIDEO_CONVERSION_DELAY,
            )
            .await?;
        } else {
            tracing::warn!(
                worker = worker_id,
                record_id = record.id,
                local_path = %record.local_path,
                "File not found, skipping"
            );
            repo.mark_skipped(
                record.id,
                worker_id,
                &format!("file not found: {}", record.local_path),
            )
            .await?;
        }
        Ok(())
    }

    /// Flag the business row; a missing row does not undo the upload.
    async fn flag_cloud_synced(&self, conn: &Connection, record: &ReplicationRecord) {
        let Ok(source) = record.source.parse::<MediaSource>() else {
            return;
        };
        let Ok(media_id) = record.source_key.parse::<i64>() else {
            return;
        };
        if let Err(error) = LibSqlMediaRepository::new(conn)
            .mark_cloud_synced(source, media_id, &record.target_key)
            .await
        {
            tracing::warn!(
                record_id = record.id,
                %source,
                media_id,
                %error,
                "Could not flag media row as cloud synced"
            );
        }
    }

    /// Queue every business media row that has no replication record yet.
    pub async fn run_initial_sync(&self) -> Result<u64> {
        if !self.targets.has_durable() {
            return Err(Error::InvalidState(
                "no durable target configured".to_string(),
            ));
        }

        let conn = self.db.connect().await?;
        let media = LibSqlMediaRepository::new(&conn);
        let repo = self.repo(&conn);
        let required = self.required_targets();
        let mut enqueued = 0_u64;

        for source in MediaSource::ALL {
            loop {
                let batch = media.find_unqueued(source, INITIAL_SYNC_BATCH).await?;
                if batch.is_empty() {
                    break;
                }

                let mut progressed = false;
                for item in batch {
                    let record = NewRecord::new(
                        source.as_str(),
                        item.id.to_string(),
                        self.local_base_dir.join(&item.file_path).to_string_lossy(),
                        format!(
                            "{}/{}/{}/{}",
                            source.key_prefix(),
                            item.thock_number,
                            item.media_type,
                            item.file_name
                        ),
                        item.file_size,
                        required,
                    );
                    match repo.enqueue(&record).await {
                        Ok(_) => {
                            enqueued += 1;
                            progressed = true;
                        }
                        Err(error) => tracing::warn!(
                            %source,
                            media_id = item.id,
                            %error,
                            "Failed to enqueue media during initial sync"
                        ),
                    }
                }

                // Rows that keep failing would otherwise be returned forever.
                if !progressed {
                    break;
                }
            }
        }

        tracing::info!(enqueued, "Initial media sync queued files");
        Ok(enqueued)
    }

    pub async fn get(&self, id: i64) -> Result<Option<ReplicationRecord>> {
        let conn = self.db.connect().await?;
        self.repo(&conn).get(id).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let conn = self.db.connect().await?;
        self.repo(&conn).stats().await
    }

    pub async fn stats_by_source(&self) -> Result<Vec<SourceStats>> {
        let conn = self.db.connect().await?;
        self.repo(&conn).stats_by_source().await
    }

    /// Return failed records to `pending`.
    pub async fn retry_all_failed(&self, source: Option<MediaSource>) -> Result<u64> {
        let conn = self.db.connect().await?;
        let count = self
            .repo(&conn)
            .reset_all_failed(source.map(MediaSource::as_str))
            .await?;
        tracing::info!(count, "Reset failed media records");
        Ok(count)
    }

    pub async fn recent_failed(
        &self,
        source: Option<MediaSource>,
        limit: usize,
    ) -> Result<Vec<ReplicationRecord>> {
        let conn = self.db.connect().await?;
        self.repo(&conn)
            .recent_failed(source.map(MediaSource::as_str), limit)
            .await
    }

    /// Reset one record to `pending`.
    pub async fn reset(&self, id: i64) -> Result<ReplicationRecord> {
        let conn = self.db.connect().await?;
        self.repo(&conn).reset_pending(id).await
    }
}
