//! Bulk restore of media files from durable targets back to local disk.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use super::file_exists;
use super::media_sync::MediaSyncService;
use crate::db::{LibSqlReplicationRepository, ReplicationRepository};
use crate::error::{Error, Result};
use crate::models::{QueueKind, ReplicationRecord, RestoreProgress, Target};

/// Shared restore bookkeeping; at most one restore runs per service.
#[derive(Debug)]
pub(crate) struct RestoreState {
    running: AtomicBool,
    progress: watch::Sender<RestoreProgress>,
}

impl Default for RestoreState {
    fn default() -> Self {
        let (progress, _) = watch::channel(RestoreProgress::default());
        Self {
            running: AtomicBool::new(false),
            progress,
        }
    }
}

/// Releases the running flag when the restore ends, however it ends.
struct RestoreGuard(Arc<RestoreState>);

impl RestoreGuard {
    fn acquire(state: &Arc<RestoreState>) -> Result<Self> {
        state
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy("a bulk restore is already running".to_string()))?;
        Ok(Self(Arc::clone(state)))
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        self.0.progress.send_modify(|progress| progress.running = false);
        self.0.running.store(false, Ordering::Release);
    }
}

impl MediaSyncService {
    /// Download every replicated media file missing on local disk.
    ///
    /// Tries NAS first, then R2. Files already present count as restored.
    /// Sync flags are left untouched.
    pub async fn bulk_restore(&self) -> Result<RestoreProgress> {
        let guard = RestoreGuard::acquire(&self.restore)?;
        self.run_restore(guard).await
    }

    /// Start a bulk restore in the background and return immediately.
    pub fn start_restore(&self) -> Result<()> {
        let guard = RestoreGuard::acquire(&self.restore)?;
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(error) = service.run_restore(guard).await {
                tracing::error!(%error, "Bulk restore aborted");
            }
        });
        Ok(())
    }

    /// Latest restore progress.
    pub fn restore_progress(&self) -> RestoreProgress {
        self.restore.progress.borrow().clone()
    }

    /// Watch restore progress as it is published.
    pub fn subscribe_restore(&self) -> watch::Receiver<RestoreProgress> {
        self.restore.progress.subscribe()
    }

    async fn run_restore(&self, guard: RestoreGuard) -> Result<RestoreProgress> {
        let progress = &guard.0.progress;
        if !self.targets.has_durable() {
            return Err(Error::InvalidState(
                "no durable target configured".to_string(),
            ));
        }

        let conn = self.db.connect().await?;
        let records = LibSqlReplicationRepository::new(&conn, QueueKind::Media, &self.ctx)
            .restorable()
            .await?;

        progress.send_replace(RestoreProgress {
            running: true,
            total_files: records.len() as i64,
            bytes_total: records.iter().map(|record| record.file_size).sum(),
            started_at: Some(self.ctx.clock.now_ms()),
            ..RestoreProgress::default()
        });
        tracing::info!(total = records.len(), "Starting bulk restore");

        for record in &records {
            let local_path = Path::new(&record.local_path);
            if file_exists(local_path).await? {
                progress.send_modify(|progress| {
                    progress.restored_files += 1;
                    progress.bytes_restored += record.file_size;
                });
                continue;
            }

            progress.send_modify(|progress| {
                progress.current_file = Some(record.target_key.clone());
            });

            match self.download_record(record, local_path).await {
                Ok(bytes) => {
                    tracing::info!(
                        record_id = record.id,
                        target_key = %record.target_key,
                        bytes,
                        "Restored file"
                    );
                    progress.send_modify(|progress| {
                        progress.restored_files += 1;
                        progress.bytes_restored += bytes as i64;
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        record_id = record.id,
                        target_key = %record.target_key,
                        %error,
                        "Restore failed"
                    );
                    progress.send_modify(|progress| {
                        progress.record_error(format!("{}: {error}", record.target_key));
                    });
                }
            }
        }

        progress.send_modify(|progress| {
            progress.running = false;
            progress.current_file = None;
            progress.finished_at = Some(self.ctx.clock.now_ms());
        });
        let summary = progress.borrow().clone();
        tracing::info!(
            restored = summary.restored_files,
            failed = summary.failed_files,
            total = summary.total_files,
            "Bulk restore finished"
        );
        drop(guard);
        Ok(summary)
    }

    /// NAS first, then R2, only from targets the record reached.
    async fn download_record(&self, record: &ReplicationRecord, local_path: &Path) -> Result<u64> {
        let mut last_error = None;
        for target in Target::DURABLE {
            if !record.synced_targets.contains(target) {
                continue;
            }
            let Some(store) = self.targets.get(target) else {
                continue;
            };
            match store.download_file(&record.target_key, local_path).await {
                Ok(bytes) => return Ok(bytes),
                Err(error) => {
                    tracing::debug!(
                        record_id = record.id,
                        %target,
                        %error,
                        "Download attempt failed"
                    );
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            Error::Storage("no configured target holds this file".to_string())
        }))
    }
}
