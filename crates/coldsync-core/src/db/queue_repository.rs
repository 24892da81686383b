//! Replication queue repository
//!
//! Every transition is one SQL statement (enqueue is one IMMEDIATE
//! transaction), so concurrent workers never interleave a read-modify-write.

use std::sync::Arc;
use std::time::Duration;

use libsql::{params, Connection, Row, TransactionBehavior};

use crate::clock::{duration_ms, Clock, SystemClock};
use crate::error::{Error, Result};
use crate::models::{
    BackoffSchedule, EnqueueOutcome, NewRecord, QueueKind, QueueStats, ReplicationRecord,
    SourceStats, StaleRequeue, SyncStatus, Target, TargetSet, DEFAULT_MAX_RETRIES,
};

const RECORD_COLUMNS: &str = "id, source, source_key, local_path, target_key, file_size, \
    file_mtime, required_targets, synced_targets, primary_location, status, retry_count, \
    max_retries, last_error, claimed_by, created_at, started_at, completed_at, next_retry_at";

const STATS_COLUMNS: &str = "COUNT(*),
    COALESCE(SUM(status = 'pending'), 0),
    COALESCE(SUM(status = 'uploading'), 0),
    COALESCE(SUM(status = 'synced'), 0),
    COALESCE(SUM(status = 'failed'), 0),
    COALESCE(SUM(status = 'skipped'), 0),
    COALESCE(SUM(status = 'failed' AND retry_count >= max_retries), 0),
    COALESCE(SUM(file_size), 0),
    COALESCE(SUM(CASE WHEN status = 'synced' THEN file_size ELSE 0 END), 0),
    COALESCE(SUM((synced_targets & 1) <> 0), 0),
    COALESCE(SUM((synced_targets & 2) <> 0), 0),
    COALESCE(SUM((synced_targets & 4) <> 0), 0)";

/// Guard for worker transitions: `?2` must still own the claim.
const CLAIM_HELD: &str = "status = 'uploading' AND claimed_by = ?2";

/// Lease-expiry message recorded on reaped claims.
pub const LEASE_EXPIRED_ERROR: &str = "claim lease expired";

/// Clock and retry policy shared by every queue connection.
#[derive(Clone)]
pub struct QueueContext {
    pub clock: Arc<dyn Clock>,
    pub backoff: BackoffSchedule,
    /// Retry budget for records enqueued without an explicit one.
    pub max_retries: i64,
}

impl QueueContext {
    pub fn new(clock: Arc<dyn Clock>, backoff: BackoffSchedule, max_retries: i64) -> Self {
        Self {
            clock,
            backoff,
            max_retries,
        }
    }
}

impl Default for QueueContext {
    fn default() -> Self {
        Self::new(
            Arc::new(SystemClock),
            BackoffSchedule::default(),
            DEFAULT_MAX_RETRIES,
        )
    }
}

impl std::fmt::Debug for QueueContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueContext")
            .field("backoff", &self.backoff)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Trait for replication queue operations (async)
#[allow(async_fn_in_trait)]
pub trait ReplicationRepository {
    /// Insert a pending record, or re-arm it if the file changed on disk
    async fn enqueue(&self, record: &NewRecord) -> Result<EnqueueOutcome>;

    /// Atomically claim the oldest eligible record for `worker_id`
    ///
    /// Returns `Ok(None)` when nothing is eligible.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<ReplicationRecord>>;

    /// Get a record by id
    async fn get(&self, id: i64) -> Result<Option<ReplicationRecord>>;

    /// Record one target as synced, flipping the record to `synced` once all
    /// required targets are covered
    ///
    /// This and the other worker transitions below only apply while
    /// `worker_id` still holds the claim; otherwise they fail with
    /// `InvalidState` and leave the record untouched.
    async fn mark_target_synced(
        &self,
        id: i64,
        worker_id: &str,
        target: Target,
    ) -> Result<ReplicationRecord>;

    /// Mark every required target synced in one step
    ///
    /// Administrative; not fenced by a claim, but never revives a skipped record.
    async fn mark_all_synced(&self, id: i64) -> Result<ReplicationRecord>;

    /// Record a failed attempt and schedule the next one from the backoff schedule
    async fn mark_failed(&self, id: i64, worker_id: &str, error: &str)
        -> Result<ReplicationRecord>;

    /// Record a failed attempt with an explicit retry delay
    async fn mark_retry(
        &self,
        id: i64,
        worker_id: &str,
        error: &str,
        delay: Duration,
    ) -> Result<ReplicationRecord>;

    /// Terminal non-retryable outcome
    async fn mark_skipped(&self, id: i64, worker_id: &str, reason: &str)
        -> Result<ReplicationRecord>;

    /// Point a claimed record at a different local file and target key
    async fn update_location(
        &self,
        id: i64,
        worker_id: &str,
        local_path: &str,
        target_key: &str,
    ) -> Result<()>;

    /// Return one record to `pending` with retry bookkeeping cleared
    async fn reset_pending(&self, id: i64) -> Result<ReplicationRecord>;

    /// Return every failed record (optionally of one source) to `pending`
    async fn reset_all_failed(&self, source: Option<&str>) -> Result<u64>;

    /// Release claims older than `lease`, counting each as an attempt
    async fn requeue_stale(&self, lease: Duration) -> Result<StaleRequeue>;

    /// Aggregate counts for the whole queue
    async fn stats(&self) -> Result<QueueStats>;

    /// Aggregate counts grouped by source
    async fn stats_by_source(&self) -> Result<Vec<SourceStats>>;

    /// Failed records ordered by most recent attempt
    async fn recent_failed(&self, source: Option<&str>, limit: usize)
        -> Result<Vec<ReplicationRecord>>;

    /// Records with at least one durable copy
    async fn restorable(&self) -> Result<Vec<ReplicationRecord>>;

    async fn mark_local_synced(&self, id: i64, worker_id: &str) -> Result<ReplicationRecord> {
        self.mark_target_synced(id, worker_id, Target::Local).await
    }

    async fn mark_nas_synced(&self, id: i64, worker_id: &str) -> Result<ReplicationRecord> {
        self.mark_target_synced(id, worker_id, Target::Nas).await
    }

    async fn mark_r2_synced(&self, id: i64, worker_id: &str) -> Result<ReplicationRecord> {
        self.mark_target_synced(id, worker_id, Target::R2).await
    }
}

/// libSQL implementation of `ReplicationRepository`
pub struct LibSqlReplicationRepository<'a> {
    conn: &'a Connection,
    kind: QueueKind,
    ctx: &'a QueueContext,
}

impl<'a> LibSqlReplicationRepository<'a> {
    /// Create a new repository for one queue family
    pub const fn new(conn: &'a Connection, kind: QueueKind, ctx: &'a QueueContext) -> Self {
        Self { conn, kind, ctx }
    }

    pub const fn kind(&self) -> QueueKind {
        self.kind
    }

    const fn table(&self) -> &'static str {
        self.kind.table()
    }

    fn now(&self) -> i64 {
        self.ctx.clock.now_ms()
    }

    fn record_from_row(row: &Row) -> Result<ReplicationRecord> {
        let primary: String = row.get(9)?;
        let status: String = row.get(10)?;
        Ok(ReplicationRecord {
            id: row.get(0)?,
            source: row.get(1)?,
            source_key: row.get(2)?,
            local_path: row.get(3)?,
            target_key: row.get(4)?,
            file_size: row.get(5)?,
            file_mtime: row.get(6)?,
            required_targets: TargetSet::from_bits(row.get(7)?),
            synced_targets: TargetSet::from_bits(row.get(8)?),
            primary_location: primary
                .parse()
                .map_err(|_| Error::Database(format!("Unknown primary location: {primary}")))?,
            status: status.parse::<SyncStatus>()?,
            retry_count: row.get(11)?,
            max_retries: row.get(12)?,
            last_error: row.get(13)?,
            claimed_by: row.get(14)?,
            created_at: row.get(15)?,
            started_at: row.get(16)?,
            completed_at: row.get(17)?,
            next_retry_at: row.get(18)?,
        })
    }

    fn stats_from_row(row: &Row, offset: i32) -> Result<QueueStats> {
        Ok(QueueStats {
            total_files: row.get(offset)?,
            pending: row.get(offset + 1)?,
            uploading: row.get(offset + 2)?,
            synced: row.get(offset + 3)?,
            failed: row.get(offset + 4)?,
            skipped: row.get(offset + 5)?,
            dead_lettered: row.get(offset + 6)?,
            total_bytes: row.get(offset + 7)?,
            synced_bytes: row.get(offset + 8)?,
            local_synced: row.get(offset + 9)?,
            nas_synced: row.get(offset + 10)?,
            r2_synced: row.get(offset + 11)?,
        })
    }

    async fn query_records(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ReplicationRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::record_from_row(&row)?);
        }
        Ok(records)
    }

    /// Run an `UPDATE ... RETURNING` that targets one id, explaining a miss.
    async fn update_one(
        &self,
        id: i64,
        sql: &str,
        params: impl libsql::params::IntoParams,
        refused: &str,
    ) -> Result<ReplicationRecord> {
        let mut rows = self.conn.query(sql, params).await?;
        if let Some(row) = rows.next().await? {
            return Self::record_from_row(&row);
        }

        match self.get(id).await? {
            Some(record) => Err(Error::InvalidState(format!(
                "{} record {id} is {}: {refused}",
                self.kind, record.status
            ))),
            None => Err(Error::NotFound(format!("{} record {id}", self.kind))),
        }
    }

    /// Run a worker transition whose SQL is fenced by [`CLAIM_HELD`].
    ///
    /// A miss means the reaper released the claim or another worker owns
    /// the record now.
    async fn update_claimed(
        &self,
        id: i64,
        worker_id: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<ReplicationRecord> {
        let mut rows = self.conn.query(sql, params).await?;
        if let Some(row) = rows.next().await? {
            return Self::record_from_row(&row);
        }

        let Some(record) = self.get(id).await? else {
            return Err(Error::NotFound(format!("{} record {id}", self.kind)));
        };
        let owner = record.claimed_by.as_deref().unwrap_or("nobody");
        tracing::warn!(
            queue = %self.kind,
            record_id = id,
            worker = worker_id,
            status = %record.status,
            owner,
            "Claim lost, transition refused"
        );
        Err(Error::InvalidState(format!(
            "{} record {id} claim lost by {worker_id}: record is {} and held by {owner}",
            self.kind, record.status
        )))
    }

    /// Shared failure transition. `delay` overrides the backoff schedule.
    async fn record_failure(
        &self,
        id: i64,
        worker_id: &str,
        error: &str,
        delay: Option<Duration>,
    ) -> Result<ReplicationRecord> {
        let delay_sql = match delay {
            Some(_) => "?5".to_string(),
            None => self.ctx.backoff.sql_case("retry_count"),
        };
        let sql = format!(
            "UPDATE {table}
             SET status = 'failed',
                 retry_count = MIN(retry_count + 1, max_retries),
                 last_error = ?3,
                 next_retry_at = ?4 + {delay_sql},
                 claimed_by = NULL
             WHERE id = ?1 AND {CLAIM_HELD}
             RETURNING {RECORD_COLUMNS}",
            table = self.table(),
        );
        let record = match delay {
            Some(delay) => {
                self.update_claimed(
                    id,
                    worker_id,
                    &sql,
                    params![id, worker_id, error, self.now(), duration_ms(delay)],
                )
                .await?
            }
            None => {
                self.update_claimed(id, worker_id, &sql, params![id, worker_id, error, self.now()])
                    .await?
            }
        };

        if record.is_dead_lettered() {
            tracing::warn!(
                queue = %self.kind,
                record_id = id,
                retries = record.retry_count,
                error,
                "Replication record exhausted its retry budget"
            );
        } else {
            tracing::debug!(
                queue = %self.kind,
                record_id = id,
                retries = record.retry_count,
                next_retry_at = record.next_retry_at,
                error,
                "Replication attempt failed"
            );
        }
        Ok(record)
    }
}

impl ReplicationRepository for LibSqlReplicationRepository<'_> {
    async fn enqueue(&self, record: &NewRecord) -> Result<EnqueueOutcome> {
        record.validate()?;

        let table = self.table();
        let now = self.now();
        let synced = TargetSet::of(record.primary_location);
        let status = if synced.covers(record.required_targets) {
            SyncStatus::Synced
        } else {
            SyncStatus::Pending
        };
        let completed_at = (status == SyncStatus::Synced).then_some(now);
        let max_retries = record.max_retries.unwrap_or(self.ctx.max_retries);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?;

        let inserted_id = {
            let mut rows = tx
                .query(
                    &format!(
                        "INSERT INTO {table}
                            (source, source_key, local_path, target_key, file_size, file_mtime,
                             required_targets, synced_targets, primary_location, status,
                             retry_count, max_retries, created_at, completed_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?13)
                         ON CONFLICT (source, source_key) DO NOTHING
                         RETURNING id"
                    ),
                    params![
                        record.source.as_str(),
                        record.source_key.as_str(),
                        record.local_path.as_str(),
                        record.target_key.as_str(),
                        record.file_size,
                        record.file_mtime,
                        record.required_targets.bits(),
                        synced.bits(),
                        record.primary_location.as_str(),
                        status.as_str(),
                        max_retries,
                        now,
                        completed_at
                    ],
                )
                .await?;
            match rows.next().await? {
                Some(row) => Some(row.get::<i64>(0)?),
                None => None,
            }
        };

        if let Some(id) = inserted_id {
            tx.commit().await?;
            tracing::debug!(queue = %self.kind, record_id = id, source = %record.source, "Enqueued record");
            return Ok(EnqueueOutcome::Inserted(id));
        }

        // Existing row: re-arm only when the stat identity changed and no worker holds it.
        let requeued_id = {
            let mut rows = tx
                .query(
                    &format!(
                        "UPDATE {table}
                         SET local_path = ?3, target_key = ?4, file_size = ?5, file_mtime = ?6,
                             required_targets = ?7, synced_targets = ?8, primary_location = ?9,
                             status = ?10, retry_count = 0, last_error = NULL,
                             next_retry_at = NULL, started_at = NULL, completed_at = ?11,
                             claimed_by = NULL
                         WHERE source = ?1 AND source_key = ?2
                           AND status <> 'uploading'
                           AND (file_size <> ?5 OR file_mtime IS NOT ?6)
                         RETURNING id"
                    ),
                    params![
                        record.source.as_str(),
                        record.source_key.as_str(),
                        record.local_path.as_str(),
                        record.target_key.as_str(),
                        record.file_size,
                        record.file_mtime,
                        record.required_targets.bits(),
                        synced.bits(),
                        record.primary_location.as_str(),
                        status.as_str(),
                        completed_at
                    ],
                )
                .await?;
            match rows.next().await? {
                Some(row) => Some(row.get::<i64>(0)?),
                None => None,
            }
        };

        let outcome = if let Some(id) = requeued_id {
            tracing::info!(queue = %self.kind, record_id = id, source = %record.source, "File changed, re-queued record");
            EnqueueOutcome::Requeued(id)
        } else {
            let mut rows = tx
                .query(
                    &format!("SELECT id FROM {table} WHERE source = ?1 AND source_key = ?2"),
                    params![record.source.as_str(), record.source_key.as_str()],
                )
                .await?;
            let row = rows.next().await?.ok_or_else(|| {
                Error::Database(format!(
                    "{} record {}/{} vanished during enqueue",
                    self.kind, record.source, record.source_key
                ))
            })?;
            EnqueueOutcome::Unchanged(row.get::<i64>(0)?)
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<ReplicationRecord>> {
        let table = self.table();
        let sql = format!(
            "UPDATE {table}
             SET status = 'uploading', started_at = ?1, claimed_by = ?2, next_retry_at = NULL
             WHERE id = (
                 SELECT id FROM {table}
                 WHERE status IN ('pending', 'failed')
                   AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                   AND retry_count < max_retries
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
             )
             AND status IN ('pending', 'failed')
             RETURNING {RECORD_COLUMNS}"
        );

        let mut rows = self.conn.query(&sql, params![self.now(), worker_id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get(&self, id: i64) -> Result<Option<ReplicationRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM {} WHERE id = ?1", self.table());
        Ok(self.query_records(&sql, params![id]).await?.into_iter().next())
    }

    async fn mark_target_synced(
        &self,
        id: i64,
        worker_id: &str,
        target: Target,
    ) -> Result<ReplicationRecord> {
        let covered = "((synced_targets | ?3) & required_targets) = required_targets";
        let sql = format!(
            "UPDATE {table}
             SET synced_targets = synced_targets | ?3,
                 status = CASE WHEN {covered} THEN 'synced' ELSE status END,
                 completed_at = CASE
                     WHEN {covered} THEN COALESCE(completed_at, ?4) ELSE completed_at END,
                 next_retry_at = CASE WHEN {covered} THEN NULL ELSE next_retry_at END,
                 claimed_by = CASE WHEN {covered} THEN NULL ELSE claimed_by END
             WHERE id = ?1 AND {CLAIM_HELD}
             RETURNING {RECORD_COLUMNS}",
            table = self.table(),
        );
        let record = self
            .update_claimed(
                id,
                worker_id,
                &sql,
                params![id, worker_id, target.bit(), self.now()],
            )
            .await?;

        tracing::debug!(
            queue = %self.kind,
            record_id = id,
            %target,
            status = %record.status,
            "Target synced"
        );
        Ok(record)
    }

    async fn mark_all_synced(&self, id: i64) -> Result<ReplicationRecord> {
        let sql = format!(
            "UPDATE {table}
             SET synced_targets = synced_targets | required_targets,
                 status = 'synced',
                 completed_at = COALESCE(completed_at, ?2),
                 next_retry_at = NULL,
                 claimed_by = NULL
             WHERE id = ?1 AND status <> 'skipped'
             RETURNING {RECORD_COLUMNS}",
            table = self.table(),
        );
        self.update_one(
            id,
            &sql,
            params![id, self.now()],
            "a skipped record stays skipped",
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: i64,
        worker_id: &str,
        error: &str,
    ) -> Result<ReplicationRecord> {
        self.record_failure(id, worker_id, error, None).await
    }

    async fn mark_retry(
        &self,
        id: i64,
        worker_id: &str,
        error: &str,
        delay: Duration,
    ) -> Result<ReplicationRecord> {
        self.record_failure(id, worker_id, error, Some(delay)).await
    }

    async fn mark_skipped(
        &self,
        id: i64,
        worker_id: &str,
        reason: &str,
    ) -> Result<ReplicationRecord> {
        let sql = format!(
            "UPDATE {table}
             SET status = 'skipped', last_error = ?3, completed_at = ?4,
                 next_retry_at = NULL, claimed_by = NULL
             WHERE id = ?1 AND {CLAIM_HELD}
             RETURNING {RECORD_COLUMNS}",
            table = self.table(),
        );
        let record = self
            .update_claimed(id, worker_id, &sql, params![id, worker_id, reason, self.now()])
            .await?;
        tracing::info!(queue = %self.kind, record_id = id, reason, "Skipped record");
        Ok(record)
    }

    async fn update_location(
        &self,
        id: i64,
        worker_id: &str,
        local_path: &str,
        target_key: &str,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {table} SET local_path = ?3, target_key = ?4
             WHERE id = ?1 AND {CLAIM_HELD}
             RETURNING {RECORD_COLUMNS}",
            table = self.table(),
        );
        self.update_claimed(
            id,
            worker_id,
            &sql,
            params![id, worker_id, local_path, target_key],
        )
        .await?;
        Ok(())
    }

    async fn reset_pending(&self, id: i64) -> Result<ReplicationRecord> {
        // A fully synced record stays synced; only its error state is cleared.
        let sql = format!(
            "UPDATE {table}
             SET status = CASE
                     WHEN (synced_targets & required_targets) = required_targets
                     THEN 'synced' ELSE 'pending' END,
                 retry_count = 0, last_error = NULL, next_retry_at = NULL, claimed_by = NULL,
                 completed_at = CASE
                     WHEN (synced_targets & required_targets) = required_targets
                     THEN completed_at ELSE NULL END
             WHERE id = ?1 AND status <> 'uploading'
             RETURNING {RECORD_COLUMNS}",
            table = self.table(),
        );
        let record = self
            .update_one(
                id,
                &sql,
                params![id],
                "wait for the claim to resolve or expire",
            )
            .await?;
        tracing::info!(queue = %self.kind, record_id = id, "Reset record to pending");
        Ok(record)
    }

    async fn reset_all_failed(&self, source: Option<&str>) -> Result<u64> {
        let table = self.table();
        let reset = "SET status = 'pending', retry_count = 0, last_error = NULL, \
                     next_retry_at = NULL, claimed_by = NULL";
        let affected = match source {
            Some(source) => {
                self.conn
                    .execute(
                        &format!(
                            "UPDATE {table} {reset} WHERE status = 'failed' AND source = ?1"
                        ),
                        params![source],
                    )
                    .await?
            }
            None => {
                self.conn
                    .execute(
                        &format!("UPDATE {table} {reset} WHERE status = 'failed'"),
                        (),
                    )
                    .await?
            }
        };

        tracing::info!(queue = %self.kind, source, count = affected, "Reset failed records");
        Ok(affected)
    }

    async fn requeue_stale(&self, lease: Duration) -> Result<StaleRequeue> {
        let cutoff = self.now() - duration_ms(lease);
        let sql = format!(
            "UPDATE {table}
             SET status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END,
                 retry_count = MIN(retry_count + 1, max_retries),
                 last_error = ?2,
                 next_retry_at = NULL,
                 claimed_by = NULL
             WHERE status = 'uploading' AND started_at IS NOT NULL AND started_at <= ?1
             RETURNING id, status",
            table = self.table(),
        );

        let mut rows = self
            .conn
            .query(&sql, params![cutoff, LEASE_EXPIRED_ERROR])
            .await?;
        let mut outcome = StaleRequeue::default();
        while let Some(row) = rows.next().await? {
            let id: i64 = row.get(0)?;
            let status: String = row.get(1)?;
            if status == SyncStatus::Failed.as_str() {
                outcome.dead_lettered += 1;
            } else {
                outcome.requeued += 1;
            }
            tracing::warn!(queue = %self.kind, record_id = id, %status, "Released stale claim");
        }
        Ok(outcome)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {STATS_COLUMNS} FROM {}", self.table()),
                (),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Self::stats_from_row(&row, 0),
            None => Ok(QueueStats::default()),
        }
    }

    async fn stats_by_source(&self) -> Result<Vec<SourceStats>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT source, {STATS_COLUMNS} FROM {} GROUP BY source ORDER BY source",
                    self.table()
                ),
                (),
            )
            .await?;

        let mut stats = Vec::new();
        while let Some(row) = rows.next().await? {
            stats.push(SourceStats {
                source: row.get(0)?,
                stats: Self::stats_from_row(&row, 1)?,
            });
        }
        Ok(stats)
    }

    async fn recent_failed(
        &self,
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ReplicationRecord>> {
        let table = self.table();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        match source {
            Some(source) => {
                self.query_records(
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM {table}
                         WHERE status = 'failed' AND source = ?1
                         ORDER BY started_at DESC NULLS LAST, id DESC
                         LIMIT ?2"
                    ),
                    params![source, limit],
                )
                .await
            }
            None => {
                self.query_records(
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM {table}
                         WHERE status = 'failed'
                         ORDER BY started_at DESC NULLS LAST, id DESC
                         LIMIT ?1"
                    ),
                    params![limit],
                )
                .await
            }
        }
    }

    async fn restorable(&self) -> Result<Vec<ReplicationRecord>> {
        let durable = Target::Nas.bit() | Target::R2.bit();
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM {} WHERE (synced_targets & ?1) <> 0 ORDER BY id",
                self.table()
            ),
            params![durable],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::db::Database;
    use crate::models::BackoffSchedule;
    use pretty_assertions::assert_eq;

    const T0: i64 = 1_700_000_000_000;

    fn context(clock: &Arc<ManualClock>) -> QueueContext {
        QueueContext::new(clock.clone(), BackoffSchedule::default(), 5)
    }

    fn all_targets() -> TargetSet {
        Target::ALL.into_iter().collect()
    }

    fn pool_record(key: &str, size: i64, mtime: i64) -> NewRecord {
        NewRecord::new(
            "bulk",
            key,
            format!("/pools/bulk/{key}"),
            format!("bulk/{key}"),
            size,
            TargetSet::of(Target::Nas),
        )
        .with_mtime(mtime)
    }

    /// Hand `id` to `worker` regardless of queue order.
    async fn claim_as(repo: &LibSqlReplicationRepository<'_>, id: i64, worker: &str) {
        repo.conn
            .execute(
                &format!(
                    "UPDATE {} SET status = 'uploading', claimed_by = ?2, started_at = ?3
                     WHERE id = ?1",
                    repo.table()
                ),
                params![id, worker, repo.now()],
            )
            .await
            .unwrap();
    }

    fn media_record(id: i64) -> NewRecord {
        NewRecord::new(
            "room_entry",
            id.to_string(),
            format!("/data/media/T-{id}/photo.jpg"),
            format!("T-{id}/photo_photo.jpg"),
            100 * id,
            all_targets(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_is_idempotent_for_unchanged_file() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Pool, &ctx);

        let first = repo.enqueue(&pool_record("a.bin", 10, 5)).await.unwrap();
        let second = repo.enqueue(&pool_record("a.bin", 10, 5)).await.unwrap();

        assert_eq!(first, EnqueueOutcome::Inserted(first.id()));
        assert_eq!(second, EnqueueOutcome::Unchanged(first.id()));
        assert_eq!(repo.stats().await.unwrap().total_files, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_changed_size_resets_record() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Pool, &ctx);

        let id = repo.enqueue(&pool_record("a.bin", 10, 5)).await.unwrap().id();
        repo.claim_next("w1").await.unwrap().unwrap();
        repo.mark_failed(id, "w1", "nas offline").await.unwrap();
        assert!(repo.claim_next("w1").await.unwrap().is_none());
        clock.advance(Duration::from_secs(31));
        repo.claim_next("w1").await.unwrap().unwrap();
        repo.mark_nas_synced(id, "w1").await.unwrap();

        let outcome = repo.enqueue(&pool_record("a.bin", 20, 5)).await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Requeued(id));

        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.file_size, 20);
        assert_eq!(record.synced_targets, TargetSet::of(Target::Local));
        assert_eq!(record.last_error, None);
        assert_eq!(record.completed_at, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_changed_mtime_requeues_but_not_while_uploading() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Pool, &ctx);

        let id = repo.enqueue(&pool_record("a.bin", 10, 5)).await.unwrap().id();
        repo.claim_next("w1").await.unwrap().unwrap();

        let while_claimed = repo.enqueue(&pool_record("a.bin", 10, 6)).await.unwrap();
        assert_eq!(while_claimed, EnqueueOutcome::Unchanged(id));

        repo.mark_nas_synced(id, "w1").await.unwrap();
        let after = repo.enqueue(&pool_record("a.bin", 10, 6)).await.unwrap();
        assert_eq!(after, EnqueueOutcome::Requeued(id));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_marks_primary_location_synced() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo
            .enqueue(&media_record(1).with_primary(Target::Nas))
            .await
            .unwrap()
            .id();
        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.synced_targets, TargetSet::of(Target::Nas));
        assert_eq!(record.primary_location, Target::Nas);
        assert_eq!(record.status, SyncStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_claim_is_fifo_and_exclusive() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let first = repo.enqueue(&media_record(1)).await.unwrap().id();
        clock.advance(Duration::from_millis(1));
        let second = repo.enqueue(&media_record(2)).await.unwrap().id();

        let claimed = repo.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.status, SyncStatus::Uploading);
        assert_eq!(claimed.started_at, Some(T0 + 1));
        assert_eq!(claimed.claimed_by.as_deref(), Some("w1"));

        let next = repo.claim_next("w2").await.unwrap().unwrap();
        assert_eq!(next.id, second);
        assert!(repo.claim_next("w3").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_claims_return_disjoint_records() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(tmp.path().join("queue.db")).await.unwrap());
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);

        {
            let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);
            for id in 1..=10 {
                repo.enqueue(&media_record(id)).await.unwrap();
            }
        }

        let mut handles = Vec::new();
        for worker in 0..12 {
            let db = db.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let conn = db.connect().await.unwrap();
                let repo = LibSqlReplicationRepository::new(&conn, QueueKind::Media, &ctx);
                let worker_id = format!("worker-{worker}");
                let mut claimed = Vec::new();
                while let Some(record) = repo.claim_next(&worker_id).await.unwrap() {
                    assert_eq!(record.claimed_by.as_deref(), Some(worker_id.as_str()));
                    claimed.push(record.id);
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(all.len(), 10);
        assert_eq!(unique.len(), 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_completion_rolls_up_once() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo
            .enqueue(&media_record(1).with_primary(Target::R2))
            .await
            .unwrap()
            .id();
        repo.claim_next("w1").await.unwrap().unwrap();

        let after_nas = repo.mark_nas_synced(id, "w1").await.unwrap();
        assert_eq!(after_nas.status, SyncStatus::Uploading);
        assert_eq!(after_nas.completed_at, None);
        assert_eq!(after_nas.claimed_by.as_deref(), Some("w1"));

        clock.advance(Duration::from_secs(2));
        let after_local = repo.mark_local_synced(id, "w1").await.unwrap();
        assert_eq!(after_local.status, SyncStatus::Synced);
        assert_eq!(after_local.completed_at, Some(T0 + 2_000));
        assert_eq!(after_local.claimed_by, None);
        assert!(after_local.local_synced() && after_local.nas_synced() && after_local.r2_synced());

        // Completion releases the claim, so a repeated report is refused.
        clock.advance(Duration::from_secs(5));
        assert!(matches!(
            repo.mark_r2_synced(id, "w1").await,
            Err(Error::InvalidState(_))
        ));
        let again = repo.get(id).await.unwrap().unwrap();
        assert_eq!(again.status, SyncStatus::Synced);
        assert_eq!(again.completed_at, Some(T0 + 2_000));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_all_synced_covers_required_targets() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo.enqueue(&media_record(1)).await.unwrap().id();
        let record = repo.mark_all_synced(id).await.unwrap();

        assert_eq!(record.status, SyncStatus::Synced);
        assert_eq!(record.synced_targets, all_targets());
        assert_eq!(record.completed_at, Some(T0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backoff_escalates_then_dead_letters() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo.enqueue(&media_record(1)).await.unwrap().id();
        let mut previous_delay = 0;
        for attempt in 1..=5 {
            let claimed = repo.claim_next("w1").await.unwrap().unwrap();
            assert_eq!(claimed.id, id);

            let failed = repo.mark_failed(id, "w1", "upload timed out").await.unwrap();
            let delay = failed.next_retry_at.unwrap() - clock.now_ms();
            assert_eq!(failed.retry_count, attempt);
            assert!(delay >= previous_delay);
            previous_delay = delay;

            assert!(repo.claim_next("w1").await.unwrap().is_none());
            clock.advance(Duration::from_millis(delay as u64));
        }

        assert_eq!(previous_delay, 60 * 60 * 1_000);
        let record = repo.get(id).await.unwrap().unwrap();
        assert!(record.is_dead_lettered());
        assert!(repo.claim_next("w1").await.unwrap().is_none());

        assert!(matches!(
            repo.mark_failed(id, "w1", "again").await,
            Err(Error::InvalidState(_))
        ));
        assert_eq!(repo.get(id).await.unwrap().unwrap().retry_count, 5);
        assert_eq!(repo.stats().await.unwrap().dead_lettered, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dead_letter_then_reset_pending_is_claimable() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo
            .enqueue(&media_record(1).with_max_retries(3))
            .await
            .unwrap()
            .id();
        for _ in 0..3 {
            repo.claim_next("w1").await.unwrap().unwrap();
            repo.mark_failed(id, "w1", "nas unreachable").await.unwrap();
            clock.advance(Duration::from_secs(3_600));
        }

        assert!(repo.claim_next("w1").await.unwrap().is_none());

        let reset = repo.reset_pending(id).await.unwrap();
        assert_eq!(reset.status, SyncStatus::Pending);
        assert_eq!(reset.retry_count, 0);
        assert_eq!(reset.last_error, None);
        assert_eq!(reset.next_retry_at, None);

        let again = repo.reset_pending(id).await.unwrap();
        assert_eq!(again.status, SyncStatus::Pending);

        assert_eq!(repo.claim_next("w1").await.unwrap().unwrap().id, id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_retry_uses_explicit_delay() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo.enqueue(&media_record(1)).await.unwrap().id();
        repo.claim_next("w1").await.unwrap().unwrap();
        let record = repo
            .mark_retry(id, "w1", "video still converting", Duration::from_secs(7))
            .await
            .unwrap();

        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.next_retry_at, Some(T0 + 7_000));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_skip_and_fail_never_regress_synced() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo.enqueue(&media_record(1)).await.unwrap().id();
        repo.mark_all_synced(id).await.unwrap();

        assert!(matches!(
            repo.mark_failed(id, "w1", "late failure").await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            repo.mark_skipped(id, "w1", "late skip").await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            repo.mark_failed(9_999, "w1", "missing").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(
            repo.reset_pending(id).await.unwrap().status,
            SyncStatus::Synced
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_skipped_is_terminal_and_not_pending() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo.enqueue(&media_record(1)).await.unwrap().id();
        repo.claim_next("w1").await.unwrap().unwrap();
        let skipped = repo.mark_skipped(id, "w1", "file not found").await.unwrap();

        assert_eq!(skipped.status, SyncStatus::Skipped);
        assert_eq!(skipped.completed_at, Some(T0));
        assert!(repo.claim_next("w1").await.unwrap().is_none());

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_all_failed_only_touches_failed() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let failed_a = repo.enqueue(&media_record(1)).await.unwrap().id();
        let failed_b = repo.enqueue(&media_record(2)).await.unwrap().id();
        let synced = repo.enqueue(&media_record(3)).await.unwrap().id();
        let skipped = repo.enqueue(&media_record(4)).await.unwrap().id();
        let pending = repo.enqueue(&media_record(5)).await.unwrap().id();

        claim_as(&repo, failed_a, "w1").await;
        repo.mark_failed(failed_a, "w1", "boom").await.unwrap();
        claim_as(&repo, failed_b, "w1").await;
        repo.mark_failed(failed_b, "w1", "boom").await.unwrap();
        repo.mark_all_synced(synced).await.unwrap();
        claim_as(&repo, skipped, "w1").await;
        repo.mark_skipped(skipped, "w1", "gone").await.unwrap();

        assert_eq!(repo.reset_all_failed(None).await.unwrap(), 2);

        for id in [failed_a, failed_b, pending] {
            let record = repo.get(id).await.unwrap().unwrap();
            assert_eq!(record.status, SyncStatus::Pending);
            assert_eq!(record.retry_count, 0);
            assert_eq!(record.last_error, None);
            assert_eq!(record.next_retry_at, None);
        }
        assert_eq!(
            repo.get(synced).await.unwrap().unwrap().status,
            SyncStatus::Synced
        );
        assert_eq!(
            repo.get(skipped).await.unwrap().unwrap().status,
            SyncStatus::Skipped
        );
        assert_eq!(repo.reset_all_failed(None).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_all_failed_filters_by_source() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Pool, &ctx);

        let bulk = repo.enqueue(&pool_record("a.bin", 1, 1)).await.unwrap().id();
        let mut other = pool_record("b.bin", 1, 1);
        other.source = "archive".to_string();
        let archive = repo.enqueue(&other).await.unwrap().id();
        claim_as(&repo, bulk, "w1").await;
        repo.mark_failed(bulk, "w1", "x").await.unwrap();
        claim_as(&repo, archive, "w2").await;
        repo.mark_failed(archive, "w2", "x").await.unwrap();

        assert_eq!(repo.reset_all_failed(Some("archive")).await.unwrap(), 1);
        assert_eq!(
            repo.get(bulk).await.unwrap().unwrap().status,
            SyncStatus::Failed
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_pending_refuses_active_claim() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo.enqueue(&media_record(1)).await.unwrap().id();
        repo.claim_next("w1").await.unwrap().unwrap();
        assert!(matches!(
            repo.reset_pending(id).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_requeue_stale_releases_expired_claims() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let stale = repo.enqueue(&media_record(1)).await.unwrap().id();
        let exhausted = repo
            .enqueue(&media_record(2).with_max_retries(1))
            .await
            .unwrap()
            .id();
        let fresh = repo.enqueue(&media_record(3)).await.unwrap().id();

        repo.claim_next("w1").await.unwrap().unwrap();
        repo.claim_next("w2").await.unwrap().unwrap();
        clock.advance(Duration::from_secs(20 * 60));
        repo.claim_next("w3").await.unwrap().unwrap();
        clock.advance(Duration::from_secs(15 * 60));

        let outcome = repo
            .requeue_stale(Duration::from_secs(30 * 60))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StaleRequeue {
                requeued: 1,
                dead_lettered: 1
            }
        );

        let stale = repo.get(stale).await.unwrap().unwrap();
        assert_eq!(stale.status, SyncStatus::Pending);
        assert_eq!(stale.retry_count, 1);
        assert_eq!(stale.last_error.as_deref(), Some(LEASE_EXPIRED_ERROR));

        let exhausted = repo.get(exhausted).await.unwrap().unwrap();
        assert!(exhausted.is_dead_lettered());

        let fresh = repo.get(fresh).await.unwrap().unwrap();
        assert_eq!(fresh.status, SyncStatus::Uploading);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reaped_claim_fences_out_previous_worker() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Pool, &ctx);

        let id = repo.enqueue(&pool_record("a.bin", 10, 5)).await.unwrap().id();
        repo.claim_next("w1").await.unwrap().unwrap();
        clock.advance(Duration::from_secs(31 * 60));
        repo.requeue_stale(Duration::from_secs(30 * 60))
            .await
            .unwrap();
        let reclaimed = repo.claim_next("w2").await.unwrap().unwrap();
        assert_eq!(reclaimed.id, id);

        // The slow first worker reports back after losing its claim.
        assert!(matches!(
            repo.mark_failed(id, "w1", "upload timed out").await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            repo.mark_nas_synced(id, "w1").await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            repo.mark_skipped(id, "w1", "file not found").await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            repo.update_location(id, "w1", "/elsewhere/a.mp4", "bulk/a.mp4")
                .await,
            Err(Error::InvalidState(_))
        ));

        clock.advance(Duration::from_secs(60));
        assert!(repo.claim_next("w3").await.unwrap().is_none());

        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Uploading);
        assert_eq!(record.claimed_by.as_deref(), Some("w2"));
        assert_eq!(record.synced_targets, TargetSet::of(Target::Local));
        assert_eq!(record.local_path, "/pools/bulk/a.bin");
        assert_eq!(record.retry_count, 1);

        let done = repo.mark_nas_synced(id, "w2").await.unwrap();
        assert_eq!(done.status, SyncStatus::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_late_success_does_not_revive_skipped() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo.enqueue(&media_record(1)).await.unwrap().id();
        repo.claim_next("w1").await.unwrap().unwrap();
        repo.mark_skipped(id, "w1", "file not found").await.unwrap();

        assert!(matches!(
            repo.mark_nas_synced(id, "w1").await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            repo.mark_all_synced(id).await,
            Err(Error::InvalidState(_))
        ));

        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Skipped);
        assert_eq!(record.synced_targets, TargetSet::of(Target::Local));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_location_follows_claim_holder() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let id = repo.enqueue(&media_record(1)).await.unwrap().id();
        assert!(matches!(
            repo.update_location(id, "w1", "/data/a.mp4", "T-1/a.mp4").await,
            Err(Error::InvalidState(_))
        ));

        repo.claim_next("w1").await.unwrap().unwrap();
        repo.update_location(id, "w1", "/data/a.mp4", "T-1/a.mp4")
            .await
            .unwrap();
        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.local_path, "/data/a.mp4");
        assert_eq!(record.target_key, "T-1/a.mp4");
        assert!(matches!(
            repo.update_location(9_999, "w1", "/x", "x").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stats_and_recent_failed() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let a = repo.enqueue(&media_record(1)).await.unwrap().id();
        let b = repo.enqueue(&media_record(2)).await.unwrap().id();
        let c = repo.enqueue(&media_record(3)).await.unwrap().id();
        let mut gate = media_record(4);
        gate.source = "gate_pass".to_string();
        repo.enqueue(&gate).await.unwrap();

        repo.claim_next("w1").await.unwrap().unwrap();
        repo.mark_failed(a, "w1", "first").await.unwrap();
        clock.advance(Duration::from_secs(1));
        repo.claim_next("w1").await.unwrap().unwrap();
        repo.mark_failed(b, "w1", "second").await.unwrap();
        repo.mark_all_synced(c).await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                total_files: 4,
                pending: 1,
                uploading: 0,
                synced: 1,
                failed: 2,
                skipped: 0,
                dead_lettered: 0,
                total_bytes: 1_000,
                synced_bytes: 300,
                local_synced: 4,
                nas_synced: 1,
                r2_synced: 1,
            }
        );

        let failed = repo.recent_failed(None, 10).await.unwrap();
        let ids: Vec<i64> = failed.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![b, a]);
        assert!(repo
            .recent_failed(Some("gate_pass"), 10)
            .await
            .unwrap()
            .is_empty());

        let by_source = repo.stats_by_source().await.unwrap();
        assert_eq!(by_source.len(), 2);
        assert_eq!(by_source[0].source, "gate_pass");
        assert_eq!(by_source[1].stats.total_files, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restorable_requires_durable_copy() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(&clock);
        let repo = LibSqlReplicationRepository::new(db.connection(), QueueKind::Media, &ctx);

        let local_only = repo.enqueue(&media_record(1)).await.unwrap().id();
        let on_r2 = repo.enqueue(&media_record(2)).await.unwrap().id();
        claim_as(&repo, on_r2, "w1").await;
        repo.mark_r2_synced(on_r2, "w1").await.unwrap();

        let ids: Vec<i64> = repo
            .restorable()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(ids, vec![on_r2]);
        assert_ne!(ids, vec![local_only]);
    }
}
