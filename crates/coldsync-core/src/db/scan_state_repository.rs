//! Pool scan-state repository

use libsql::{params, Connection, Row};

use crate::error::Result;
use crate::models::PoolScanState;

/// Trait for pool scan bookkeeping (async)
#[allow(async_fn_in_trait)]
pub trait ScanStateRepository {
    /// Mark `pool` as scanning from `started_at` if no other scan holds it
    ///
    /// Returns `false` when a scan is already running.
    async fn try_begin_scan(&self, pool: &str, started_at: i64) -> Result<bool>;

    /// Record scan results and release the scanning flag
    async fn finish_scan(
        &self,
        pool: &str,
        finished_at: i64,
        files_found: i64,
        files_enqueued: i64,
        duration_ms: i64,
    ) -> Result<()>;

    /// Clear scanning flags taken at or before `started_before`
    ///
    /// Flags without a start time predate that bookkeeping and always count
    /// as stale.
    async fn clear_stale_scans(&self, started_before: i64) -> Result<u64>;

    /// Get the scan state of one pool
    async fn get(&self, pool: &str) -> Result<Option<PoolScanState>>;

    /// List scan states of every known pool
    async fn list(&self) -> Result<Vec<PoolScanState>>;
}

/// libSQL implementation of `ScanStateRepository`
pub struct LibSqlScanStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlScanStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn state_from_row(row: &Row) -> Result<PoolScanState> {
        Ok(PoolScanState {
            pool_name: row.get(0)?,
            last_scan_at: row.get(1)?,
            files_found: row.get(2)?,
            files_enqueued: row.get(3)?,
            scan_duration_ms: row.get(4)?,
            is_scanning: row.get::<i64>(5)? != 0,
            scan_started_at: row.get(6)?,
        })
    }
}

const STATE_COLUMNS: &str = "pool_name, last_scan_at, files_found, files_enqueued, \
    scan_duration_ms, is_scanning, scan_started_at";

impl ScanStateRepository for LibSqlScanStateRepository<'_> {
    async fn try_begin_scan(&self, pool: &str, started_at: i64) -> Result<bool> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO pool_sync_scan_state (pool_name) VALUES (?1)",
                params![pool],
            )
            .await?;
        let claimed = self
            .conn
            .execute(
                "UPDATE pool_sync_scan_state SET is_scanning = 1, scan_started_at = ?2
                 WHERE pool_name = ?1 AND is_scanning = 0",
                params![pool, started_at],
            )
            .await?;
        Ok(claimed == 1)
    }

    async fn finish_scan(
        &self,
        pool: &str,
        finished_at: i64,
        files_found: i64,
        files_enqueued: i64,
        duration_ms: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE pool_sync_scan_state
                 SET is_scanning = 0, scan_started_at = NULL, last_scan_at = ?2,
                     files_found = ?3, files_enqueued = ?4, scan_duration_ms = ?5
                 WHERE pool_name = ?1",
                params![pool, finished_at, files_found, files_enqueued, duration_ms],
            )
            .await?;
        Ok(())
    }

    async fn clear_stale_scans(&self, started_before: i64) -> Result<u64> {
        let cleared = self
            .conn
            .execute(
                "UPDATE pool_sync_scan_state SET is_scanning = 0, scan_started_at = NULL
                 WHERE is_scanning = 1
                   AND (scan_started_at IS NULL OR scan_started_at <= ?1)",
                params![started_before],
            )
            .await?;
        if cleared > 0 {
            tracing::warn!(count = cleared, started_before, "Cleared abandoned scan flags");
        }
        Ok(cleared)
    }

    async fn get(&self, pool: &str) -> Result<Option<PoolScanState>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {STATE_COLUMNS} FROM pool_sync_scan_state WHERE pool_name = ?1"),
                params![pool],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::state_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<PoolScanState>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {STATE_COLUMNS} FROM pool_sync_scan_state ORDER BY pool_name"),
                (),
            )
            .await?;
        let mut states = Vec::new();
        while let Some(row) = rows.next().await? {
            states.push(Self::state_from_row(&row)?);
        }
        Ok(states)
    }
}
