//! Aggregate views over the replication queues

use serde::{Deserialize, Serialize};

/// Counts and volumes for one queue (or one source within it).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_files: i64,
    pub pending: i64,
    pub uploading: i64,
    pub synced: i64,
    pub failed: i64,
    pub skipped: i64,
    /// Failed records whose retry budget is spent.
    pub dead_lettered: i64,
    pub total_bytes: i64,
    pub synced_bytes: i64,
    pub local_synced: i64,
    pub nas_synced: i64,
    pub r2_synced: i64,
}

impl QueueStats {
    /// Records that still need automatic work.
    pub const fn outstanding(&self) -> i64 {
        self.pending + self.uploading + self.failed - self.dead_lettered
    }
}

/// Per-source breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    #[serde(flatten)]
    pub stats: QueueStats,
}

/// Scan bookkeeping for one storage pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolScanState {
    pub pool_name: String,
    /// Last completed scan (Unix ms).
    pub last_scan_at: Option<i64>,
    pub files_found: i64,
    pub files_enqueued: i64,
    pub scan_duration_ms: i64,
    pub is_scanning: bool,
    /// When the running scan took the flag (Unix ms).
    pub scan_started_at: Option<i64>,
}

/// Status of one configured pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub pool_name: String,
    pub root: String,
    pub stats: QueueStats,
    pub scan: Option<PoolScanState>,
}

/// Dashboard view across every pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSyncOverview {
    pub pools: Vec<PoolStatus>,
    pub totals: QueueStats,
}

/// Progress of a bulk restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreProgress {
    pub running: bool,
    pub total_files: i64,
    pub restored_files: i64,
    pub failed_files: i64,
    pub current_file: Option<String>,
    pub bytes_total: i64,
    pub bytes_restored: i64,
    /// First error encountered.
    pub error: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl RestoreProgress {
    pub const fn remaining(&self) -> i64 {
        self.total_files - self.restored_files - self.failed_files
    }

    pub(crate) fn record_error(&mut self, error: impl Into<String>) {
        self.failed_files += 1;
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }
}

/// Outcome of a stale-claim sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleRequeue {
    /// Returned to `pending`.
    pub requeued: u64,
    /// Budget exhausted; parked as `failed`.
    pub dead_lettered: u64,
}

impl StaleRequeue {
    pub const fn total(self) -> u64 {
        self.requeued + self.dead_lettered
    }
}
