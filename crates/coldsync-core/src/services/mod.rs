//! Replication services shared by the CLI and the admin API.

mod media_sync;
mod pool_sync;
mod restore;
mod scheduler;

pub use media_sync::{MediaEnqueue, MediaSyncService};
pub use pool_sync::{PoolSyncService, ScanOutcome, ScanSummary};
pub use scheduler::{SchedulerSettings, SyncJob, SyncScheduler};

use std::path::Path;

use crate::error::Result;

/// Whether a local file is present, treating permission errors as store faults.
pub(crate) async fn file_exists(path: &Path) -> Result<bool> {
    Ok(tokio::fs::try_exists(path).await?)
}
