//! Data models for coldsync

mod backoff;
mod media;
mod record;
mod stats;
mod target;

pub use backoff::BackoffSchedule;
pub use media::{is_convertible_video, mp4_variant, MediaFile, MediaSource, NewMediaFile};
pub use record::{
    EnqueueOutcome, NewRecord, QueueKind, ReplicationRecord, SyncStatus, DEFAULT_MAX_RETRIES,
};
pub use stats::{
    PoolScanState, PoolStatus, PoolSyncOverview, QueueStats, RestoreProgress, SourceStats,
    StaleRequeue,
};
pub use target::{Target, TargetSet};
