//! Replication record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::target::{Target, TargetSet};

/// Default number of automatic attempts before a record is dead-lettered.
pub const DEFAULT_MAX_RETRIES: i64 = 5;

/// Lifecycle state of a replication record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Uploading,
    Synced,
    Failed,
    Skipped,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(Error::Database(format!("Unknown sync status: {other}"))),
        }
    }
}

/// Queue family. Both families share the same row shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Photos and videos attached to room-entry and gate-pass events.
    Media,
    /// Files living in bulk storage pools.
    Pool,
}

impl QueueKind {
    pub const ALL: [Self; 2] = [Self::Media, Self::Pool];

    /// Backing table name.
    pub const fn table(self) -> &'static str {
        match self {
            Self::Media => "media_sync_queue",
            Self::Pool => "pool_sync_queue",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Pool => "pool",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of replication work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationRecord {
    /// Row id assigned at insertion.
    pub id: i64,
    /// Origin tag (`room_entry`, `gate_pass`, or a pool name).
    pub source: String,
    /// Origin-specific key (media id or relative path).
    pub source_key: String,
    /// Absolute path on the primary disk.
    pub local_path: String,
    /// Key the file occupies in durable targets.
    pub target_key: String,
    /// File size in bytes.
    pub file_size: i64,
    /// Modification time (Unix seconds), pool files only.
    pub file_mtime: Option<i64>,
    /// Targets the replication policy requires.
    pub required_targets: TargetSet,
    /// Targets confirmed so far.
    pub synced_targets: TargetSet,
    /// Target that originally received the file.
    pub primary_location: Target,
    pub status: SyncStatus,
    pub retry_count: i64,
    pub max_retries: i64,
    pub last_error: Option<String>,
    /// Worker currently (or last) holding the claim.
    pub claimed_by: Option<String>,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
    /// Claim timestamp (Unix ms).
    pub started_at: Option<i64>,
    /// Terminal timestamp (Unix ms).
    pub completed_at: Option<i64>,
    /// Earliest next claim after a failure (Unix ms).
    pub next_retry_at: Option<i64>,
}

impl ReplicationRecord {
    pub const fn local_synced(&self) -> bool {
        self.synced_targets.contains(Target::Local)
    }

    pub const fn nas_synced(&self) -> bool {
        self.synced_targets.contains(Target::Nas)
    }

    pub const fn r2_synced(&self) -> bool {
        self.synced_targets.contains(Target::R2)
    }

    /// Required targets that have not been confirmed yet.
    pub const fn missing_targets(&self) -> TargetSet {
        self.required_targets.missing_from(self.synced_targets)
    }

    /// True once automatic retries are exhausted.
    pub const fn is_dead_lettered(&self) -> bool {
        matches!(self.status, SyncStatus::Failed) && self.retry_count >= self.max_retries
    }
}

/// Input for [`crate::db::ReplicationRepository::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub source: String,
    pub source_key: String,
    pub local_path: String,
    pub target_key: String,
    pub file_size: i64,
    pub file_mtime: Option<i64>,
    pub required_targets: TargetSet,
    pub primary_location: Target,
    pub max_retries: Option<i64>,
}

impl NewRecord {
    /// Create a record whose primary copy is on local disk.
    pub fn new(
        source: impl Into<String>,
        source_key: impl Into<String>,
        local_path: impl Into<String>,
        target_key: impl Into<String>,
        file_size: i64,
        required_targets: TargetSet,
    ) -> Self {
        Self {
            source: source.into(),
            source_key: source_key.into(),
            local_path: local_path.into(),
            target_key: target_key.into(),
            file_size,
            file_mtime: None,
            required_targets,
            primary_location: Target::Local,
            max_retries: None,
        }
    }

    #[must_use]
    pub const fn with_mtime(mut self, mtime: i64) -> Self {
        self.file_mtime = Some(mtime);
        self
    }

    #[must_use]
    pub const fn with_primary(mut self, primary: Target) -> Self {
        self.primary_location = primary;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Validate the record before it is written.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(Error::InvalidInput("source cannot be empty".to_string()));
        }
        if self.source_key.trim().is_empty() {
            return Err(Error::InvalidInput("source_key cannot be empty".to_string()));
        }
        if self.target_key.trim().is_empty() {
            return Err(Error::InvalidInput("target_key cannot be empty".to_string()));
        }
        if self.file_size < 0 {
            return Err(Error::InvalidInput(
                "file_size cannot be negative".to_string(),
            ));
        }
        if self.required_targets.is_empty() {
            return Err(Error::InvalidInput(
                "at least one target is required".to_string(),
            ));
        }
        if self.max_retries.is_some_and(|max| max < 1) {
            return Err(Error::InvalidInput(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// What an enqueue call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// A new pending row was created.
    Inserted(i64),
    /// An existing row changed on disk and was reset to pending.
    Requeued(i64),
    /// The row already exists with the same size and mtime.
    Unchanged(i64),
}

impl EnqueueOutcome {
    pub const fn id(self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Requeued(id) | Self::Unchanged(id) => id,
        }
    }

    /// True when the call created or re-armed work.
    pub const fn queued_work(self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }
}
