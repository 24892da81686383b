//! Database layer for coldsync

mod connection;
mod media_repository;
mod migrations;
mod queue_repository;
mod scan_state_repository;

pub use connection::{Database, DEFAULT_BUSY_TIMEOUT};
pub use media_repository::{LibSqlMediaRepository, MediaRepository};
pub use queue_repository::{
    LibSqlReplicationRepository, QueueContext, ReplicationRepository, LEASE_EXPIRED_ERROR,
};
pub use scan_state_repository::{LibSqlScanStateRepository, ScanStateRepository};
