//! coldsync-core - Core library for coldsync
//!
//! This crate contains the replication queue, its libSQL store, the object
//! storage targets, and the media/pool sync services shared by the CLI and
//! the admin API.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

pub use error::{Error, Result};
pub use models::{ReplicationRecord, SyncStatus, Target, TargetSet};
