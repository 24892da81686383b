//! Object storage targets for replicated files.

mod directory;
mod s3;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::Target;

pub use directory::DirectoryStore;
pub use s3::{S3ObjectStore, S3TargetConfig};

/// Durable copy destination used by workers and restore.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable description for logs (never includes credentials).
    fn describe(&self) -> String;

    /// Copy a local file to `key`.
    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<()>;

    /// Copy `key` to a local file, returning the number of bytes written.
    ///
    /// Parent directories are created and the file only appears at
    /// `local_path` once fully written.
    async fn download_file(&self, key: &str, local_path: &Path) -> Result<u64>;

    /// Whether `key` exists.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Configured durable targets.
#[derive(Clone, Default)]
pub struct Targets {
    pub nas: Option<Arc<dyn ObjectStore>>,
    pub r2: Option<Arc<dyn ObjectStore>>,
}

impl Targets {
    pub fn get(&self, target: Target) -> Option<&Arc<dyn ObjectStore>> {
        match target {
            Target::Local => None,
            Target::Nas => self.nas.as_ref(),
            Target::R2 => self.r2.as_ref(),
        }
    }

    pub const fn has_durable(&self) -> bool {
        self.nas.is_some() || self.r2.is_some()
    }
}

impl std::fmt::Debug for Targets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Targets")
            .field("nas", &self.nas.as_ref().map(|store| store.describe()))
            .field("r2", &self.r2.as_ref().map(|store| store.describe()))
            .finish()
    }
}

pub(crate) fn normalize_object_key(object_key: &str) -> Result<String> {
    let object_key = object_key.trim().trim_matches('/').replace('\\', "/");
    if object_key.is_empty() {
        return Err(Error::InvalidInput("object key cannot be empty".to_string()));
    }
    if object_key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(Error::InvalidInput(format!(
            "object key has an invalid path segment: {object_key}"
        )));
    }
    Ok(object_key)
}

/// Sibling path used while a download is in flight.
pub(crate) fn partial_path(local_path: &Path) -> std::path::PathBuf {
    let mut name = local_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".part");
    local_path.with_file_name(name)
}

/// Remove the staging file of a failed transfer.
pub(crate) async fn discard_partial(staging: &Path) {
    if let Err(error) = tokio::fs::remove_file(staging).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %staging.display(), %error, "Could not remove staging file");
        }
    }
}

pub(crate) async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}
