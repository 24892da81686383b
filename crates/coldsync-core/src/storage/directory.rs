//! Directory-backed target, e.g. a mounted NAS share.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{discard_partial, ensure_parent, normalize_object_key, partial_path, ObjectStore};
use crate::error::{Error, Result};

/// Stores objects as files under a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path an object key maps to.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        let key = normalize_object_key(key)?;
        Ok(key
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

#[async_trait]
impl ObjectStore for DirectoryStore {
    fn describe(&self) -> String {
        format!("dir:{}", self.root.display())
    }

    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<()> {
        let destination = self.object_path(key)?;
        ensure_parent(&destination).await?;
        copy_via_staging(local_path, &destination).await?;
        Ok(())
    }

    async fn download_file(&self, key: &str, local_path: &Path) -> Result<u64> {
        let source = self.object_path(key)?;
        ensure_parent(local_path).await?;
        copy_via_staging(&source, local_path).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.object_path(key)?).await?)
    }
}

/// Copy through a `.part` sibling, then rename it over `destination`.
///
/// The staging file is removed when either step fails.
async fn copy_via_staging(source: &Path, destination: &Path) -> Result<u64> {
    let staging = partial_path(destination);
    let copied = match tokio::fs::copy(source, &staging).await {
        Ok(bytes) => tokio::fs::rename(&staging, destination)
            .await
            .map(|()| bytes)
            .map_err(|error| {
                Error::Storage(format!(
                    "move {} into place failed: {error}",
                    destination.display()
                ))
            }),
        Err(error) => Err(Error::Storage(format!(
            "copy {} to {} failed: {error}",
            source.display(),
            destination.display()
        ))),
    };
    if copied.is_err() {
        discard_partial(&staging).await;
    }
    copied
}
