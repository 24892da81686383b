//! S3-compatible target (Cloudflare R2, or a NAS running an S3 gateway).

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;
use tokio::io::AsyncWriteExt;

use super::{discard_partial, ensure_parent, normalize_object_key, partial_path, ObjectStore};
use crate::error::{Error, Result};

/// Connection settings for one S3-compatible bucket.
#[derive(Clone, PartialEq, Eq)]
pub struct S3TargetConfig {
    /// Short name used in logs and errors (`r2`, `nas`).
    pub label: String,
    /// S3 endpoint URL.
    pub endpoint_url: String,
    pub region: String,
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
}

impl S3TargetConfig {
    /// Cloudflare R2 bucket addressed by account id.
    pub fn r2(
        account_id: &str,
        bucket: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            label: "r2".to_string(),
            endpoint_url: format!("https://{account_id}.r2.cloudflarestorage.com"),
            region: "auto".to_string(),
            bucket: bucket.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for S3TargetConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("S3TargetConfig")
            .field("label", &self.label)
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// S3-backed object store.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    config: S3TargetConfig,
    client: Client,
}

impl S3ObjectStore {
    pub fn new(config: S3TargetConfig) -> Self {
        let client = build_s3_client(&config);
        Self { config, client }
    }

    pub const fn config(&self) -> &S3TargetConfig {
        &self.config
    }

    /// Check that the configured bucket is reachable with current credentials.
    pub async fn bucket_is_reachable(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|error| self.storage_error("head_bucket", None, error))?;
        Ok(())
    }

    /// Delete an object from the configured bucket.
    pub async fn delete_object(&self, object_key: &str) -> Result<()> {
        let object_key = normalize_object_key(object_key)?;
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|error| self.storage_error("delete_object", Some(&object_key), error))?;
        Ok(())
    }

    /// Stream an object body into `staging` and sync it to disk.
    async fn write_body(
        &self,
        mut body: ByteStream,
        staging: &Path,
        object_key: &str,
    ) -> Result<u64> {
        let mut file = tokio::fs::File::create(staging).await?;
        let mut written = 0_u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|error| self.storage_error("get_object_body", Some(object_key), error))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    fn storage_error(
        &self,
        operation: &str,
        object_key: Option<&str>,
        error: impl fmt::Display,
    ) -> Error {
        let bucket = &self.config.bucket;
        let target =
            object_key.map_or_else(|| bucket.to_string(), |key| format!("{bucket}/{key}"));
        Error::Storage(format!(
            "{} {operation} failed for {target}: {error}",
            self.config.label
        ))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn describe(&self) -> String {
        format!(
            "{}:{}/{}",
            self.config.label, self.config.endpoint_url, self.config.bucket
        )
    }

    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<()> {
        let object_key = normalize_object_key(key)?;
        let body = ByteStream::from_path(local_path).await.map_err(|error| {
            Error::Storage(format!("open {} failed: {error}", local_path.display()))
        })?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .body(body);
        if let Some(content_type) = content_type_for(&object_key) {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .map_err(|error| self.storage_error("put_object", Some(&object_key), error))?;
        Ok(())
    }

    async fn download_file(&self, key: &str, local_path: &Path) -> Result<u64> {
        let object_key = normalize_object_key(key)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|error| self.storage_error("get_object", Some(&object_key), error))?;

        ensure_parent(local_path).await?;
        let staging = partial_path(local_path);
        let written = match self
            .write_body(response.body, &staging, &object_key)
            .await
        {
            Ok(written) => written,
            Err(error) => {
                discard_partial(&staging).await;
                return Err(error);
            }
        };
        if let Err(error) = tokio::fs::rename(&staging, local_path).await {
            discard_partial(&staging).await;
            return Err(error.into());
        }
        Ok(written)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let object_key = normalize_object_key(key)?;
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.config.bucket)
            .prefix(&object_key)
            .max_keys(1)
            .send()
            .await
            .map_err(|error| self.storage_error("list_objects_v2", Some(&object_key), error))?;

        Ok(response
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .any(|candidate| candidate == object_key))
    }
}

fn build_s3_client(config: &S3TargetConfig) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "coldsync-s3-target",
    );

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url.clone())
        .force_path_style(true)
        .build();

    Client::from_conf(sdk_config)
}

fn content_type_for(object_key: &str) -> Option<&'static str> {
    let (_, ext) = object_key.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "mp4" | "m4v" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "webm" => Some("video/webm"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}
