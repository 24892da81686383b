//! Runtime configuration loaded from environment variables.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::models::DEFAULT_MAX_RETRIES;
use crate::storage::{DirectoryStore, ObjectStore, S3ObjectStore, S3TargetConfig, Targets};

/// Pools scanned every 15 minutes unless overridden; everything else hourly.
const FAST_SCAN_POOLS: [&str; 2] = ["bulk", "highspeed"];
const FAST_SCAN_INTERVAL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Worker pool settings for one queue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub workers: usize,
    pub poll_interval: Duration,
}

/// A storage pool whose files are mirrored to the NAS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub name: String,
    pub root: PathBuf,
    pub scan_interval: Duration,
}

/// Where the NAS copy lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NasConfig {
    /// Mounted share written through the filesystem.
    Directory(PathBuf),
    /// S3-compatible gateway on the NAS.
    S3(S3TargetConfig),
}

#[derive(Clone, PartialEq, Eq)]
pub struct ColdsyncConfig {
    pub db_path: PathBuf,
    /// Root that media `file_path` values are relative to.
    pub local_base_dir: PathBuf,
    pub media: WorkerSettings,
    pub pool: WorkerSettings,
    pub pools: Vec<PoolConfig>,
    pub pool_scan_initial_delay: Duration,
    /// Age after which a pool's scanning flag is considered abandoned.
    pub pool_scan_stale_after: Duration,
    pub max_retries: i64,
    /// Age after which an `uploading` claim is considered abandoned.
    pub claim_lease: Duration,
    pub reaper_interval: Duration,
    pub nas: Option<NasConfig>,
    pub r2: Option<S3TargetConfig>,
}

impl fmt::Debug for ColdsyncConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        // S3TargetConfig redacts its own secret.
        formatter
            .debug_struct("ColdsyncConfig")
            .field("db_path", &self.db_path)
            .field("local_base_dir", &self.local_base_dir)
            .field("media", &self.media)
            .field("pool", &self.pool)
            .field("pools", &self.pools)
            .field("pool_scan_initial_delay", &self.pool_scan_initial_delay)
            .field("pool_scan_stale_after", &self.pool_scan_stale_after)
            .field("max_retries", &self.max_retries)
            .field("claim_lease", &self.claim_lease)
            .field("reaper_interval", &self.reaper_interval)
            .field("nas", &self.nas)
            .field("r2", &self.r2)
            .finish()
    }
}

impl ColdsyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = PathBuf::from(value_or_default(
            &lookup,
            "COLDSYNC_DB_PATH",
            "./coldsync.db",
        ));
        let local_base_dir = PathBuf::from(value_or_default(
            &lookup,
            "COLDSYNC_LOCAL_BASE_DIR",
            "./media",
        ));

        let media = WorkerSettings {
            workers: parse_in_range(&lookup, "MEDIA_SYNC_WORKERS", 2, 1, 64)?,
            poll_interval: Duration::from_secs(parse_in_range(
                &lookup,
                "MEDIA_SYNC_POLL_SECS",
                5,
                1,
                3_600,
            )?),
        };
        let pool = WorkerSettings {
            workers: parse_in_range(&lookup, "POOL_SYNC_WORKERS", 3, 1, 64)?,
            poll_interval: Duration::from_secs(parse_in_range(
                &lookup,
                "POOL_SYNC_POLL_SECS",
                5,
                1,
                3_600,
            )?),
        };

        let scan_override = optional_trimmed(&lookup, "POOL_SCAN_INTERVAL_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| (60..=86_400).contains(secs))
                    .map(Duration::from_secs)
                    .ok_or_else(|| {
                        ConfigError::Invalid(
                            "POOL_SCAN_INTERVAL_SECS must be an integer in [60, 86400]"
                                .to_string(),
                        )
                    })
            })
            .transpose()?;
        let pools = optional_trimmed(&lookup, "SYNC_POOLS")
            .map(|value| parse_pools(&value, scan_override))
            .transpose()?
            .unwrap_or_default();

        let pool_scan_initial_delay = Duration::from_secs(parse_in_range(
            &lookup,
            "POOL_SCAN_INITIAL_DELAY_SECS",
            30,
            0,
            3_600,
        )?);
        let pool_scan_stale_after = Duration::from_secs(parse_in_range(
            &lookup,
            "POOL_SCAN_STALE_SECS",
            6 * 3_600,
            600,
            7 * 86_400,
        )?);
        let max_retries = parse_in_range(&lookup, "SYNC_MAX_RETRIES", DEFAULT_MAX_RETRIES, 1, 100)?;
        let claim_lease = Duration::from_secs(parse_in_range(
            &lookup,
            "SYNC_CLAIM_LEASE_SECS",
            30 * 60,
            60,
            86_400,
        )?);
        let reaper_interval = Duration::from_secs(parse_in_range(
            &lookup,
            "SYNC_REAPER_INTERVAL_SECS",
            60,
            5,
            3_600,
        )?);

        Ok(Self {
            db_path,
            local_base_dir,
            media,
            pool,
            pools,
            pool_scan_initial_delay,
            pool_scan_stale_after,
            max_retries,
            claim_lease,
            reaper_interval,
            nas: parse_nas_config(&lookup)?,
            r2: parse_r2_config(&lookup)?,
        })
    }

    /// Instantiate the configured durable targets.
    pub fn build_targets(&self) -> Targets {
        let nas: Option<Arc<dyn ObjectStore>> = self.nas.as_ref().map(|nas| match nas {
            NasConfig::Directory(root) => {
                Arc::new(DirectoryStore::new(root.clone())) as Arc<dyn ObjectStore>
            }
            NasConfig::S3(config) => Arc::new(S3ObjectStore::new(config.clone())),
        });
        let r2: Option<Arc<dyn ObjectStore>> = self
            .r2
            .as_ref()
            .map(|config| Arc::new(S3ObjectStore::new(config.clone())) as Arc<dyn ObjectStore>);
        Targets { nas, r2 }
    }
}

/// Parse `name=/root/path,...` pool definitions.
fn parse_pools(value: &str, scan_override: Option<Duration>) -> Result<Vec<PoolConfig>, ConfigError> {
    let mut pools: Vec<PoolConfig> = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (name, root) = entry.split_once('=').ok_or_else(|| {
            ConfigError::Invalid(format!(
                "SYNC_POOLS entry `{entry}` must look like name=/absolute/path"
            ))
        })?;
        let name = name.trim();
        let root = root.trim();
        if name.is_empty() || !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_') {
            return Err(ConfigError::Invalid(format!(
                "SYNC_POOLS pool name `{name}` must be alphanumeric, '-' or '_'"
            )));
        }
        if root.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "SYNC_POOLS pool `{name}` has an empty path"
            )));
        }
        if pools.iter().any(|pool| pool.name == name) {
            return Err(ConfigError::Invalid(format!(
                "SYNC_POOLS lists pool `{name}` twice"
            )));
        }
        pools.push(PoolConfig {
            name: name.to_string(),
            root: PathBuf::from(root),
            scan_interval: scan_override.unwrap_or_else(|| default_scan_interval(name)),
        });
    }
    Ok(pools)
}

pub fn default_scan_interval(pool_name: &str) -> Duration {
    if FAST_SCAN_POOLS.contains(&pool_name) {
        FAST_SCAN_INTERVAL
    } else {
        DEFAULT_SCAN_INTERVAL
    }
}

fn parse_r2_config(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<S3TargetConfig>, ConfigError> {
    let account_id = optional_trimmed(&lookup, "R2_ACCOUNT_ID");
    let bucket = optional_trimmed(&lookup, "R2_BUCKET");
    let access_key_id = optional_trimmed(&lookup, "R2_ACCESS_KEY_ID");
    let secret_access_key = optional_trimmed(&lookup, "R2_SECRET_ACCESS_KEY");

    let any_set = account_id.is_some()
        || bucket.is_some()
        || access_key_id.is_some()
        || secret_access_key.is_some();
    if !any_set {
        return Ok(None);
    }

    let account_id = account_id.ok_or(ConfigError::MissingVar("R2_ACCOUNT_ID"))?;
    let bucket = bucket.ok_or(ConfigError::MissingVar("R2_BUCKET"))?;
    let access_key_id = access_key_id.ok_or(ConfigError::MissingVar("R2_ACCESS_KEY_ID"))?;
    let secret_access_key =
        secret_access_key.ok_or(ConfigError::MissingVar("R2_SECRET_ACCESS_KEY"))?;

    Ok(Some(S3TargetConfig::r2(
        &account_id,
        bucket,
        access_key_id,
        secret_access_key,
    )))
}

fn parse_nas_config(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<NasConfig>, ConfigError> {
    let dir = optional_trimmed(&lookup, "NAS_DIR");
    let endpoint = optional_trimmed(&lookup, "NAS_ENDPOINT");

    match (dir, endpoint) {
        (Some(_), Some(_)) => Err(ConfigError::Invalid(
            "Set either NAS_DIR or NAS_ENDPOINT, not both".to_string(),
        )),
        (Some(dir), None) => Ok(Some(NasConfig::Directory(PathBuf::from(dir)))),
        (None, Some(endpoint)) => {
            if !is_http_url(&endpoint) {
                return Err(ConfigError::Invalid(
                    "NAS_ENDPOINT must start with http:// or https://".to_string(),
                ));
            }
            Ok(Some(NasConfig::S3(S3TargetConfig {
                label: "nas".to_string(),
                endpoint_url: endpoint.trim_end_matches('/').to_string(),
                region: value_or_default(&lookup, "NAS_REGION", "us-east-1"),
                bucket: required_trimmed(&lookup, "NAS_BUCKET")?,
                access_key_id: required_trimmed(&lookup, "NAS_ACCESS_KEY_ID")?,
                secret_access_key: required_trimmed(&lookup, "NAS_SECRET_ACCESS_KEY")?,
            })))
        }
        (None, None) => Ok(None),
    }
}

fn parse_in_range<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    min: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + fmt::Display + Copy,
{
    let Some(value) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    value
        .parse::<T>()
        .ok()
        .filter(|parsed| (min..=max).contains(parsed))
        .ok_or_else(|| {
            ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"))
        })
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}
