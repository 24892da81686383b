use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] coldsync_core::Error),
    #[error(transparent)]
    Config(#[from] coldsync_core::config::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("No durable target configured. Set NAS_DIR/NAS_ENDPOINT or the R2_* variables.")]
    NoTargets,
}
