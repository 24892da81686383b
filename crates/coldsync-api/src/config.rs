use std::collections::HashMap;
use std::env;
use std::fmt;

use coldsync_core::config::{ColdsyncConfig, ConfigError};

const MIN_ADMIN_TOKEN_LEN: usize = 16;

#[derive(Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// Bearer token required on `/v1` routes when set.
    pub admin_token: Option<String>,
    pub sync: ColdsyncConfig,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field(
                "admin_token",
                &self.admin_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("sync", &self.sync)
            .finish()
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = lookup("COLDSYNC_API_BIND_ADDR")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "127.0.0.1:8080".to_string());

        let admin_token = lookup("COLDSYNC_ADMIN_TOKEN")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        if admin_token
            .as_ref()
            .is_some_and(|token| token.len() < MIN_ADMIN_TOKEN_LEN)
        {
            return Err(ConfigError::Invalid(format!(
                "COLDSYNC_ADMIN_TOKEN must be at least {MIN_ADMIN_TOKEN_LEN} characters"
            )));
        }

        let sync = ColdsyncConfig::from_lookup(&lookup)?;

        Ok(Self {
            bind_addr,
            admin_token,
            sync,
        })
    }
}
