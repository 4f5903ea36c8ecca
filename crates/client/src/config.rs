//! Client configuration.
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file
//! (`~/.config/kosha/config.toml` by default), `KOSHA_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::KoshaError;
use crate::retry::RetryPolicy;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const ENV_API_URL: &str = "KOSHA_API_URL";
pub const ENV_API_KEY: &str = "KOSHA_API_KEY";
pub const ENV_BATCH_SIZE: &str = "KOSHA_BATCH_SIZE";
pub const ENV_MAX_RETRIES: &str = "KOSHA_MAX_RETRIES";
pub const ENV_TIMEOUT: &str = "KOSHA_TIMEOUT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the Kosha API, without trailing slash.
    pub api_url: String,
    /// Sent as a bearer token when set.
    pub api_key: Option<String>,
    /// Transactions per batch request. Capped at [`crate::batch::MAX_BATCH_SIZE`].
    pub batch_size: usize,
    pub max_retries: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: crate::retry::DEFAULT_MAX_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self { api_url: api_url.into(), ..Self::default() }.normalized()
    }

    pub fn from_toml(s: &str) -> Result<Self, KoshaError> {
        let config: Self = toml::from_str(s).map_err(|e| KoshaError::Config(e.to_string()))?;
        Ok(config.normalized())
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self, KoshaError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| KoshaError::Io(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    /// Defaults overlaid with `KOSHA_*` environment variables.
    pub fn from_env() -> Result<Self, KoshaError> {
        Self::default().with_env()
    }

    /// Overlay `KOSHA_*` environment variables onto this config.
    pub fn with_env(self) -> Result<Self, KoshaError> {
        self.with_vars(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup` (keyed by the `KOSHA_*` names).
    /// Blank values are ignored.
    pub fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, KoshaError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(key) = get(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(v) = get(ENV_BATCH_SIZE) {
            self.batch_size = parse_var(ENV_BATCH_SIZE, &v)?;
        }
        if let Some(v) = get(ENV_MAX_RETRIES) {
            self.max_retries = parse_var(ENV_MAX_RETRIES, &v)?;
        }
        if let Some(v) = get(ENV_TIMEOUT) {
            self.timeout_secs = parse_var(ENV_TIMEOUT, &v)?;
        }
        Ok(self.normalized())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }

    fn normalized(mut self) -> Self {
        let trimmed = self.api_url.trim().trim_end_matches('/').to_string();
        self.api_url = trimmed;
        if self.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            self.api_key = None;
        }
        self
    }
}

/// Default location of the config file, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|c| c.join("kosha/config.toml"))
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, KoshaError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| KoshaError::Config(format!("{key}={value:?}: {e}")))
}
