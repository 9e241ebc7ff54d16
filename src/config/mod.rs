use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use crate::errors::{AppError, AppResult};
use crate::models::RefreshPolicy;
use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub avatar_cache: AvatarCacheConfig,
}

/// Lookup service behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    /// ISO 3166 alpha-2 region used to canonicalize national numbers
    #[serde(default = "default_region")]
    pub region: String,
    /// Whether a cache hit still triggers a remote refresh
    #[serde(default)]
    pub refresh_policy: RefreshPolicy,
    /// Upper bound on concurrent provider requests, unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fetch_workers: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Records loaded from a local TOML file
    Directory,
    /// Remote JSON API
    Http,
}

/// Phone lookup provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,
    /// Display name reported to callers
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(default = "default_directory_file")]
    pub directory_file: PathBuf,
    /// Artificial delay applied by the directory provider
    #[serde(default = "default_simulated_latency", with = "duration_serde::duration")]
    pub simulated_latency: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout", with = "duration_serde::duration")]
    pub request_timeout: Duration,
    #[serde(default = "default_true")]
    pub spam_reporting: bool,
}

/// Avatar image cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarCacheConfig {
    /// Capacity of the strongly held recently-used tier
    #[serde(default = "default_hot_capacity")]
    pub hot_capacity: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fetch_workers: Option<usize>,
    /// Download and decode on a full miss instead of reporting no image
    #[serde(default = "default_fetch_remote")]
    pub fetch_remote: bool,
    #[serde(default = "default_request_timeout", with = "duration_serde::duration")]
    pub request_timeout: Duration,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}
fn default_provider_kind() -> ProviderKind {
    ProviderKind::Directory
}
fn default_provider_name() -> String {
    DEFAULT_PROVIDER_NAME.to_string()
}
fn default_directory_file() -> PathBuf {
    PathBuf::from(DEFAULT_DIRECTORY_FILE)
}
fn default_simulated_latency() -> Duration {
    Duration::from_millis(DEFAULT_SIMULATED_LATENCY_MS)
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
}
fn default_true() -> bool {
    true
}
fn default_hot_capacity() -> usize {
    DEFAULT_HOT_CAPACITY
}
fn default_fetch_remote() -> bool {
    DEFAULT_FETCH_REMOTE
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            refresh_policy: RefreshPolicy::default(),
            max_fetch_workers: None,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            name: default_provider_name(),
            directory_file: default_directory_file(),
            simulated_latency: default_simulated_latency(),
            base_url: None,
            request_timeout: default_request_timeout(),
            spam_reporting: true,
        }
    }
}

impl Default for AvatarCacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity: default_hot_capacity(),
            max_fetch_workers: None,
            fetch_remote: default_fetch_remote(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Config {
    pub fn load() -> AppResult<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from_file(&config_file)
    }

    pub fn load_from_file(config_file: &str) -> AppResult<Self> {
        let config = if std::path::Path::new(config_file).exists() {
            let contents = std::fs::read_to_string(config_file)?;
            toml::from_str(&contents).map_err(|e| {
                AppError::configuration(format!("Failed to parse {config_file}: {e}"))
            })?
        } else {
            let default_config = Self::default();
            let contents = default_config.to_toml()?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
            default_config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::configuration(format!("Failed to serialize config: {e}")))
    }

    /// Reject values that would leave a component unusable
    pub fn validate(&self) -> AppResult<()> {
        let region = self.lookup.region.trim();
        if region.len() != 2 || !region.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AppError::configuration(format!(
                "lookup.region must be an ISO 3166 alpha-2 code, got '{}'",
                self.lookup.region
            )));
        }
        if self.lookup.max_fetch_workers == Some(0) {
            return Err(AppError::configuration(
                "lookup.max_fetch_workers must be at least 1 when set",
            ));
        }
        if self.avatar_cache.hot_capacity == 0 {
            return Err(AppError::configuration(
                "avatar_cache.hot_capacity must be at least 1",
            ));
        }
        if self.avatar_cache.max_fetch_workers == Some(0) {
            return Err(AppError::configuration(
                "avatar_cache.max_fetch_workers must be at least 1 when set",
            ));
        }
        if self.provider.kind == ProviderKind::Http {
            match self.provider.base_url.as_deref() {
                Some(base) => {
                    url::Url::parse(base).map_err(|e| {
                        AppError::configuration(format!("provider.base_url '{base}': {e}"))
                    })?;
                }
                None => {
                    return Err(AppError::configuration(
                        "provider.base_url is required for the http provider",
                    ));
                }
            }
        }
        Ok(())
    }
}
