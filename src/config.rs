//! Runtime configuration.
//!
//! [`AppConfig`] is read from environment variables (after `.env` has been
//! loaded by the binary) once at start-up and handed to whatever needs it.
//! API tokens live separately in a [`CredentialsDocument`], a small JSON file
//! keyed by provider name:
//!
//! ```json
//! { "github": { "token": "ghp_..." }, "travis": { "token": "..." } }
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::aggregate::parse_weekday;
use crate::providers::{github, travis};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Holds `config.json` with API tokens.
    pub config_dir: PathBuf,
    /// Holds the per-provider `*_stats.db` files.
    pub data_dir: PathBuf,
    pub github_api_url: String,
    pub travis_api_url: String,
    pub http_timeout: Duration,
    /// Weekday every reported week ends on.
    pub week_anchor: Weekday,
    /// Override rules file; the built-in rules are used when unset.
    pub overrides_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CODE_STATS_DIR` (default: ~/.code_stats)
    /// - `CODE_STATS_DATA_DIR` (default: data)
    /// - `GITHUB_API_URL` (default: https://api.github.com)
    /// - `TRAVIS_API_URL` (default: https://api.travis-ci.com)
    /// - `HTTP_TIMEOUT_SECS` (default: 10)
    /// - `WEEK_ANCHOR` (default: fri)
    /// - `CODE_STATS_OVERRIDES` (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] with an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config_dir = var("CODE_STATS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| ".".to_string());
                Path::new(&home).join(".code_stats")
            });

        let week_anchor = match var("WEEK_ANCHOR") {
            Some(value) => parse_weekday(&value).map_err(|_| ConfigError::InvalidValue {
                key: "WEEK_ANCHOR",
                value,
            })?,
            None => Weekday::Fri,
        };

        Ok(Self {
            config_dir,
            data_dir: var("CODE_STATS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            github_api_url: var("GITHUB_API_URL")
                .unwrap_or_else(|| github::DEFAULT_API_URL.to_string()),
            travis_api_url: var("TRAVIS_API_URL")
                .unwrap_or_else(|| travis::DEFAULT_API_URL.to_string()),
            http_timeout: Duration::from_secs(
                var("HTTP_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            week_anchor,
            overrides_path: var("CODE_STATS_OVERRIDES").map(PathBuf::from),
        })
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub token: Option<String>,
    /// Anything else stored for the provider, kept on save.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// On-disk API credentials, keyed by provider short name.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialsDocument {
    path: PathBuf,
    providers: BTreeMap<String, ProviderCredentials>,
}

impl CredentialsDocument {
    /// Read `path`, first writing an empty document if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            std::fs::write(&path, "{}").map_err(io_err)?;
            log::info!("📝 Created empty credentials file at {}", path.display());
        }

        let json = std::fs::read_to_string(&path).map_err(io_err)?;
        let providers = serde_json::from_str(&json).map_err(|source| ConfigError::Json {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, providers })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self, provider: &str) -> Option<&str> {
        self.providers.get(provider)?.token.as_deref()
    }

    pub fn set_token(&mut self, provider: &str, token: impl Into<String>) {
        self.providers.entry(provider.to_string()).or_default().token = Some(token.into());
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(&self.providers).map_err(|source| {
            ConfigError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        std::fs::write(&self.path, json).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
