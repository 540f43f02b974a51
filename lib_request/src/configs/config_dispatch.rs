//! # Dispatcher Configuration
//!
//! Loads the options a dispatcher and its HTTP transport are built from.
//! Sources are layered, each overriding the previous one for the fields it
//! sets:
//!
//! 1. built-in defaults,
//! 2. an optional JSON file,
//! 3. `DISPATCH_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Default number of re-submissions when retries are on.
pub const DEFAULT_MAX_RETRY: u32 = 1;
/// Default transport timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
/// Default transport base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost/";

const ENV_RETRY: &str = "DISPATCH_RETRY";
const ENV_MAX_RETRY: &str = "DISPATCH_MAX_RETRY";
const ENV_BASE_URL: &str = "DISPATCH_BASE_URL";
const ENV_TIMEOUT_MS: &str = "DISPATCH_TIMEOUT_MS";
const ENV_AUTH_TOKEN: &str = "DISPATCH_AUTH_TOKEN";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`DispatchConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// An environment variable holds a value of the wrong shape.
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Options recognized by the dispatcher and `ApiClient`.
///
/// Every field is optional so that partial sources can be merged.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Whether failed requests are retried.
    pub retry: Option<bool>,
    /// Re-submissions allowed after the first attempt.
    pub max_retry: Option<u32>,
    /// Base URL relative request paths are joined onto.
    pub base_url: Option<String>,
    /// Transport timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
}

impl DispatchConfig {
    /// The built-in defaults: retries off, one retry when enabled, 5 s timeout.
    pub fn defaults() -> Self {
        Self {
            retry: Some(false),
            max_retry: Some(DEFAULT_MAX_RETRY),
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            timeout_ms: Some(DEFAULT_TIMEOUT_MS),
            auth_token: None,
        }
    }

    /// Merges two configs, where `other` overrides `self` for `Some` values.
    pub fn merge(self, other: DispatchConfig) -> DispatchConfig {
        DispatchConfig {
            retry: other.retry.or(self.retry),
            max_retry: other.max_retry.or(self.max_retry),
            base_url: other.base_url.or(self.base_url),
            timeout_ms: other.timeout_ms.or(self.timeout_ms),
            auth_token: other.auth_token.or(self.auth_token),
        }
    }

    /// Reads a JSON config file.
    ///
    /// # Errors
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// if it is not a valid config.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads the `DISPATCH_*` environment variables.
    ///
    /// # Errors
    /// [`ConfigError::InvalidEnv`] if a numeric or boolean variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`DispatchConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            retry: lookup(ENV_RETRY).map(|v| parse_bool(ENV_RETRY, v)).transpose()?,
            max_retry: lookup(ENV_MAX_RETRY)
                .map(|v| parse_number(ENV_MAX_RETRY, v))
                .transpose()?,
            base_url: lookup(ENV_BASE_URL),
            timeout_ms: lookup(ENV_TIMEOUT_MS)
                .map(|v| parse_number(ENV_TIMEOUT_MS, v))
                .transpose()?,
            auth_token: lookup(ENV_AUTH_TOKEN),
        })
    }
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { name, value }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

/// Loads the effective configuration: defaults, then `path` if it exists,
/// then the environment.
///
/// # Errors
/// Propagates read and parse failures of an existing file and malformed
/// environment values. A missing file is not an error.
pub fn load_config(path: Option<&Path>) -> Result<DispatchConfig, ConfigError> {
    let mut config = DispatchConfig::defaults();

    if let Some(path) = path {
        if path.exists() {
            config = config.merge(DispatchConfig::from_file(path)?);
            debug!(path = %path.display(), "loaded dispatch config file");
        } else {
            info!(
                path = %path.display(),
                "config file not found, using defaults and environment"
            );
        }
    }

    Ok(config.merge(DispatchConfig::from_env()?))
}
