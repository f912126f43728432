use std::env;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use directories::ProjectDirs;
use thiserror::Error;
use url::Url;

use crate::http::EndpointRegistry;

pub const ENV_API_URL: &str = "AUTHKIT_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "AUTHKIT_TIMEOUT_SECS";
pub const ENV_RENEWAL_HORIZON_SECS: &str = "AUTHKIT_RENEWAL_HORIZON_SECS";
pub const ENV_RENEWAL_INTERVAL_SECS: &str = "AUTHKIT_RENEWAL_INTERVAL_SECS";

const DEFAULT_USER_AGENT: &str = "authkit/0.1.0";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RENEWAL_HORIZON_SECS: i64 = 5 * 60;
const DEFAULT_RENEWAL_INTERVAL_SECS: u64 = 5 * 60;

/// Settings shared by the request dispatcher, the renewal coordinator and the session lifecycle.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root every endpoint path is joined onto. Always ends with `/`.
    pub base_url: Url,
    pub user_agent: String,
    pub timeout: StdDuration,
    /// Access tokens expiring within this window are renewed before use.
    pub renewal_horizon: Duration,
    /// Period of the background renewal check while authenticated.
    pub renewal_interval: StdDuration,
    pub endpoints: EndpointRegistry,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: StdDuration::from_secs(DEFAULT_TIMEOUT_SECS),
            renewal_horizon: Duration::seconds(DEFAULT_RENEWAL_HORIZON_SECS),
            renewal_interval: StdDuration::from_secs(DEFAULT_RENEWAL_INTERVAL_SECS),
            endpoints: EndpointRegistry::default(),
        })
    }

    /// Build a configuration from `AUTHKIT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from any variable source keyed like the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_API_URL).ok_or(ConfigError::MissingVar(ENV_API_URL))?;
        let mut config = Self::new(&base_url)?;

        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            config.timeout = positive_seconds(ENV_TIMEOUT_SECS, value)?;
        }
        if let Some(value) = lookup(ENV_RENEWAL_HORIZON_SECS) {
            config.renewal_horizon = horizon_seconds(ENV_RENEWAL_HORIZON_SECS, value)?;
        }
        if let Some(value) = lookup(ENV_RENEWAL_INTERVAL_SECS) {
            config.renewal_interval = positive_seconds(ENV_RENEWAL_INTERVAL_SECS, value)?;
        }
        Ok(config)
    }

    pub fn with_renewal_horizon(mut self, horizon: Duration) -> Self {
        self.renewal_horizon = horizon;
        self
    }

    pub fn with_renewal_interval(mut self, interval: StdDuration) -> Self {
        self.renewal_interval = interval;
        self
    }

    pub fn with_endpoints(mut self, endpoints: EndpointRegistry) -> Self {
        self.endpoints = endpoints;
        self
    }
}

fn normalize_base_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_owned()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).map_err(|source| ConfigError::InvalidUrl {
        value: raw.to_owned(),
        source,
    })
}

// Zero would make every request time out, or stall the renewal ticker.
fn positive_seconds(name: &'static str, value: String) -> Result<StdDuration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(StdDuration::from_secs(secs)),
        _ => Err(ConfigError::InvalidNumber { name, value }),
    }
}

fn horizon_seconds(name: &'static str, value: String) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs >= 0)
        .and_then(Duration::try_seconds)
        .ok_or(ConfigError::InvalidNumber { name, value })
}

/// Resolves where per-user files such as stored tokens live.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Use the platform config directory, created on first use and readable by the owner only.
    pub fn new() -> Result<Self, ConfigError> {
        let root = ProjectDirs::from("app", "authkit", "authkit")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::MissingProjectDirs)?;
        ensure_private_dir(&root)?;
        Ok(Self { root })
    }

    /// Use an explicit directory instead of the platform default.
    pub fn from_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the token file for the given profile.
    pub fn credentials_file(&self, profile: &str) -> PathBuf {
        self.root.join(format!("tokens-{profile}.json"))
    }
}

fn ensure_private_dir(dir: &Path) -> Result<(), ConfigError> {
    if !dir.is_dir() {
        fs::create_dir_all(dir).map_err(ConfigError::CreateDir)?;
    }
    #[cfg(unix)]
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

/// Errors that can occur while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for authkit")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),
    #[error("{name} must be a whole number of seconds within range, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
    #[error("invalid API base URL '{value}': {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}
