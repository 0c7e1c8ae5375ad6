// Runtime configuration.
// Loaded from config.toml in the platform config directory, with env overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{GitPeekError, Result};

/// Public CORS-style forwarding proxies tried in order.
pub const DEFAULT_PROXIES: &[&str] = &[
    "https://thingproxy.freeboard.io/fetch/",
    "https://api.allorigins.win/raw?url=",
    "https://cors-anywhere.herokuapp.com/",
];

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const PROXIES_ENV: &str = "GITPEEK_PROXIES";
const API_BASE_ENV: &str = "GITPEEK_API_BASE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Provider API root, without trailing slash.
    pub api_base: String,
    /// Intermediary base addresses; the encoded target is appended verbatim.
    pub proxies: Vec<String>,
    pub cache_ttl_secs: u64,
    /// Fixed wait between failover attempts.
    pub retry_backoff_ms: u64,
    /// Minimum spacing between commit requests.
    pub pacing_interval_ms: u64,
    /// Upper bound for quota-stretched pacing.
    pub max_pacing_ms: u64,
    pub commits_per_repo: u32,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            proxies: DEFAULT_PROXIES.iter().map(|p| p.to_string()).collect(),
            cache_ttl_secs: 5 * 60,
            retry_backoff_ms: 1000,
            pacing_interval_ms: 500,
            max_pacing_ms: 60_000,
            commits_per_repo: 10,
            request_timeout_secs: 30,
            user_agent: concat!("gitpeek/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location if it exists.
    /// Missing files fall back to defaults; environment overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);

        let mut config = match path {
            Some(ref p) if p.exists() => Self::from_toml(&fs::read_to_string(p)?)?,
            _ => Self::default(),
        };

        config.apply_overrides(
            std::env::var(PROXIES_ENV).ok().as_deref(),
            std::env::var(API_BASE_ENV).ok().as_deref(),
        );
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn apply_overrides(&mut self, proxies: Option<&str>, api_base: Option<&str>) {
        if let Some(list) = proxies {
            let parsed: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            if !parsed.is_empty() {
                self.proxies = parsed;
            }
        }
        if let Some(base) = api_base.map(str::trim).filter(|b| !b.is_empty()) {
            self.api_base = base.to_string();
        }
    }

    /// Reject configurations the fetch layer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.proxies.is_empty() {
            return Err(GitPeekError::Config("at least one proxy is required".into()));
        }
        if self.commits_per_repo == 0 {
            return Err(GitPeekError::Config("commits_per_repo must be positive".into()));
        }
        if url::Url::parse(&self.api_base).is_err() {
            return Err(GitPeekError::Config(format!(
                "api_base is not a valid URL: {}",
                self.api_base
            )));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }

    pub fn max_pacing(&self) -> Duration {
        Duration::from_millis(self.max_pacing_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Path to the default config file (~/.config/gitpeek/config.toml on Linux).
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "gitpeek").map(|dirs| dirs.config_dir().join("config.toml"))
}
