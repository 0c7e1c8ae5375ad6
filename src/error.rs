// Error types for gitpeek.
// Covers provider lookups, proxy failover, cache and configuration errors.

use reqwest::StatusCode;
use thiserror::Error;

/// What the last attempt of a failed fetch observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastFailure {
    /// The intermediary answered with a non-success status.
    Status(StatusCode),
    /// The intermediary could not be reached.
    Transport(String),
}

impl std::fmt::Display for LastFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LastFailure::Status(status) => write!(f, "HTTP {}", status),
            LastFailure::Transport(reason) => write!(f, "transport error: {}", reason),
        }
    }
}

#[derive(Error, Debug)]
pub enum GitPeekError {
    #[error("HTTP client error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),

    #[error("Rate limit exhausted on all {attempts} proxies")]
    RateLimitExhausted { attempts: usize },

    #[error("All {attempts} proxies failed, last: {last}")]
    AllProxiesFailed { attempts: usize, last: LastFailure },

    #[error("Request failed with HTTP {0}")]
    FetchFailed(StatusCode),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Cache write failed for {key}: {reason}")]
    CacheWrite { key: String, reason: String },

    #[error("Proxy pool must contain at least one intermediary")]
    EmptyPool,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitPeekError>;
