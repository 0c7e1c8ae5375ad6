// Cache store for reading and writing cached data.
// Handles JSON serialization and TTL checking over a key-value substrate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{GitPeekError, Result};
use crate::github::RateLimit;

use super::kv::KeyValueStore;

/// Default TTL for provider responses: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Well-known key for the last observed provider quota.
pub const RATE_LIMIT_KEY: &str = "rate_limit";

pub fn user_key(username: &str) -> String {
    format!("user:{}", username)
}

pub fn repos_key(username: &str) -> String {
    format!("repos:{}", username)
}

pub fn commits_key(username: &str, repo: &str) -> String {
    format!("commits:{}:{}", username, repo)
}

/// Wrapper for cached data with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    /// The cached data.
    pub data: T,
    /// When the data was cached, in epoch milliseconds.
    pub cached_at_ms: i64,
}

impl<T> CachedData<T> {
    /// Create a new cached data entry stamped with the current time.
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Check if this cached data has expired based on TTL.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let elapsed_ms = Utc::now().timestamp_millis().saturating_sub(self.cached_at_ms);
        elapsed_ms > i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
    }
}

/// TTL cache over a [`KeyValueStore`].
///
/// Reads never fail: missing, expired and unreadable entries all read as
/// absent. Writes are best effort and only logged on failure.
#[derive(Clone)]
pub struct CacheStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Read a fresh entry, purging it if it has expired.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.kv.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_slice::<CachedData<T>>(&bytes) {
            Ok(cached) if !cached.is_expired(self.ttl) => {
                tracing::debug!(key, "Cache hit");
                Some(cached.data)
            }
            Ok(_) => {
                tracing::debug!(key, "Cache entry expired");
                self.purge(key);
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding unreadable cache entry");
                self.purge(key);
                None
            }
        }
    }

    /// Store `data` under `key`. Failures are logged and swallowed.
    pub fn set<T: Serialize>(&self, key: &str, data: &T) {
        if let Err(e) = self.try_set(key, data) {
            tracing::warn!(error = %e, "Caching skipped");
        }
    }

    fn try_set<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let cache_write = |reason: String| GitPeekError::CacheWrite {
            key: key.to_string(),
            reason,
        };
        let json = serde_json::to_vec(&CachedData::new(data)).map_err(|e| cache_write(e.to_string()))?;
        self.kv.set(key, &json).map_err(|e| cache_write(e.to_string()))
    }

    /// Persist the latest quota snapshot. It is not subject to the TTL.
    pub fn record_rate_limit(&self, rate_limit: &RateLimit) {
        let result = serde_json::to_vec(rate_limit)
            .map_err(GitPeekError::from)
            .and_then(|json| self.kv.set(RATE_LIMIT_KEY, &json));
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist rate limit");
        }
    }

    /// Last persisted quota snapshot, if any.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        let bytes = self.kv.get(RATE_LIMIT_KEY).ok().flatten()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn purge(&self, key: &str) {
        if let Err(e) = self.kv.delete(key) {
            tracing::warn!(key, error = %e, "Failed to purge cache entry");
        }
    }
}
