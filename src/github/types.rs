// GitHub API response types.
// Raw provider shapes and the normalized structures handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public GitHub user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: String,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    /// Personal site.
    pub blog: Option<String>,
    pub twitter_username: Option<String>,
    pub public_repos: u64,
    pub public_gists: u64,
    pub followers: u64,
    pub following: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub html_url: String,
}

/// Repository as listed by the provider. Only used for filtering.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRepository {
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    #[serde(default)]
    pub fork: bool,
}

/// Repository with its most recent commits, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    #[serde(default)]
    pub commits: Vec<Commit>,
}

impl Repository {
    pub fn from_raw(raw: RawRepository, commits: Vec<Commit>) -> Self {
        Self {
            name: raw.name,
            full_name: raw.full_name,
            html_url: raw.html_url,
            commits,
        }
    }
}

/// Git identity attached to a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub date: DateTime<Utc>,
}

/// Normalized commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

/// Commit record as returned by the commits endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCommit {
    pub sha: String,
    pub commit: RawCommitDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCommitDetail {
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl From<RawCommit> for Commit {
    fn from(raw: RawCommit) -> Self {
        Self {
            sha: raw.sha,
            author: raw.commit.author,
            committer: raw.commit.committer,
            message: raw.commit.message,
        }
    }
}

/// Per-repository commit fetch that was downgraded to an empty list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitFailure {
    pub repository: String,
    pub reason: String,
}

/// Result of aggregating a user's repositories.
///
/// Every original repository is present; those whose commits could not be
/// fetched carry an empty commit list and an entry in `failures`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryBatch {
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub failures: Vec<CommitFailure>,
}

impl RepositoryBatch {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Rate limit information from response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub remaining: u64,
    /// When the quota window resets, in epoch milliseconds.
    pub reset_epoch_ms: i64,
}

impl RateLimit {
    /// Quota below which callers should warn the user.
    pub const LOW_WATERMARK: u64 = 10;

    /// Quota is low and its window has not reset yet at `now_ms`.
    pub fn is_low_at(&self, now_ms: i64) -> bool {
        self.remaining < Self::LOW_WATERMARK && self.reset_epoch_ms > now_ms
    }

    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.reset_epoch_ms)
    }
}
