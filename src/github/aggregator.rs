// Profile and repository aggregation.
// Sequences profile, repository list, and per-repository commit fetches with cache-first reads.

use std::sync::Arc;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStore, KeyValueStore, commits_key, repos_key, user_key};
use crate::config::Config;
use crate::error::{GitPeekError, Result};
use crate::pacing::Pacer;
use crate::proxy::{ProxyPool, ResilientFetcher, SharedPool};

use super::endpoints;
use super::types::{
    Commit, CommitFailure, Profile, RateLimit, RawCommit, RawRepository, Repository,
    RepositoryBatch,
};

/// Fetches a user's profile and original repositories with recent commits.
///
/// One aggregator serves any number of sequential or concurrent calls; the
/// proxy pool it owns is shared between them.
pub struct Aggregator {
    fetcher: ResilientFetcher,
    cache: CacheStore,
    pacer: Pacer,
    api_base: String,
    commits_per_repo: u32,
    shutdown: CancellationToken,
}

impl Aggregator {
    pub fn new(config: &Config, pool: SharedPool, cache: CacheStore) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            fetcher: ResilientFetcher::new(pool, config)?,
            cache,
            pacer: Pacer::from_config(config),
            api_base: config.api_base.clone(),
            commits_per_repo: config.commits_per_repo,
            shutdown: CancellationToken::new(),
        })
    }

    /// Build the pool and cache described by `config` over `kv`.
    pub fn from_config(config: &Config, kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        let pool = SharedPool::new(ProxyPool::new(config.proxies.iter().cloned())?);
        let cache = CacheStore::new(kv, config.cache_ttl());
        Self::new(config, pool, cache)
    }

    /// Token that aborts every current and future call on this aggregator.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Token for a single call. Cancelling it aborts only the calls it was
    /// passed to; it is also cancelled by [`Aggregator::shutdown_token`].
    pub fn call_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn pool(&self) -> &SharedPool {
        self.fetcher.pool()
    }

    /// Put every intermediary back in service.
    pub fn reset_pool(&self) {
        tracing::info!("Resetting proxy pool health");
        self.pool().with(|p| p.reset());
    }

    /// Last persisted provider quota.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.cache.rate_limit()
    }

    /// Get a user's profile, from cache when fresh.
    pub async fn fetch_profile(&self, username: &str) -> Result<Profile> {
        self.fetch_profile_with(username, &self.call_token()).await
    }

    /// [`Aggregator::fetch_profile`] aborted by `cancel`, usually from [`Aggregator::call_token`].
    pub async fn fetch_profile_with(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<Profile> {
        let username = validate_username(username)?;
        let key = user_key(username);
        if let Some(profile) = self.cache.get::<Profile>(&key) {
            return Ok(profile);
        }

        let response = self
            .get(&endpoints::user_url(&self.api_base, username), cancel)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(GitPeekError::UserNotFound(username.to_string())),
            status if !status.is_success() => return Err(GitPeekError::FetchFailed(status)),
            _ => {}
        }

        let body = read_json(response).await?;
        if !body.is_object() {
            return Err(GitPeekError::MalformedResponse(
                "profile is not an object".into(),
            ));
        }
        let profile: Profile = decode(body, "profile")?;

        self.cache.set(&key, &profile);
        Ok(profile)
    }

    /// Get a user's original repositories, each with its most recent commits.
    ///
    /// Forks are dropped. Commits are fetched one repository at a time; a
    /// repository whose commits cannot be fetched is kept with an empty list
    /// and reported in [`RepositoryBatch::failures`].
    pub async fn fetch_repositories(&self, username: &str) -> Result<RepositoryBatch> {
        self.fetch_repositories_with(username, &self.call_token()).await
    }

    /// [`Aggregator::fetch_repositories`] aborted by `cancel`, usually from [`Aggregator::call_token`].
    pub async fn fetch_repositories_with(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<RepositoryBatch> {
        let username = validate_username(username)?;
        let key = repos_key(username);
        if let Some(batch) = self.cache.get::<RepositoryBatch>(&key) {
            return Ok(batch);
        }

        let response = self
            .get(&endpoints::repos_url(&self.api_base, username), cancel)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GitPeekError::FetchFailed(status));
        }

        let body = read_json(response).await?;
        if !body.is_array() {
            return Err(GitPeekError::MalformedResponse(
                "repository list is not an array".into(),
            ));
        }
        let raw: Vec<RawRepository> = decode(body, "repository list")?;
        let originals: Vec<RawRepository> = raw.into_iter().filter(|r| !r.fork).collect();

        tracing::info!(
            username,
            repositories = originals.len(),
            "Fetching commits for original repositories"
        );

        let mut batch = RepositoryBatch::default();
        for repo in originals {
            let commits = match self.fetch_commits(username, &repo.name, cancel).await {
                Ok(commits) => commits,
                Err(GitPeekError::Cancelled) => return Err(GitPeekError::Cancelled),
                Err(e) => {
                    tracing::error!(
                        username,
                        repository = %repo.name,
                        error = %e,
                        "Failed to fetch commits, continuing without them"
                    );
                    batch.failures.push(CommitFailure {
                        repository: repo.name.clone(),
                        reason: e.to_string(),
                    });
                    Vec::new()
                }
            };
            batch.repositories.push(Repository::from_raw(repo, commits));
        }

        if !batch.is_complete() {
            tracing::warn!(
                username,
                failed = batch.failures.len(),
                total = batch.repositories.len(),
                "Repository aggregation finished with partial failures"
            );
        }

        self.cache.set(&key, &batch);
        Ok(batch)
    }

    /// Most recent commits of one repository, from cache when fresh.
    async fn fetch_commits(
        &self,
        username: &str,
        repo: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Commit>> {
        let key = commits_key(username, repo);
        if let Some(commits) = self.cache.get::<Vec<Commit>>(&key) {
            return Ok(commits);
        }

        self.pacer
            .acquire(self.fetcher.rate_limit(), cancel)
            .await?;

        let url = endpoints::commits_url(&self.api_base, username, repo, self.commits_per_repo);
        let response = self.get(&url, cancel).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GitPeekError::FetchFailed(status));
        }

        let body = read_json(response).await?;
        if !body.is_array() {
            return Err(GitPeekError::MalformedResponse(
                "commit list is not an array".into(),
            ));
        }
        let raw: Vec<RawCommit> = decode(body, "commit list")?;
        let commits: Vec<Commit> = raw
            .into_iter()
            .take(self.commits_per_repo as usize)
            .map(Commit::from)
            .collect();

        self.cache.set(&key, &commits);
        Ok(commits)
    }

    /// Fetch through the pool and persist any quota the response reported.
    async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<Response> {
        let result = self.fetcher.fetch(url, cancel).await;
        if let Some(rate_limit) = self.fetcher.rate_limit() {
            self.cache.record_rate_limit(&rate_limit);
        }
        result
    }
}

/// Usernames are embedded in URL paths, so reject anything that would change the path.
fn validate_username(username: &str) -> Result<&str> {
    let trimmed = username.trim();
    let valid = !trimmed.is_empty()
        && !trimmed
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '%'));
    if valid {
        Ok(trimmed)
    } else {
        Err(GitPeekError::InvalidUsername(username.to_string()))
    }
}

async fn read_json(response: Response) -> Result<Value> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| GitPeekError::MalformedResponse(e.to_string()))
}

fn decode<T: DeserializeOwned>(body: Value, what: &str) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| GitPeekError::MalformedResponse(format!("{}: {}", what, e)))
}
