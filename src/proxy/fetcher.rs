// Resilient fetcher.
// Performs one logical GET through the proxy pool with failover, backoff, and quota tracking.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::{
    Client, Response, StatusCode,
    header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT},
};
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use crate::config::Config;
use crate::error::{GitPeekError, LastFailure, Result};
use crate::github::RateLimit;

use super::pool::{Intermediary, SharedPool};

/// Fetches provider URLs through a rotating pool of intermediaries.
pub struct ResilientFetcher {
    client: Client,
    pool: SharedPool,
    backoff: Duration,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl ResilientFetcher {
    /// Create a fetcher with an HTTP client configured from `config`.
    pub fn new(pool: SharedPool, config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| GitPeekError::Config(e.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(GitPeekError::Api)?;

        Ok(Self::with_client(client, pool, config.retry_backoff()))
    }

    pub fn with_client(client: Client, pool: SharedPool, backoff: Duration) -> Self {
        Self {
            client,
            pool,
            backoff,
            rate_limit: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    /// Most recent quota reported by any response.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        *self.rate_limit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// GET `target` through the pool.
    ///
    /// The first attempt goes through the current intermediary and each
    /// retry through the next one after it, counted from where this call
    /// started. Concurrent calls moving the shared rotation index cannot make
    /// one call visit an intermediary twice. Successful responses and
    /// provider verdicts (see [`is_provider_verdict`]) are returned as-is.
    pub async fn fetch(&self, target: &str, cancel: &CancellationToken) -> Result<Response> {
        let (max_attempts, start) = self.pool.with(|p| (p.len(), p.current_index()));

        if self.pool.with(|p| p.find_available()).is_none() {
            tracing::warn!(
                target_url = %target,
                "No intermediary is currently marked available; trying the rotation anyway"
            );
        }

        let mut all_rate_limited = true;
        let mut last = LastFailure::Transport("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            let slot = start + attempt - 1;
            let proxy = self.pool.with(|p| p.intermediary_at(slot));
            let url = proxied_url(&proxy.base_address, target);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GitPeekError::Cancelled),
                result = self.client.get(&url).send() => result,
            };

            match outcome {
                Ok(response) => {
                    self.update_rate_limit(&proxy, &response);
                    let status = response.status();

                    if status.is_success() || is_provider_verdict(status) {
                        tracing::debug!(
                            proxy = %proxy.base_address,
                            status = status.as_u16(),
                            attempt,
                            "Fetched {}",
                            target
                        );
                        return Ok(response);
                    }

                    if is_rate_limited(status) {
                        tracing::warn!(
                            proxy = %proxy.base_address,
                            status = status.as_u16(),
                            attempt,
                            "Proxy rate limited"
                        );
                        self.pool.with(|p| p.mark_exhausted(&proxy.base_address, 0));
                    } else {
                        all_rate_limited = false;
                        tracing::warn!(
                            proxy = %proxy.base_address,
                            status = status.as_u16(),
                            attempt,
                            "Proxy returned an error status"
                        );
                        self.pool.with(|p| p.mark_failed(&proxy.base_address));
                    }
                    last = LastFailure::Status(status);
                }
                Err(err) => {
                    all_rate_limited = false;
                    tracing::warn!(
                        proxy = %proxy.base_address,
                        attempt,
                        error = %err,
                        "Proxy unreachable"
                    );
                    self.pool.with(|p| p.mark_failed(&proxy.base_address));
                    last = LastFailure::Transport(err.to_string());
                }
            }

            if attempt < max_attempts {
                let next = self.pool.with(|p| p.rotate_past(slot));
                tracing::debug!(next = %next.base_address, "Rotating proxy");
                self.wait_backoff(cancel).await?;
            }
        }

        if all_rate_limited {
            Err(GitPeekError::RateLimitExhausted {
                attempts: max_attempts,
            })
        } else {
            Err(GitPeekError::AllProxiesFailed {
                attempts: max_attempts,
                last,
            })
        }
    }

    /// Update quota bookkeeping from response headers.
    fn update_rate_limit(&self, proxy: &Intermediary, response: &Response) {
        let Some(remaining) = header_u64(response, "x-ratelimit-remaining") else {
            return;
        };

        self.pool
            .with(|p| p.mark_exhausted(&proxy.base_address, remaining));

        let reset_secs = header_u64(response, "x-ratelimit-reset").unwrap_or(0);
        let snapshot = RateLimit {
            remaining,
            reset_epoch_ms: i64::try_from(reset_secs)
                .unwrap_or(i64::MAX / 1000)
                .saturating_mul(1000),
        };
        *self
            .rate_limit
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    async fn wait_backoff(&self, cancel: &CancellationToken) -> Result<()> {
        if self.backoff.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GitPeekError::Cancelled),
            _ = tokio::time::sleep(self.backoff) => Ok(()),
        }
    }
}

/// Embed the URL-encoded target into an intermediary's base address.
pub fn proxied_url(base_address: &str, target: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!("{}{}", base_address, encoded)
}

/// 429 and 403 both mean the intermediary's quota is spent.
fn is_rate_limited(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN
}

/// Statuses that are the provider's own answer about the resource.
/// A proxy relaying them is healthy, and retrying elsewhere would not change the answer.
pub fn is_provider_verdict(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NOT_FOUND
            | StatusCode::CONFLICT
            | StatusCode::GONE
            | StatusCode::UNPROCESSABLE_ENTITY
    )
}

fn header_u64(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyPool;
    use std::sync::Arc;
    use mockito::{Matcher, Server, ServerGuard};

    const TARGET: &str = "https://api.github.com/users/octocat";

    fn fetcher(bases: Vec<String>) -> ResilientFetcher {
        let config = Config {
            retry_backoff_ms: 0,
            ..Config::default()
        };
        let pool = SharedPool::new(ProxyPool::new(bases).unwrap());
        ResilientFetcher::new(pool, &config).unwrap()
    }

    fn base(server: &ServerGuard) -> String {
        format!("{}/fetch/", server.url())
    }

    /// Raw backend answering every connection with `status_line` after `delay`.
    async fn start_slow_backend(status_line: &'static str, delay: Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = [0u8; 4096];
                    let _ = socket.read(&mut request).await;
                    tokio::time::sleep(delay).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status_line
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}/fetch/", addr)
    }

    #[test]
    fn test_proxied_url_encodes_target() {
        assert_eq!(
            proxied_url("https://proxy.example/raw?url=", TARGET),
            "https://proxy.example/raw?url=https%3A%2F%2Fapi.github.com%2Fusers%2Foctocat"
        );
    }

    #[test]
    fn test_provider_verdicts() {
        assert!(is_provider_verdict(StatusCode::NOT_FOUND));
        assert!(!is_provider_verdict(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_rate_limited(StatusCode::FORBIDDEN));
        assert!(!is_rate_limited(StatusCode::BAD_GATEWAY));
    }

    #[tokio::test]
    async fn test_succeeds_after_rate_limited_proxies() {
        let mut s1 = Server::new_async().await;
        let mut s2 = Server::new_async().await;
        let mut s3 = Server::new_async().await;
        let m1 = s1.mock("GET", Matcher::Any).with_status(429).expect(1).create_async().await;
        let m2 = s2.mock("GET", Matcher::Any).with_status(429).expect(1).create_async().await;
        let m3 = s3
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body("ok")
            .expect(1)
            .create_async()
            .await;

        let fetcher = fetcher(vec![base(&s1), base(&s2), base(&s3)]);
        let response = fetcher.fetch(TARGET, &CancellationToken::new()).await.unwrap();

        assert_eq!(response.text().await.unwrap(), "ok");
        m1.assert_async().await;
        m2.assert_async().await;
        m3.assert_async().await;

        // Two rotations: index moved from 0 to 2
        let pool = fetcher.pool().snapshot();
        assert_eq!(pool.current_index(), 2);
        assert_eq!(pool.intermediaries()[0].remaining_quota, Some(0));
        assert!(!pool.intermediaries()[1].is_working);
        assert!(pool.intermediaries()[2].is_working);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_each_walk_the_whole_pool() {
        let slow_failing =
            start_slow_backend("500 Internal Server Error", Duration::from_millis(300)).await;
        let mut healthy = Server::new_async().await;
        let mut failing = Server::new_async().await;
        let ok = healthy
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body("ok")
            .expect(2)
            .create_async()
            .await;
        let unused = failing
            .mock("GET", Matcher::Any)
            .with_status(500)
            .expect(0)
            .create_async()
            .await;

        let fetcher = Arc::new(fetcher(vec![slow_failing, base(&healthy), base(&failing)]));

        let first = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move {
                fetcher
                    .fetch(TARGET, &CancellationToken::new())
                    .await
                    .map(|r| r.status())
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move {
                fetcher
                    .fetch(TARGET, &CancellationToken::new())
                    .await
                    .map(|r| r.status())
            })
        };

        // Both calls start on the slow proxy; each must move on to the healthy one
        assert_eq!(first.await.unwrap().unwrap(), StatusCode::OK);
        assert_eq!(second.await.unwrap().unwrap(), StatusCode::OK);
        ok.assert_async().await;
        unused.assert_async().await;
    }

    #[tokio::test]
    async fn test_all_rate_limited_is_exhausted() {
        let mut servers = Vec::new();
        let mut mocks = Vec::new();
        for _ in 0..3 {
            let mut server = Server::new_async().await;
            mocks.push(
                server
                    .mock("GET", Matcher::Any)
                    .with_status(403)
                    .expect(1)
                    .create_async()
                    .await,
            );
            servers.push(server);
        }

        let fetcher = fetcher(servers.iter().map(base).collect());
        let err = fetcher.fetch(TARGET, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, GitPeekError::RateLimitExhausted { attempts: 3 }));
        for mock in mocks {
            mock.assert_async().await;
        }
        assert!(fetcher.pool().snapshot().find_available().is_none());
    }

    #[tokio::test]
    async fn test_all_failed_reports_last_status() {
        let mut s1 = Server::new_async().await;
        let mut s2 = Server::new_async().await;
        let m1 = s1.mock("GET", Matcher::Any).with_status(500).expect(1).create_async().await;
        let m2 = s2.mock("GET", Matcher::Any).with_status(502).expect(1).create_async().await;

        let fetcher = fetcher(vec![base(&s1), base(&s2)]);
        let err = fetcher.fetch(TARGET, &CancellationToken::new()).await.unwrap_err();

        match err {
            GitPeekError::AllProxiesFailed { attempts, last } => {
                assert_eq!(attempts, 2);
                assert_eq!(last, LastFailure::Status(StatusCode::BAD_GATEWAY));
            }
            other => panic!("unexpected error: {other}"),
        }
        m1.assert_async().await;
        m2.assert_async().await;
    }

    #[tokio::test]
    async fn test_mixed_failures_are_all_proxies_failed() {
        let mut s1 = Server::new_async().await;
        let mut s2 = Server::new_async().await;
        let _m1 = s1.mock("GET", Matcher::Any).with_status(500).create_async().await;
        let _m2 = s2.mock("GET", Matcher::Any).with_status(429).create_async().await;

        let fetcher = fetcher(vec![base(&s1), base(&s2)]);
        let err = fetcher.fetch(TARGET, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, GitPeekError::AllProxiesFailed { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_fails_over() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        // Port 1 is never listening
        let fetcher = fetcher(vec!["http://127.0.0.1:1/".to_string(), base(&server)]);
        let response = fetcher.fetch(TARGET, &CancellationToken::new()).await.unwrap();

        assert!(response.status().is_success());
        mock.assert_async().await;
        let pool = fetcher.pool().snapshot();
        assert!(!pool.intermediaries()[0].is_working);
        assert_eq!(pool.current_index(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_headers_recorded() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_header("x-ratelimit-remaining", "42")
            .with_header("x-ratelimit-reset", "1700000000")
            .with_body("{}")
            .create_async()
            .await;

        let fetcher = fetcher(vec![base(&server)]);
        fetcher.fetch(TARGET, &CancellationToken::new()).await.unwrap();

        let proxy = fetcher.pool().snapshot().intermediaries()[0].clone();
        assert!(proxy.is_working);
        assert_eq!(proxy.remaining_quota, Some(42));
        assert_eq!(
            fetcher.rate_limit(),
            Some(RateLimit {
                remaining: 42,
                reset_epoch_ms: 1_700_000_000_000,
            })
        );
    }

    #[tokio::test]
    async fn test_not_found_is_returned_without_failover() {
        let mut s1 = Server::new_async().await;
        let mut s2 = Server::new_async().await;
        let m1 = s1.mock("GET", Matcher::Any).with_status(404).expect(1).create_async().await;
        let m2 = s2.mock("GET", Matcher::Any).expect(0).create_async().await;

        let fetcher = fetcher(vec![base(&s1), base(&s2)]);
        let response = fetcher.fetch(TARGET, &CancellationToken::new()).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        m1.assert_async().await;
        m2.assert_async().await;
        assert!(fetcher.pool().snapshot().intermediaries()[0].is_working);
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let mut server = Server::new_async().await;
        let mock = server.mock("GET", Matcher::Any).expect(0).create_async().await;

        let fetcher = fetcher(vec![base(&server)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher.fetch(TARGET, &cancel).await.unwrap_err();
        assert!(matches!(err, GitPeekError::Cancelled));
        mock.assert_async().await;
    }
}
