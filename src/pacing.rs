// Request pacing.
// Token bucket that spaces out commit requests and stretches under a low provider quota.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{GitPeekError, Result};
use crate::github::RateLimit;

/// A simple token bucket refilled at one token per interval.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            last_update: now,
        }
    }

    /// Take a token, or report how long until one is available.
    fn try_acquire(&mut self, now: Instant, interval: Duration) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed / interval.as_secs_f64()).min(self.capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(interval.mul_f64(1.0 - self.tokens))
        }
    }
}

/// Self-throttle for sequential provider requests.
#[derive(Debug)]
pub struct Pacer {
    bucket: Mutex<TokenBucket>,
    base_interval: Duration,
    max_interval: Duration,
}

impl Pacer {
    pub fn new(base_interval: Duration, max_interval: Duration) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(1.0, Instant::now())),
            base_interval,
            max_interval: max_interval.max(base_interval),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pacing_interval(), config.max_pacing())
    }

    /// Spacing to use given the last observed quota.
    ///
    /// With a known quota and a reset in the future, the remaining calls are
    /// spread over the rest of the window, never faster than the base interval
    /// and never slower than the maximum.
    pub fn interval_for(&self, quota: Option<&RateLimit>, now_ms: i64) -> Duration {
        let Some(quota) = quota else {
            return self.base_interval;
        };
        let window_ms = quota.reset_epoch_ms.saturating_sub(now_ms);
        if window_ms <= 0 {
            return self.base_interval;
        }

        let spread = Duration::from_millis(window_ms as u64 / quota.remaining.max(1));
        spread.clamp(self.base_interval, self.max_interval)
    }

    /// Wait until the next request may be issued.
    pub async fn acquire(&self, quota: Option<RateLimit>, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(GitPeekError::Cancelled);
            }

            let interval = self.interval_for(quota.as_ref(), Utc::now().timestamp_millis());
            if interval.is_zero() {
                return Ok(());
            }

            let wait = self
                .bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_acquire(Instant::now(), interval);

            let Some(wait) = wait else {
                return Ok(());
            };

            tracing::trace!(wait_ms = wait.as_millis() as u64, "Pacing request");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GitPeekError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
