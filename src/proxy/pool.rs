// Intermediary pool.
// Fixed list of forwarding proxies with health flags, quotas, and a rotation index.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::{GitPeekError, Result};

/// A forwarding endpoint used to reach the provider indirectly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Intermediary {
    /// Base address; the encoded target URL is appended to it.
    pub base_address: String,
    pub is_working: bool,
    /// Last quota reported through this intermediary, if any.
    pub remaining_quota: Option<u64>,
}

impl Intermediary {
    pub fn new(base_address: impl Into<String>) -> Self {
        Self {
            base_address: base_address.into(),
            is_working: true,
            remaining_quota: None,
        }
    }

    /// Working and not known to be out of quota.
    pub fn is_available(&self) -> bool {
        self.is_working && self.remaining_quota.is_none_or(|q| q > 0)
    }
}

/// Rotating pool of intermediaries. Never empty.
///
/// The pool does no locking of its own; share it through [`SharedPool`].
#[derive(Debug, Clone)]
pub struct ProxyPool {
    intermediaries: Vec<Intermediary>,
    index: usize,
}

impl ProxyPool {
    /// Create a pool from base addresses. Fails if `addresses` is empty.
    pub fn new<I, S>(addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let intermediaries: Vec<Intermediary> =
            addresses.into_iter().map(Intermediary::new).collect();
        if intermediaries.is_empty() {
            return Err(GitPeekError::EmptyPool);
        }
        Ok(Self {
            intermediaries,
            index: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.intermediaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intermediaries.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn intermediaries(&self) -> &[Intermediary] {
        &self.intermediaries
    }

    /// The intermediary at the rotation index.
    pub fn current(&self) -> Intermediary {
        self.intermediaries[self.index].clone()
    }

    /// Advance circularly and return the new current intermediary.
    pub fn rotate(&mut self) -> Intermediary {
        self.rotate_past(self.index)
    }

    /// The intermediary at `index`, wrapping around the pool.
    pub fn intermediary_at(&self, index: usize) -> Intermediary {
        self.intermediaries[index % self.intermediaries.len()].clone()
    }

    /// Move the rotation index to the slot after `index`, whatever the
    /// current index is, and return the new current intermediary.
    pub fn rotate_past(&mut self, index: usize) -> Intermediary {
        self.index = (index + 1) % self.intermediaries.len();
        self.current()
    }

    /// Record a reported quota. A quota of zero also takes the intermediary out of service.
    pub fn mark_exhausted(&mut self, address: &str, remaining: u64) {
        if let Some(proxy) = self.find_mut(address) {
            proxy.remaining_quota = Some(remaining);
            if remaining == 0 {
                proxy.is_working = false;
            }
        }
    }

    pub fn mark_failed(&mut self, address: &str) {
        if let Some(proxy) = self.find_mut(address) {
            proxy.is_working = false;
        }
    }

    /// First usable intermediary in storage order.
    pub fn find_available(&self) -> Option<Intermediary> {
        self.intermediaries
            .iter()
            .find(|p| p.is_available())
            .cloned()
    }

    /// Restore every intermediary to working with unknown quota and rewind the rotation.
    pub fn reset(&mut self) {
        for proxy in &mut self.intermediaries {
            proxy.remaining_quota = None;
            proxy.is_working = true;
        }
        self.index = 0;
    }

    fn find_mut(&mut self, address: &str) -> Option<&mut Intermediary> {
        self.intermediaries
            .iter_mut()
            .find(|p| p.base_address == address)
    }
}

/// Pool handle shared by concurrent aggregation runs.
///
/// Every pool operation takes the lock for its own duration only, so health
/// state learned by one run is visible to the others.
#[derive(Debug, Clone)]
pub struct SharedPool {
    inner: Arc<Mutex<ProxyPool>>,
}

impl SharedPool {
    pub fn new(pool: ProxyPool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    /// Run `f` with exclusive access to the pool. Must not be held across an await.
    pub fn with<R>(&self, f: impl FnOnce(&mut ProxyPool) -> R) -> R {
        f(&mut self.lock())
    }

    /// Copy of the current pool state.
    pub fn snapshot(&self) -> ProxyPool {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, ProxyPool> {
        // Pool state stays consistent across a panic: every mutation is a single field write.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
