// Proxy module.
// Pool of forwarding intermediaries and the failover fetcher built on it.

pub mod fetcher;
pub mod pool;

pub use fetcher::ResilientFetcher;
pub use pool::{Intermediary, ProxyPool, SharedPool};
