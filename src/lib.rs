// gitpeek library.
// Fetches a GitHub profile, its original repositories, and recent commits
// through a rotating pool of forwarding proxies, with a TTL cache in front.

pub mod cache;
pub mod config;
pub mod error;
pub mod github;
pub mod logging;
pub mod pacing;
pub mod proxy;

pub use config::Config;
pub use error::{GitPeekError, Result};
pub use github::{Aggregator, Profile, RateLimit, Repository, RepositoryBatch};
