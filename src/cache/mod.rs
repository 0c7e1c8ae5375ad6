// Cache module.
// TTL-bounded store for provider responses over a pluggable key-value substrate.

pub mod kv;
pub mod paths;
pub mod store;

pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use store::{CacheStore, CachedData, DEFAULT_TTL, commits_key, repos_key, user_key};
