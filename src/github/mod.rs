// GitHub data module.
// Provider types, endpoint addresses, and the profile/repository aggregator.

pub mod aggregator;
pub mod endpoints;
pub mod types;

pub use aggregator::Aggregator;
pub use types::*;
