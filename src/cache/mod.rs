//! Persistent, age-aware engagement cache.

pub mod store;
pub mod ttl;

pub use store::{CacheEntry, CacheStats, EngagementCache};
pub use ttl::{ttl_for_age, ttl_for_item};
