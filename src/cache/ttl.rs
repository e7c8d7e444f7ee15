//! Time-to-live policy, assigned once when an entry is written.
//!
//! Recent content still gathers engagement, so it is refreshed often. Old
//! content is effectively frozen and refreshed rarely.

use crate::types::{ContentItem, SECS_PER_DAY};

/// TTL for content younger than a week: 1 hour.
pub const TTL_FRESH_SECS: u64 = 3_600;

/// TTL for content between one week and 30 days old: 6 hours.
pub const TTL_RECENT_SECS: u64 = 6 * 3_600;

/// TTL for content older than 30 days: 24 hours.
pub const TTL_SETTLED_SECS: u64 = 24 * 3_600;

const FRESH_AGE_DAYS: i64 = 7;
const RECENT_AGE_DAYS: i64 = 30;

/// TTL in seconds for content of the given age.
pub fn ttl_for_age(age_secs: i64) -> u64 {
    if age_secs < FRESH_AGE_DAYS * SECS_PER_DAY {
        TTL_FRESH_SECS
    } else if age_secs <= RECENT_AGE_DAYS * SECS_PER_DAY {
        TTL_RECENT_SECS
    } else {
        TTL_SETTLED_SECS
    }
}

/// TTL for an item at `now` (epoch seconds).
pub fn ttl_for_item(item: &ContentItem, now: i64) -> u64 {
    ttl_for_age(item.age_secs(now))
}
