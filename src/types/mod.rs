//! All data types for the skyvault library.

pub mod error;
pub mod item;
pub mod record;

pub use error::{SkyError, SkyResult};
pub use item::{ContentItem, ContentItemBuilder, ContentType, EngagementCounts};
pub use record::RawRecord;

/// Collection holding authored posts.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Collection holding likes of other accounts' content.
pub const LIKE_COLLECTION: &str = "app.bsky.feed.like";

/// Collection holding reposts of other accounts' content.
pub const REPOST_COLLECTION: &str = "app.bsky.feed.repost";

/// The three collections the pipeline tracks, in fetch order.
pub const TRACKED_COLLECTIONS: [&str; 3] = [POST_COLLECTION, LIKE_COLLECTION, REPOST_COLLECTION];

/// Hard ceiling on uris per bulk engagement call imposed by the remote API.
pub const MAX_BATCH_SIZE: usize = 100;

/// Seconds in one day.
pub const SECS_PER_DAY: i64 = 86_400;

/// Returns the current time as Unix epoch seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Returns true if the collection is one the pipeline tracks.
pub fn is_tracked(collection: &str) -> bool {
    TRACKED_COLLECTIONS.contains(&collection)
}
