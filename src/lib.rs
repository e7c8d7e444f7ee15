//! Skyvault: account history recovery and engagement hydration.
//!
//! Decodes a repository archive (or pages through the public read API) into
//! normalized content items, then fills each post's like, repost and reply
//! counts from an age-aware local cache and batched remote lookups.

pub mod archive;
pub mod cache;
pub mod cli;
pub mod collection;
pub mod config;
pub mod fetch;
pub mod hydrate;
pub mod normalize;
pub mod pipeline;
pub mod types;

// Re-export commonly used types at the crate root
pub use archive::{ArchiveReader, CarWriter, DecodeSummary, DecodedArchive, RepoBuilder};
pub use cache::{ttl_for_age, ttl_for_item, CacheEntry, CacheStats, EngagementCache};
pub use collection::{CollectionStats, ContentCollection, SearchParams, SearchSort};
pub use config::Settings;
pub use fetch::{
    fetch_all_collections, fetch_collection, ClientConfig, FetchOptions, Pacer, PostView,
    RecordPage, RemoteApi, XrpcClient,
};
pub use hydrate::{HydrationReport, HydrationSettings, Hydrator, ReplyStrategy};
pub use normalize::{normalize, normalize_all, NormalizeReport};
pub use types::{
    now_secs, ContentItem, ContentItemBuilder, ContentType, EngagementCounts, RawRecord, SkyError,
    SkyResult, MAX_BATCH_SIZE, TRACKED_COLLECTIONS,
};
