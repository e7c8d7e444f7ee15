//! Remote read API: paginated record listing and engagement lookups.

pub mod api;
pub mod backoff;
pub mod client;
pub mod pacer;
pub mod pager;

pub use api::{ListedRecord, PostView, RecordPage, RemoteApi};
pub use backoff::Backoff;
pub use client::{ClientConfig, XrpcClient};
pub use pacer::Pacer;
pub use pager::{fetch_all, fetch_all_collections, fetch_collection, FetchOptions, FetchSummary};
