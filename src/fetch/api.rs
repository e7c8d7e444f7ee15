//! The remote operations the pipeline depends on.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::types::{RawRecord, SkyError, SkyResult};

/// One record from a collection listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListedRecord {
    pub uri: String,
    pub cid: String,
    pub value: Value,
}

impl ListedRecord {
    /// Convert into a raw record, taking owner, collection and key from the uri.
    pub fn into_raw(self) -> SkyResult<RawRecord> {
        let (owner, collection, rkey) =
            RawRecord::split_uri(&self.uri).ok_or_else(|| SkyError::RecordShape {
                uri: self.uri.clone(),
                reason: "not an at:// record uri".to_string(),
            })?;
        Ok(RawRecord {
            collection: collection.to_string(),
            rkey: rkey.to_string(),
            owner: Some(owner.to_string()),
            cid: self.cid,
            value: self.value,
        })
    }
}

/// One page of a collection listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<ListedRecord>,
    /// Opaque token for the next page; absent on the last page.
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Engagement view of one post from the bulk lookup. Counts the service
/// does not report are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub repost_count: Option<u64>,
    #[serde(default)]
    pub reply_count: Option<u64>,
}

/// Remote read service. Implementations must map throttling to
/// `SkyError::RateLimited` and timeouts to `SkyError::NetworkTimeout`.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// List one page of `collection` in the repository of `repo`.
    async fn list_records(
        &self,
        repo: &str,
        collection: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> SkyResult<RecordPage>;

    /// Bulk engagement lookup for up to `MAX_BATCH_SIZE` post uris.
    async fn get_posts(&self, uris: &[String]) -> SkyResult<Vec<PostView>>;

    /// Number of likes on `uri`.
    async fn get_like_count(&self, uri: &str) -> SkyResult<u64>;

    /// Number of reposts of `uri`.
    async fn get_repost_count(&self, uri: &str) -> SkyResult<u64>;

    /// Number of direct replies to `uri`, from its thread.
    async fn get_reply_count(&self, uri: &str) -> SkyResult<u64>;

    /// True when every request carries its own timeout, started after any
    /// pacing wait. Callers then add no outer timeout of their own.
    fn times_out_requests(&self) -> bool {
        false
    }
}
