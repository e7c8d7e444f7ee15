//! Raw records as produced by the archive decoder or the remote fetcher.

use serde_json::Value;

/// A record before normalization, in the AT-protocol JSON data model.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Collection NSID, e.g. `app.bsky.feed.post`.
    pub collection: String,
    /// Record key within the collection.
    pub rkey: String,
    /// Content hash (CID string) of the record block.
    pub cid: String,
    /// DID of the repository owner, when known.
    pub owner: Option<String>,
    /// Decoded record body.
    pub value: Value,
}

impl RawRecord {
    /// The record's `at://` uri. Unknown owners render as `unknown`.
    pub fn uri(&self) -> String {
        format!(
            "at://{}/{}/{}",
            self.owner.as_deref().unwrap_or("unknown"),
            self.collection,
            self.rkey
        )
    }

    /// Parse an `at://did/collection/rkey` uri into its three parts.
    pub fn split_uri(uri: &str) -> Option<(&str, &str, &str)> {
        let rest = uri.strip_prefix("at://")?;
        let mut parts = rest.splitn(3, '/');
        let did = parts.next()?;
        let collection = parts.next()?;
        let rkey = parts.next()?;
        if did.is_empty() || collection.is_empty() || rkey.is_empty() {
            return None;
        }
        Some((did, collection, rkey))
    }
}
