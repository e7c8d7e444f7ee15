//! Decoded archive blocks and their classification.

use cid::Cid;
use serde_json::Value;

use super::codec::as_link;
use crate::types::is_tracked;

/// One block of an archive, alive only for the duration of a decode pass.
#[derive(Debug, Clone)]
pub struct ArchiveBlock {
    /// Position of the block in the stream (0-based).
    pub index: usize,
    /// Content hash addressing this block.
    pub cid: Cid,
    /// Undecoded payload.
    pub raw: Vec<u8>,
    /// Payload decoded into the JSON data model.
    pub value: Value,
    /// Name of the strategy that decoded the payload.
    pub codec: &'static str,
}

/// What role a block plays in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Signed repository commit.
    Commit {
        did: String,
        data: Option<String>,
    },
    /// Search-tree node mapping record keys to record CIDs.
    TreeNode,
    /// Record in one of the tracked collections (by its declared `$type`).
    Record { collection: String },
    /// Anything else: profiles, follows, blobs, untracked record types.
    Other,
}

impl ArchiveBlock {
    /// Classify the block by shape.
    pub fn classify(&self) -> BlockKind {
        classify_value(&self.value)
    }
}

/// Classify a decoded block value.
pub fn classify_value(value: &Value) -> BlockKind {
    let Some(obj) = value.as_object() else {
        return BlockKind::Other;
    };

    if let Some(record_type) = obj.get("$type").and_then(Value::as_str) {
        return if is_tracked(record_type) {
            BlockKind::Record {
                collection: record_type.to_string(),
            }
        } else {
            BlockKind::Other
        };
    }

    if let (Some(did), Some(_)) = (
        obj.get("did").and_then(Value::as_str),
        obj.get("version"),
    ) {
        return BlockKind::Commit {
            did: did.to_string(),
            data: obj.get("data").and_then(as_link).map(str::to_string),
        };
    }

    if obj.get("e").is_some_and(Value::is_array) {
        return BlockKind::TreeNode;
    }

    BlockKind::Other
}
