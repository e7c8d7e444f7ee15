//! Recovery of record keys (`collection/rkey`) from search-tree nodes.
//!
//! Each node stores its entries with prefix compression: entry `i` has key
//! `prev_key[..p] + k`, where `prev_key` is the key of entry `i - 1` in the
//! same node. Keys can therefore be rebuilt one node at a time, in whatever
//! order the nodes appear in the stream.

use std::collections::HashMap;

use serde_json::Value;

use super::codec::{as_bytes, as_link};

/// Map from record CID to every repository key that points at it.
#[derive(Debug, Default)]
pub struct KeyMap {
    keys: HashMap<String, Vec<String>>,
    malformed_entries: usize,
}

impl KeyMap {
    /// Create an empty key map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb every entry of one tree node.
    pub fn absorb_node(&mut self, node: &Value) {
        let Some(entries) = node.get("e").and_then(Value::as_array) else {
            return;
        };

        let mut prev: Vec<u8> = Vec::new();
        for entry in entries {
            let prefix = entry.get("p").and_then(Value::as_u64).unwrap_or(0) as usize;
            let (Some(suffix), Some(target)) = (
                entry.get("k").and_then(as_bytes),
                entry.get("v").and_then(as_link),
            ) else {
                self.malformed_entries += 1;
                continue;
            };
            if prefix > prev.len() {
                self.malformed_entries += 1;
                continue;
            }

            let mut key = prev[..prefix].to_vec();
            key.extend_from_slice(&suffix);
            match String::from_utf8(key.clone()) {
                Ok(k) => self.keys.entry(target.to_string()).or_default().push(k),
                Err(_) => self.malformed_entries += 1,
            }
            prev = key;
        }
    }

    /// All keys pointing at the given CID.
    pub fn keys_for(&self, cid: &str) -> &[String] {
        self.keys.get(cid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct CIDs with at least one known key.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys were recovered.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Entries that could not be decoded.
    pub fn malformed_entries(&self) -> usize {
        self.malformed_entries
    }
}

/// Split a repository key into `(collection, rkey)`.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (collection, rkey) = key.split_once('/')?;
    if collection.is_empty() || rkey.is_empty() {
        return None;
    }
    Some((collection, rkey))
}
