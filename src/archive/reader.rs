//! Streaming archive decoder.
//!
//! Blocks are pulled off the stream one at a time. Only tracked records and
//! recovered record keys are retained; every other block is dropped as soon
//! as it has been classified.

use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read};
use std::path::Path;

use cid::Cid;
use memmap2::Mmap;
use serde::Serialize;
use serde_json::Value;

use super::block::{ArchiveBlock, BlockKind};
use super::codec::{decode_with, default_strategies, DecodeStrategy};
use super::header::{read_varint, CarHeader};
use super::keys::{split_key, KeyMap};
use crate::types::error::{SkyError, SkyResult};
use crate::types::{is_tracked, RawRecord};

/// Largest block the decoder will buffer. Real repository blocks are far smaller.
pub const MAX_BLOCK_SIZE: u64 = 8 * 1024 * 1024;

/// Counts describing one decode pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecodeSummary {
    /// Blocks encountered, decodable or not.
    pub blocks_read: usize,
    /// Blocks decoded by some strategy.
    pub blocks_decoded: usize,
    /// Blocks no strategy could decode, or with broken framing.
    pub blocks_skipped: usize,
    /// Decoded blocks outside the tracked collections.
    pub blocks_ignored: usize,
    /// Whether a repository commit block was present.
    pub commit_found: bool,
    /// Repository owner, from the commit or the caller's hint.
    pub owner: Option<String>,
    /// Root CIDs declared in the header.
    pub roots: Vec<String>,
    /// Tracked records emitted.
    pub records: usize,
    /// Records whose key was not found in any tree node.
    pub records_without_key: usize,
    /// Decoded block count per strategy name.
    pub codecs: BTreeMap<String, usize>,
}

/// Output of a decode pass: records in stream order plus the summary.
#[derive(Debug, Clone)]
pub struct DecodedArchive {
    pub records: Vec<RawRecord>,
    pub summary: DecodeSummary,
}

struct PendingRecord {
    cid: String,
    collection: String,
    value: Value,
}

/// Decoder for content-addressed repository archives.
pub struct ArchiveReader {
    strategies: Vec<DecodeStrategy>,
    owner_hint: Option<String>,
}

impl Default for ArchiveReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveReader {
    /// Create a reader with the default strategy order.
    pub fn new() -> Self {
        Self {
            strategies: default_strategies(),
            owner_hint: None,
        }
    }

    /// Replace the decode strategies. Order is significant.
    pub fn with_strategies(mut self, strategies: Vec<DecodeStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Owner DID to use when the archive carries no commit.
    pub fn owner_hint(mut self, did: impl Into<String>) -> Self {
        self.owner_hint = Some(did.into());
        self
    }

    /// Decode an archive file through a read-only memory map.
    pub fn read_from_file(&self, path: &Path) -> SkyResult<DecodedArchive> {
        let file = std::fs::File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(SkyError::ArchiveCorrupt {
                reason: format!("{} is empty", path.display()),
            });
        }
        // SAFETY: the map is read-only and dropped before this call returns.
        let mmap = unsafe { Mmap::map(&file)? };
        self.read_from(&mut &mmap[..])
    }

    /// Decode an in-memory archive.
    pub fn decode(&self, bytes: &[u8]) -> SkyResult<DecodedArchive> {
        self.read_from(&mut &bytes[..])
    }

    /// Decode from any reader.
    pub fn read_from(&self, reader: &mut impl Read) -> SkyResult<DecodedArchive> {
        let header = CarHeader::read_from(reader)?;

        let mut summary = DecodeSummary {
            roots: header.roots.iter().map(Cid::to_string).collect(),
            ..Default::default()
        };
        let mut commit_owner: Option<String> = None;
        let mut keymap = KeyMap::new();
        let mut pending: Vec<PendingRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for block in self.blocks(reader) {
            summary.blocks_read += 1;
            let block = match block {
                Ok(block) => block,
                Err(e) => {
                    summary.blocks_skipped += 1;
                    log::warn!("{e}");
                    continue;
                }
            };
            summary.blocks_decoded += 1;
            *summary.codecs.entry(block.codec.to_string()).or_default() += 1;

            match block.classify() {
                BlockKind::Commit { did, .. } => {
                    summary.commit_found = true;
                    commit_owner.get_or_insert(did);
                }
                BlockKind::TreeNode => keymap.absorb_node(&block.value),
                BlockKind::Record { collection } => {
                    let cid = block.cid.to_string();
                    if seen.insert(cid.clone()) {
                        pending.push(PendingRecord {
                            cid,
                            collection,
                            value: block.value,
                        });
                    }
                }
                BlockKind::Other => summary.blocks_ignored += 1,
            }
        }

        if summary.blocks_decoded == 0 {
            return Err(SkyError::ArchiveCorrupt {
                reason: format!("none of {} blocks could be decoded", summary.blocks_read),
            });
        }

        if let (Some(commit), Some(hint)) = (&commit_owner, &self.owner_hint) {
            if commit != hint {
                log::warn!("archive commit belongs to {commit}, not {hint}; using {commit}");
            }
        }
        summary.owner = commit_owner.or_else(|| self.owner_hint.clone());
        if keymap.malformed_entries() > 0 {
            log::warn!(
                "{} tree entries could not be decoded",
                keymap.malformed_entries()
            );
        }

        let records = resolve_records(pending, &keymap, &mut summary);
        summary.records = records.len();

        log::info!(
            "decoded {} records from {} blocks ({} skipped, {} ignored)",
            summary.records,
            summary.blocks_read,
            summary.blocks_skipped,
            summary.blocks_ignored
        );
        Ok(DecodedArchive { records, summary })
    }

    /// Iterate over the blocks following the header. The header must already
    /// have been consumed from `reader`.
    pub fn blocks<R: Read>(&self, reader: R) -> BlockStream<'_, R> {
        BlockStream {
            reader,
            strategies: &self.strategies,
            index: 0,
            done: false,
        }
    }
}

/// Attach keys to pending records. Keys from tree nodes decide the
/// collection; records without a key fall back to their `$type` and CID.
fn resolve_records(
    pending: Vec<PendingRecord>,
    keymap: &KeyMap,
    summary: &mut DecodeSummary,
) -> Vec<RawRecord> {
    let mut records = Vec::with_capacity(pending.len());
    for record in pending {
        let keys = keymap.keys_for(&record.cid);
        if keys.is_empty() {
            summary.records_without_key += 1;
            records.push(RawRecord {
                rkey: record.cid.clone(),
                collection: record.collection,
                cid: record.cid,
                owner: summary.owner.clone(),
                value: record.value,
            });
            continue;
        }

        let mut emitted = false;
        for key in keys {
            let Some((collection, rkey)) = split_key(key) else {
                continue;
            };
            if !is_tracked(collection) {
                continue;
            }
            emitted = true;
            records.push(RawRecord {
                collection: collection.to_string(),
                rkey: rkey.to_string(),
                cid: record.cid.clone(),
                owner: summary.owner.clone(),
                value: record.value.clone(),
            });
        }
        if !emitted {
            summary.blocks_ignored += 1;
        }
    }
    records
}

/// Iterator over the blocks of an archive. Undecodable blocks are yielded as
/// `SkyError::BlockSkipped`; broken framing ends the stream after one error.
pub struct BlockStream<'s, R> {
    reader: R,
    strategies: &'s [DecodeStrategy],
    index: usize,
    done: bool,
}

impl<R: Read> BlockStream<'_, R> {
    fn skipped(&self, index: usize, reason: impl Into<String>) -> SkyError {
        SkyError::BlockSkipped {
            index,
            reason: reason.into(),
        }
    }

    fn stop(&mut self, index: usize, reason: impl Into<String>) -> Option<SkyResult<ArchiveBlock>> {
        self.done = true;
        Some(Err(self.skipped(index, reason)))
    }
}

impl<R: Read> Iterator for BlockStream<'_, R> {
    type Item = SkyResult<ArchiveBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let index = self.index;
        self.index += 1;

        let len = match read_varint(&mut self.reader) {
            Ok(None) => {
                self.done = true;
                return None;
            }
            Ok(Some(len)) => len,
            Err(e) => return self.stop(index, e.to_string()),
        };
        if len == 0 {
            return Some(Err(self.skipped(index, "zero-length block")));
        }
        if len > MAX_BLOCK_SIZE {
            return self.stop(index, format!("block length {len} exceeds {MAX_BLOCK_SIZE}"));
        }

        let mut buf = vec![0u8; len as usize];
        if let Err(e) = self.reader.read_exact(&mut buf) {
            return self.stop(index, format!("block truncated: {e}"));
        }

        let mut cursor = Cursor::new(buf.as_slice());
        let cid = match Cid::read_bytes(&mut cursor) {
            Ok(cid) => cid,
            Err(e) => return Some(Err(self.skipped(index, format!("bad CID: {e}")))),
        };
        let offset = cursor.position() as usize;
        let raw = buf.split_off(offset);

        match decode_with(self.strategies, &raw) {
            Ok((value, codec)) => Some(Ok(ArchiveBlock {
                index,
                cid,
                raw,
                value,
                codec,
            })),
            Err(errors) => Some(Err(self.skipped(index, errors.join("; ")))),
        }
    }
}
