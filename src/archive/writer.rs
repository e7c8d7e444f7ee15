//! Writes CARv1 archives. Used to build fixtures and to pack record dumps.

use std::io::Write;
use std::path::Path;

use cid::Cid;
use ciborium::value::Value as Cbor;
use multihash_codetable::{Code, MultihashDigest};
use serde_json::Value;

use super::codec::CID_TAG;
use super::header::{write_varint, CarHeader};
use crate::types::error::{SkyError, SkyResult};

/// Multicodec code for DAG-CBOR.
pub const DAG_CBOR: u64 = 0x71;

/// Compute the CIDv1 (DAG-CBOR, sha2-256) of a payload.
pub fn cid_for(payload: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR, Code::Sha2_256.digest(payload))
}

/// A DAG-CBOR link to `cid`.
pub fn link(cid: &Cid) -> Cbor {
    let mut bytes = vec![0u8];
    bytes.extend_from_slice(&cid.to_bytes());
    Cbor::Tag(CID_TAG, Box::new(Cbor::Bytes(bytes)))
}

fn encode(value: &Cbor) -> SkyResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| SkyError::Io(std::io::Error::other(e.to_string())))?;
    Ok(out)
}

/// Low-level CARv1 writer: a header followed by `varint || cid || payload` blocks.
pub struct CarWriter<W: Write> {
    inner: W,
    blocks_written: usize,
}

impl<W: Write> CarWriter<W> {
    /// Write the header and return a writer ready for blocks.
    pub fn new(mut inner: W, roots: Vec<Cid>) -> SkyResult<Self> {
        CarHeader::new(roots).write_to(&mut inner)?;
        Ok(Self {
            inner,
            blocks_written: 0,
        })
    }

    /// Write a block with a caller-chosen CID.
    pub fn write_block(&mut self, cid: &Cid, payload: &[u8]) -> SkyResult<()> {
        let cid_bytes = cid.to_bytes();
        write_varint(&mut self.inner, (cid_bytes.len() + payload.len()) as u64)?;
        self.inner.write_all(&cid_bytes)?;
        self.inner.write_all(payload)?;
        self.blocks_written += 1;
        Ok(())
    }

    /// Encode a CBOR value, write it, and return its CID.
    pub fn write_value(&mut self, value: &Cbor) -> SkyResult<Cid> {
        let payload = encode(value)?;
        let cid = cid_for(&payload);
        self.write_block(&cid, &payload)?;
        Ok(cid)
    }

    /// Number of blocks written so far.
    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> SkyResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Builds a complete single-account repository archive from plain records.
///
/// Layout: header, optional commit, one flat tree node, then record blocks.
pub struct RepoBuilder {
    did: String,
    records: Vec<(String, Value)>,
    include_commit: bool,
}

impl RepoBuilder {
    /// Start a repository owned by `did`.
    pub fn new(did: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            records: Vec::new(),
            include_commit: true,
        }
    }

    /// Add a record under `collection/rkey`.
    pub fn record(mut self, collection: &str, rkey: &str, value: Value) -> Self {
        self.records.push((format!("{collection}/{rkey}"), value));
        self
    }

    /// Omit the commit block, as partial exports do.
    pub fn without_commit(mut self) -> Self {
        self.include_commit = false;
        self
    }

    /// Encode the repository into an in-memory archive.
    pub fn build(&self) -> SkyResult<Vec<u8>> {
        let mut blocks: Vec<(String, Vec<u8>, Cid)> = Vec::with_capacity(self.records.len());
        for (key, value) in &self.records {
            let cbor = Cbor::serialized(value)
                .map_err(|e| SkyError::Io(std::io::Error::other(e.to_string())))?;
            let payload = encode(&cbor)?;
            let cid = cid_for(&payload);
            blocks.push((key.clone(), payload, cid));
        }
        blocks.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = Vec::with_capacity(blocks.len());
        let mut prev: &[u8] = &[];
        for (key, _, cid) in &blocks {
            let key = key.as_bytes();
            let shared = prev
                .iter()
                .zip(key.iter())
                .take_while(|(a, b)| a == b)
                .count();
            entries.push(Cbor::Map(vec![
                (Cbor::Text("k".into()), Cbor::Bytes(key[shared..].to_vec())),
                (Cbor::Text("p".into()), Cbor::Integer((shared as u64).into())),
                (Cbor::Text("t".into()), Cbor::Null),
                (Cbor::Text("v".into()), link(cid)),
            ]));
            prev = key;
        }
        let node = Cbor::Map(vec![
            (Cbor::Text("e".into()), Cbor::Array(entries)),
            (Cbor::Text("l".into()), Cbor::Null),
        ]);
        let node_payload = encode(&node)?;
        let node_cid = cid_for(&node_payload);

        let commit_payload = if self.include_commit {
            let commit = Cbor::Map(vec![
                (Cbor::Text("did".into()), Cbor::Text(self.did.clone())),
                (Cbor::Text("rev".into()), Cbor::Text("3kskyvault000".into())),
                (Cbor::Text("sig".into()), Cbor::Bytes(vec![0u8; 64])),
                (Cbor::Text("data".into()), link(&node_cid)),
                (Cbor::Text("prev".into()), Cbor::Null),
                (Cbor::Text("version".into()), Cbor::Integer(3u64.into())),
            ]);
            Some(encode(&commit)?)
        } else {
            None
        };

        let roots = match &commit_payload {
            Some(payload) => vec![cid_for(payload)],
            None => vec![node_cid],
        };
        let mut writer = CarWriter::new(Vec::new(), roots)?;
        if let Some(payload) = &commit_payload {
            writer.write_block(&cid_for(payload), payload)?;
        }
        writer.write_block(&node_cid, &node_payload)?;
        for (_, payload, cid) in &blocks {
            writer.write_block(cid, payload)?;
        }
        writer.finish()
    }

    /// Encode the repository and write it to `path`.
    pub fn write_to_file(&self, path: &Path) -> SkyResult<()> {
        std::fs::write(path, self.build()?)?;
        Ok(())
    }
}
