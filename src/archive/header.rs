//! CARv1 framing: varint lengths and the archive header.

use std::io::{Read, Write};

use cid::Cid;
use ciborium::value::Value as Cbor;

use super::codec::{parse_link, CID_TAG};
use crate::types::error::{SkyError, SkyResult};

/// The only archive version this decoder understands.
pub const CAR_VERSION: u64 = 1;

/// Upper bound on the header body; real headers are a few dozen bytes.
const MAX_HEADER_SIZE: u64 = 1 << 20;

/// Longest varint accepted for a u64 (ceil(64 / 7)).
const MAX_VARINT_BYTES: usize = 10;

/// Header of a CARv1 archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarHeader {
    /// Format version (1).
    pub version: u64,
    /// Root CIDs, normally the repository commit.
    pub roots: Vec<Cid>,
}

impl CarHeader {
    /// Create a version 1 header with the given roots.
    pub fn new(roots: Vec<Cid>) -> Self {
        Self {
            version: CAR_VERSION,
            roots,
        }
    }

    /// Write this header as `varint(len) || cbor({version, roots})`.
    pub fn write_to(&self, writer: &mut impl Write) -> SkyResult<()> {
        let roots = self
            .roots
            .iter()
            .map(|cid| {
                let mut bytes = vec![0u8];
                bytes.extend_from_slice(&cid.to_bytes());
                Cbor::Tag(CID_TAG, Box::new(Cbor::Bytes(bytes)))
            })
            .collect();
        let map = Cbor::Map(vec![
            (Cbor::Text("roots".into()), Cbor::Array(roots)),
            (Cbor::Text("version".into()), Cbor::Integer(self.version.into())),
        ]);
        let mut body = Vec::new();
        ciborium::ser::into_writer(&map, &mut body)
            .map_err(|e| SkyError::Io(std::io::Error::other(e.to_string())))?;
        write_varint(writer, body.len() as u64)?;
        writer.write_all(&body)?;
        Ok(())
    }

    /// Read the header. A malformed header body is tolerated (empty roots);
    /// malformed framing is not, since block boundaries depend on it.
    pub fn read_from(reader: &mut impl Read) -> SkyResult<Self> {
        let len = read_varint(reader)?.ok_or_else(|| SkyError::ArchiveCorrupt {
            reason: "archive is empty".to_string(),
        })?;
        if len > MAX_HEADER_SIZE {
            return Err(SkyError::ArchiveCorrupt {
                reason: format!("header length {len} exceeds {MAX_HEADER_SIZE}"),
            });
        }
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).map_err(|_| SkyError::ArchiveCorrupt {
            reason: "archive header is truncated".to_string(),
        })?;

        let parsed: Result<Cbor, _> = ciborium::de::from_reader(body.as_slice());
        let Ok(Cbor::Map(entries)) = parsed else {
            log::warn!("unreadable archive header, continuing without roots");
            return Ok(Self::new(Vec::new()));
        };

        let mut header = Self::new(Vec::new());
        for (key, value) in entries {
            match (key.as_text(), value) {
                (Some("version"), Cbor::Integer(v)) => {
                    header.version = u64::try_from(i128::from(v)).unwrap_or(0);
                }
                (Some("roots"), Cbor::Array(roots)) => {
                    header.roots = roots
                        .into_iter()
                        .filter_map(|root| match root {
                            Cbor::Tag(CID_TAG, inner) => match *inner {
                                Cbor::Bytes(b) => parse_link(&b),
                                _ => None,
                            },
                            _ => None,
                        })
                        .collect();
                }
                _ => {}
            }
        }
        if header.version != CAR_VERSION {
            log::warn!(
                "archive declares version {}, decoding as v{}",
                header.version,
                CAR_VERSION
            );
        }
        Ok(header)
    }
}

/// Read an unsigned LEB128 varint. Returns None on a clean end of stream.
pub fn read_varint(reader: &mut impl Read) -> SkyResult<Option<u64>> {
    let mut value: u64 = 0;
    let mut byte = [0u8; 1];
    for i in 0..MAX_VARINT_BYTES {
        match reader.read(&mut byte)? {
            0 if i == 0 => return Ok(None),
            0 => {
                return Err(SkyError::ArchiveCorrupt {
                    reason: "varint truncated".to_string(),
                })
            }
            _ => {}
        }
        value |= u64::from(byte[0] & 0x7f) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(SkyError::ArchiveCorrupt {
        reason: "varint overflow".to_string(),
    })
}

/// Write an unsigned LEB128 varint.
pub fn write_varint(writer: &mut impl Write, mut value: u64) -> SkyResult<()> {
    let mut buf = [0u8; MAX_VARINT_BYTES];
    let mut n = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf[n] = byte;
            n += 1;
            break;
        }
        buf[n] = byte | 0x80;
        n += 1;
    }
    writer.write_all(&buf[..n])?;
    Ok(())
}
