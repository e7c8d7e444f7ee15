//! Content-addressed archive (CAR) decoding and encoding.

pub mod block;
pub mod codec;
pub mod header;
pub mod keys;
pub mod reader;
pub mod writer;

pub use block::{ArchiveBlock, BlockKind};
pub use codec::{default_strategies, DecodeStrategy};
pub use header::CarHeader;
pub use keys::KeyMap;
pub use reader::{ArchiveReader, BlockStream, DecodeSummary, DecodedArchive};
pub use writer::{cid_for, CarWriter, RepoBuilder};
