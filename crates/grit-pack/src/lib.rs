//! Packfile codec for the grit git core.
//!
//! A pack is `"PACK"` + version 2 + object count, followed by that many
//! entries (zlib payloads with variable-length headers, possibly delta-coded
//! against earlier entries or external bases), closed by a digest of
//! everything before it. This crate covers both directions: [`parse`]
//! decodes packs in pack order with delta resolution, [`encode`] plans and
//! writes them, [`index`]/[`write`] handle the `.idx` sidecar, and [`pack`]
//! serves random-access reads over a finished pair.

pub mod delta;
pub mod encode;
pub mod entry;
pub mod index;
pub mod pack;
pub mod parse;
pub mod verify;
pub mod write;

use grit_hash::ObjectId;
use grit_object::ObjectType;

/// Errors produced by pack operations.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("bad pack signature")]
    BadSignature,

    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt pack entry at offset {0}")]
    CorruptEntry(u64),

    #[error("zlib failure at offset {offset}: {source}")]
    Zlib {
        offset: u64,
        source: std::io::Error,
    },

    #[error("entry at offset {offset} declares {declared} bytes, decompressed to {actual}")]
    SizeMismatch {
        offset: u64,
        declared: usize,
        actual: usize,
    },

    #[error("pack checksum mismatch: expected {expected}, computed {actual}")]
    HashMismatch {
        expected: ObjectId,
        actual: ObjectId,
    },

    #[error("delta base {0} not present in pack or store")]
    MissingBase(ObjectId),

    #[error("delta chain exceeds {MAX_DELTA_DEPTH} links at offset {0}")]
    ChainTooDeep(u64),

    #[error("invalid delta at offset {offset}: {reason}")]
    BadDelta { offset: u64, reason: String },

    #[error("bad pack index: {0}")]
    BadIndex(String),

    #[error(transparent)]
    Object(#[from] grit_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] grit_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Entry kind on the wire. Codes 1–4 are the storable types, 6/7 the two
/// delta encodings; 5 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta whose base lives earlier in the same pack, addressed by the
    /// distance between entry offsets.
    OfsDelta { base_offset: u64 },
    /// Delta whose base is addressed by object id (possibly outside the
    /// pack, a "thin" reference).
    RefDelta { base: ObjectId },
}

impl EntryKind {
    /// The wire tag.
    pub fn code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
            Self::OfsDelta { .. } => 6,
            Self::RefDelta { .. } => 7,
        }
    }

    /// The object type, for non-delta kinds.
    pub fn object_type(&self) -> Option<ObjectType> {
        match self {
            Self::Commit => Some(ObjectType::Commit),
            Self::Tree => Some(ObjectType::Tree),
            Self::Blob => Some(ObjectType::Blob),
            Self::Tag => Some(ObjectType::Tag),
            Self::OfsDelta { .. } | Self::RefDelta { .. } => None,
        }
    }

    pub fn code_for(obj_type: ObjectType) -> u8 {
        match obj_type {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
        }
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, Self::OfsDelta { .. } | Self::RefDelta { .. })
    }
}

/// A fully resolved object pulled out of a pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedObject {
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
}

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_LEN: usize = 12;

pub const IDX_SIGNATURE: [u8; 4] = [0xff, b't', b'O', b'c'];
pub const IDX_VERSION: u32 = 2;

/// Delta chains longer than this are rejected on read and never produced
/// on write.
pub const MAX_DELTA_DEPTH: usize = 50;
