//! Pack index (v2) reading.
//!
//! Layout after the 8-byte magic+version: a 256-entry cumulative fanout,
//! the sorted digest table, per-entry CRC32s, 31-bit offsets (high bit set
//! selects the 64-bit overflow table), the overflow table, then the pack
//! digest and the index's own digest.

use std::path::{Path, PathBuf};

use grit_hash::{HashAlgorithm, ObjectId};
use memmap2::Mmap;

use crate::{PackError, IDX_SIGNATURE, IDX_VERSION};

/// A memory-mapped pack index.
pub struct PackIndex {
    map: Mmap,
    count: u32,
    algo: HashAlgorithm,
    path: PathBuf,
}

const FANOUT_AT: usize = 8;
const FANOUT_LEN: usize = 256 * 4;

impl PackIndex {
    /// Open and structurally validate an index file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PackError> {
        Self::open_with(path, HashAlgorithm::Sha1)
    }

    pub fn open_with(path: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, PackError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        let map = unsafe { Mmap::map(&file)? };

        let digest_len = algo.digest_len();
        let floor = FANOUT_AT + FANOUT_LEN + 2 * digest_len;
        if map.len() < floor {
            return Err(PackError::BadIndex("file too small".into()));
        }
        if map[..4] != IDX_SIGNATURE {
            return Err(PackError::BadIndex("bad magic".into()));
        }
        let version = u32::from_be_bytes(map[4..8].try_into().expect("4 bytes"));
        if version != IDX_VERSION {
            return Err(PackError::BadIndex(format!("unsupported version {version}")));
        }

        let last = FANOUT_AT + 255 * 4;
        let count = u32::from_be_bytes(map[last..last + 4].try_into().expect("4 bytes"));

        // The fixed-width sections plus trailer must fit (overflow table is
        // variable and checked lazily by offset_at's slice bounds).
        let needed = FANOUT_AT
            + FANOUT_LEN
            + count as usize * (digest_len + 4 + 4)
            + 2 * digest_len;
        if map.len() < needed {
            return Err(PackError::BadIndex(format!(
                "{} bytes cannot hold {count} entries",
                map.len()
            )));
        }

        Ok(Self {
            map,
            count,
            algo,
            path,
        })
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fanout(&self, bucket: u8) -> u32 {
        let at = FANOUT_AT + bucket as usize * 4;
        u32::from_be_bytes(self.map[at..at + 4].try_into().expect("4 bytes"))
    }

    fn oids_at(&self) -> usize {
        FANOUT_AT + FANOUT_LEN
    }

    fn crcs_at(&self) -> usize {
        self.oids_at() + self.count as usize * self.algo.digest_len()
    }

    fn offsets_at(&self) -> usize {
        self.crcs_at() + self.count as usize * 4
    }

    fn overflow_at(&self) -> usize {
        self.offsets_at() + self.count as usize * 4
    }

    fn oid_bytes(&self, position: u32) -> &[u8] {
        let len = self.algo.digest_len();
        let at = self.oids_at() + position as usize * len;
        &self.map[at..at + len]
    }

    /// Digest at a sorted table position.
    pub fn oid_at(&self, position: u32) -> ObjectId {
        ObjectId::from_bytes(self.oid_bytes(position), self.algo).expect("digest width")
    }

    /// Pack offset at a sorted table position.
    pub fn offset_at(&self, position: u32) -> u64 {
        let at = self.offsets_at() + position as usize * 4;
        let raw = u32::from_be_bytes(self.map[at..at + 4].try_into().expect("4 bytes"));
        if raw & 0x8000_0000 == 0 {
            return u64::from(raw);
        }
        let slot = (raw & 0x7fff_ffff) as usize;
        let at = self.overflow_at() + slot * 8;
        u64::from_be_bytes(self.map[at..at + 8].try_into().expect("8 bytes"))
    }

    /// CRC32 at a sorted table position.
    pub fn crc32_at(&self, position: u32) -> u32 {
        let at = self.crcs_at() + position as usize * 4;
        u32::from_be_bytes(self.map[at..at + 4].try_into().expect("4 bytes"))
    }

    /// Binary search narrowed by the fanout bucket of the first byte.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u64> {
        self.position_of(oid).map(|p| self.offset_at(p))
    }

    /// The sorted table position of `oid`, if present.
    pub fn position_of(&self, oid: &ObjectId) -> Option<u32> {
        let bucket = oid.first_byte();
        let mut lo = if bucket == 0 {
            0
        } else {
            self.fanout(bucket - 1)
        };
        let mut hi = self.fanout(bucket);
        let target = oid.as_bytes();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.oid_bytes(mid).cmp(target) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// All ids whose digest starts with `prefix`, with their offsets.
    pub fn lookup_prefix(&self, prefix: &[u8]) -> Vec<(ObjectId, u64)> {
        let Some(&bucket) = prefix.first() else {
            return Vec::new();
        };
        let lo = if bucket == 0 {
            0
        } else {
            self.fanout(bucket - 1)
        };
        let hi = self.fanout(bucket);

        (lo..hi)
            .filter(|&p| self.oid_bytes(p).starts_with(prefix))
            .map(|p| (self.oid_at(p), self.offset_at(p)))
            .collect()
    }

    /// Pack digest recorded in the trailer.
    pub fn pack_checksum(&self) -> ObjectId {
        let len = self.algo.digest_len();
        let at = self.map.len() - 2 * len;
        ObjectId::from_bytes(&self.map[at..at + len], self.algo).expect("digest width")
    }

    /// The index file's own trailing digest.
    pub fn index_checksum(&self) -> ObjectId {
        let len = self.algo.digest_len();
        let at = self.map.len() - len;
        ObjectId::from_bytes(&self.map[at..], self.algo).expect("digest width")
    }

    /// `(oid, offset)` pairs in digest order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (ObjectId, u64)> + '_ {
        (0..self.count).map(|p| (self.oid_at(p), self.offset_at(p)))
    }

    /// Fanout must be monotone and agree with the table.
    pub(crate) fn check_fanout(&self) -> Result<(), PackError> {
        let mut prev = 0;
        for bucket in 0u16..=255 {
            let n = self.fanout(bucket as u8);
            if n < prev {
                return Err(PackError::BadIndex(format!(
                    "fanout decreases at bucket {bucket}"
                )));
            }
            prev = n;
        }
        for position in 1..self.count {
            if self.oid_bytes(position - 1) >= self.oid_bytes(position) {
                return Err(PackError::BadIndex(format!(
                    "digest table not sorted at position {position}"
                )));
            }
        }
        for position in 0..self.count {
            let bucket = self.oid_bytes(position)[0];
            let lo = if bucket == 0 {
                0
            } else {
                self.fanout(bucket - 1)
            };
            if !(lo..self.fanout(bucket)).contains(&position) {
                return Err(PackError::BadIndex(format!(
                    "fanout disagrees with table at position {position}"
                )));
            }
        }
        Ok(())
    }
}
