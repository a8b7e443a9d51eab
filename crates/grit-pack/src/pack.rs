//! Random access over a finalized `.pack`/`.idx` pair.
//!
//! Reconstruction walks the delta chain outward to a non-delta base (50
//! links at most), then applies the collected deltas back inward. Bases hit
//! along the way are served from a small LRU so adjacent lookups do not
//! re-walk shared chains.

use std::io::Read;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::bufread::ZlibDecoder;
use grit_hash::{HashAlgorithm, ObjectId};
use grit_object::ObjectType;
use lru::LruCache;
use memmap2::Mmap;

use crate::index::PackIndex;
use crate::{
    delta, entry, EntryKind, PackError, PackedObject, MAX_DELTA_DEPTH, PACK_HEADER_LEN,
    PACK_SIGNATURE, PACK_VERSION,
};

const BASE_CACHE_SLOTS: usize = 64;

/// A memory-mapped pack with its index.
pub struct PackFile {
    map: Mmap,
    index: PackIndex,
    algo: HashAlgorithm,
    count: u32,
    path: PathBuf,
    base_cache: Mutex<LruCache<u64, (ObjectType, Vec<u8>)>>,
}

impl PackFile {
    /// Open `<name>.pack` and its `<name>.idx` sibling.
    pub fn open(pack_path: impl AsRef<Path>) -> Result<Self, PackError> {
        Self::open_with(pack_path, HashAlgorithm::Sha1)
    }

    pub fn open_with(
        pack_path: impl AsRef<Path>,
        algo: HashAlgorithm,
    ) -> Result<Self, PackError> {
        let path = pack_path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        let map = unsafe { Mmap::map(&file)? };

        if map.len() < PACK_HEADER_LEN + algo.digest_len() {
            return Err(PackError::BadSignature);
        }
        if &map[..4] != PACK_SIGNATURE {
            return Err(PackError::BadSignature);
        }
        let version = u32::from_be_bytes(map[4..8].try_into().expect("4 bytes"));
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let count = u32::from_be_bytes(map[8..12].try_into().expect("4 bytes"));

        let index = PackIndex::open_with(path.with_extension("idx"), algo)?;
        if index.len() != count {
            return Err(PackError::BadIndex(format!(
                "pack holds {count} objects, index {}",
                index.len()
            )));
        }

        Ok(Self {
            map,
            index,
            algo,
            count,
            path,
            base_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(BASE_CACHE_SLOTS).expect("non-zero"),
            )),
        })
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index.lookup(oid).is_some()
    }

    /// Read an object by id; `None` when this pack does not hold it.
    pub fn read(&self, oid: &ObjectId) -> Result<Option<PackedObject>, PackError> {
        self.read_with(oid, |_| None)
    }

    /// As [`read`](Self::read), with a resolver for thin REF_DELTA bases
    /// stored outside this pack.
    pub fn read_with(
        &self,
        oid: &ObjectId,
        resolve_base: impl Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<Option<PackedObject>, PackError> {
        match self.index.lookup(oid) {
            Some(offset) => self.read_at(offset, &resolve_base).map(Some),
            None => Ok(None),
        }
    }

    /// Read the object whose entry starts at `offset`.
    pub fn read_at(
        &self,
        offset: u64,
        resolve_base: &dyn Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<PackedObject, PackError> {
        // Outward pass: collect delta payloads until a resolvable base.
        let mut deltas: Vec<Vec<u8>> = Vec::new();
        let mut at = offset;

        let (base_type, mut data) = loop {
            if deltas.len() > MAX_DELTA_DEPTH {
                return Err(PackError::ChainTooDeep(offset));
            }
            if let Some(hit) = self.cached(at) {
                break hit;
            }

            let (header, payload) = self.entry_at(at)?;
            match header.kind {
                EntryKind::Commit | EntryKind::Tree | EntryKind::Blob | EntryKind::Tag => {
                    break (header.kind.object_type().expect("non-delta"), payload);
                }
                EntryKind::OfsDelta { base_offset } => {
                    deltas.push(payload);
                    at = base_offset;
                }
                EntryKind::RefDelta { base } => {
                    deltas.push(payload);
                    match self.index.lookup(&base) {
                        Some(base_offset) => at = base_offset,
                        None => match resolve_base(&base) {
                            Some(external) => break external,
                            None => return Err(PackError::MissingBase(base)),
                        },
                    }
                }
            }
        };

        // Inward pass.
        for payload in deltas.iter().rev() {
            data = delta::apply::apply(&data, payload)?;
        }

        self.cache(offset, base_type, &data);
        Ok(PackedObject {
            obj_type: base_type,
            data,
        })
    }

    /// Decompress the raw (possibly delta) payload of the entry at `offset`.
    fn entry_at(&self, offset: u64) -> Result<(entry::EntryHeader, Vec<u8>), PackError> {
        let start = offset as usize;
        let body_end = self.map.len() - self.algo.digest_len();
        if start >= body_end {
            return Err(PackError::CorruptEntry(offset));
        }

        let header = entry::parse(&self.map[start..body_end], offset, self.algo)?;
        let data_start = start + header.header_len;

        let mut z = ZlibDecoder::new(&self.map[data_start..body_end]);
        let mut payload = Vec::with_capacity(header.size);
        z.read_to_end(&mut payload).map_err(|source| PackError::Zlib {
            offset,
            source,
        })?;
        if payload.len() != header.size {
            return Err(PackError::SizeMismatch {
                offset,
                declared: header.size,
                actual: payload.len(),
            });
        }
        Ok((header, payload))
    }

    fn cached(&self, offset: u64) -> Option<(ObjectType, Vec<u8>)> {
        self.base_cache
            .lock()
            .expect("lock poisoned")
            .get(&offset)
            .cloned()
    }

    fn cache(&self, offset: u64, obj_type: ObjectType, data: &[u8]) {
        self.base_cache
            .lock()
            .expect("lock poisoned")
            .put(offset, (obj_type, data.to_vec()));
    }

    /// The pack's trailing digest.
    pub fn checksum(&self) -> Result<ObjectId, PackError> {
        let at = self.map.len() - self.algo.digest_len();
        Ok(ObjectId::from_bytes(&self.map[at..], self.algo)?)
    }

    /// Raw pack bytes (header, entries, trailer).
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }
}
