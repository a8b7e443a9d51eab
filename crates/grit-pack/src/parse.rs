//! Pack-order decoding with delta resolution.
//!
//! [`PackParser`] walks a fully received pack buffer entry by entry,
//! resolving each object as it is reached. Entries are kept in an
//! append-only arena addressed by pack offset, so an OFS_DELTA points at an
//! arena slot rather than at another owning value; REF_DELTA bases missing
//! from the pack are looked up through the external resolver and fail with
//! [`PackError::MissingBase`] when nobody has them.

use std::collections::HashMap;
use std::io::Read;

use flate2::bufread::ZlibDecoder;
use grit_hash::{hasher::Hasher, HashAlgorithm, ObjectId};
use grit_object::ObjectType;

use crate::{
    delta, entry, EntryKind, PackError, MAX_DELTA_DEPTH, PACK_HEADER_LEN, PACK_SIGNATURE,
    PACK_VERSION,
};

/// Resolver for delta bases that live outside the pack.
pub type BaseResolver<'a> = dyn Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)> + Send + 'a;

/// One object surfaced in pack order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedObject {
    pub oid: ObjectId,
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
    /// Offset of the entry inside the pack.
    pub offset: u64,
    /// CRC32 of the entry's raw pack bytes, as recorded in the index.
    pub crc32: u32,
}

struct ArenaSlot {
    obj_type: ObjectType,
    data: Vec<u8>,
    depth: usize,
}

/// Streaming-order pack decoder over an in-memory buffer.
///
/// Implements `Iterator`; dropping it early abandons the remaining entries.
/// The trailer digest is checked against the buffer up front, so a
/// truncated or corrupted pack fails before any object is surfaced.
pub struct PackParser<'a> {
    data: &'a [u8],
    algo: HashAlgorithm,
    resolver: Option<Box<BaseResolver<'a>>>,
    count: u32,
    produced: u32,
    pos: usize,
    trailer_at: usize,
    checksum: ObjectId,
    by_offset: HashMap<u64, usize>,
    by_oid: HashMap<ObjectId, usize>,
    arena: Vec<ArenaSlot>,
}

impl std::fmt::Debug for PackParser<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackParser")
            .field("algo", &self.algo)
            .field("count", &self.count)
            .field("produced", &self.produced)
            .field("pos", &self.pos)
            .field("trailer_at", &self.trailer_at)
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl<'a> PackParser<'a> {
    /// Validate the header and trailer of `data` and position at the first
    /// entry.
    pub fn new(data: &'a [u8], algo: HashAlgorithm) -> Result<Self, PackError> {
        let digest_len = algo.digest_len();
        if data.len() < PACK_HEADER_LEN + digest_len {
            return Err(PackError::BadSignature);
        }
        if &data[..4] != PACK_SIGNATURE {
            return Err(PackError::BadSignature);
        }
        let version = u32::from_be_bytes(data[4..8].try_into().expect("4 bytes"));
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let count = u32::from_be_bytes(data[8..12].try_into().expect("4 bytes"));

        let trailer_at = data.len() - digest_len;
        let actual = Hasher::digest(algo, &data[..trailer_at])?;
        let expected = ObjectId::from_bytes(&data[trailer_at..], algo)?;
        if actual != expected {
            return Err(PackError::HashMismatch { expected, actual });
        }

        tracing::debug!(target: "grit::pack", count, bytes = data.len(), "parsing pack");

        Ok(Self {
            data,
            algo,
            resolver: None,
            count,
            produced: 0,
            pos: PACK_HEADER_LEN,
            trailer_at,
            checksum: expected,
            by_offset: HashMap::new(),
            by_oid: HashMap::new(),
            arena: Vec::with_capacity(count as usize),
        })
    }

    /// Attach a resolver for REF_DELTA bases not contained in the pack.
    pub fn with_resolver(mut self, resolver: Box<BaseResolver<'a>>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Declared object count.
    pub fn object_count(&self) -> u32 {
        self.count
    }

    /// The pack's trailing digest (already verified).
    pub fn checksum(&self) -> ObjectId {
        self.checksum
    }

    fn decompress_at(&self, data_start: usize, declared: usize) -> Result<(Vec<u8>, usize), PackError> {
        let offset = data_start as u64;
        let mut z = ZlibDecoder::new(&self.data[data_start..self.trailer_at]);
        let mut out = Vec::with_capacity(declared);
        z.read_to_end(&mut out)
            .map_err(|source| PackError::Zlib { offset, source })?;
        Ok((out, z.total_in() as usize))
    }

    fn next_entry(&mut self) -> Result<DecodedObject, PackError> {
        let entry_offset = self.pos as u64;
        let header = entry::parse(&self.data[self.pos..self.trailer_at], entry_offset, self.algo)?;
        let data_start = self.pos + header.header_len;

        let (payload, compressed_len) = self.decompress_at(data_start, header.size)?;
        if payload.len() != header.size {
            return Err(PackError::SizeMismatch {
                offset: entry_offset,
                declared: header.size,
                actual: payload.len(),
            });
        }
        let entry_end = data_start + compressed_len;

        let crc32 = {
            let mut h = crc32fast::Hasher::new();
            h.update(&self.data[self.pos..entry_end]);
            h.finalize()
        };

        let (obj_type, resolved, depth) = match header.kind {
            EntryKind::Commit | EntryKind::Tree | EntryKind::Blob | EntryKind::Tag => {
                let ty = header.kind.object_type().expect("non-delta kind");
                (ty, payload, 0)
            }
            EntryKind::OfsDelta { base_offset } => {
                let slot = *self
                    .by_offset
                    .get(&base_offset)
                    .ok_or(PackError::CorruptEntry(entry_offset))?;
                let base = &self.arena[slot];
                if base.depth + 1 > MAX_DELTA_DEPTH {
                    return Err(PackError::ChainTooDeep(entry_offset));
                }
                let data = delta::apply::apply(&base.data, &payload)?;
                (base.obj_type, data, base.depth + 1)
            }
            EntryKind::RefDelta { base } => match self.by_oid.get(&base) {
                Some(&slot) => {
                    let slot = &self.arena[slot];
                    if slot.depth + 1 > MAX_DELTA_DEPTH {
                        return Err(PackError::ChainTooDeep(entry_offset));
                    }
                    let data = delta::apply::apply(&slot.data, &payload)?;
                    (slot.obj_type, data, slot.depth + 1)
                }
                None => {
                    let (ty, base_data) = self
                        .resolver
                        .as_ref()
                        .and_then(|r| r(&base))
                        .ok_or(PackError::MissingBase(base))?;
                    let data = delta::apply::apply(&base_data, &payload)?;
                    (ty, data, 1)
                }
            },
        };

        let oid = Hasher::object_id(self.algo, obj_type.name(), &resolved)?;

        let slot = self.arena.len();
        self.arena.push(ArenaSlot {
            obj_type,
            data: resolved.clone(),
            depth,
        });
        self.by_offset.insert(entry_offset, slot);
        self.by_oid.insert(oid, slot);

        self.pos = entry_end;
        self.produced += 1;

        Ok(DecodedObject {
            oid,
            obj_type,
            data: resolved,
            offset: entry_offset,
            crc32,
        })
    }
}

impl Iterator for PackParser<'_> {
    type Item = Result<DecodedObject, PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.produced == self.count {
            // All entries consumed: the read position must land exactly on
            // the trailer.
            if self.pos != self.trailer_at {
                self.produced = self.count.wrapping_add(1);
                return Some(Err(PackError::CorruptEntry(self.pos as u64)));
            }
            return None;
        }
        if self.produced > self.count {
            return None;
        }
        match self.next_entry() {
            Ok(obj) => Some(Ok(obj)),
            Err(err) => {
                // Poison further iteration.
                self.produced = self.count.wrapping_add(1);
                Some(Err(err))
            }
        }
    }
}

/// Decode a pack on a worker thread, surfacing objects through a bounded
/// queue so the caller can process object N while N+1 is being parsed.
pub fn decode_in_background(
    data: Vec<u8>,
    algo: HashAlgorithm,
    resolver: Option<Box<dyn Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)> + Send + 'static>>,
    queue_len: usize,
) -> crossbeam::channel::Receiver<Result<DecodedObject, PackError>> {
    let (tx, rx) = crossbeam::channel::bounded(queue_len);
    std::thread::spawn(move || {
        let parser = match PackParser::new(&data, algo) {
            Ok(p) => p,
            Err(err) => {
                let _ = tx.send(Err(err));
                return;
            }
        };
        let parser = match resolver {
            Some(r) => parser.with_resolver(r),
            None => parser,
        };
        for item in parser {
            // Receiver dropped means the caller stopped early; just exit.
            if tx.send(item).is_err() {
                return;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut z = ZlibEncoder::new(&mut out, Compression::default());
        z.write_all(data).unwrap();
        z.finish().unwrap();
        out
    }

    /// Hand-assemble a pack from raw (code, header-extra, payload) entries.
    fn assemble(entries: &[(u8, Vec<u8>, Vec<u8>)]) -> Vec<u8> {
        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for (code, extra, payload) in entries {
            pack.extend_from_slice(&crate::entry::encode(*code, payload.len() as u64));
            pack.extend_from_slice(extra);
            pack.extend_from_slice(&zlib(payload));
        }
        let digest = Hasher::digest(HashAlgorithm::Sha1, &pack).unwrap();
        pack.extend_from_slice(digest.as_bytes());
        pack
    }

    #[test]
    fn empty_pack_verifies_header_hash() {
        let pack = assemble(&[]);
        let parser = PackParser::new(&pack, HashAlgorithm::Sha1).unwrap();
        assert_eq!(parser.object_count(), 0);
        assert_eq!(parser.count(), 0);
    }

    #[test]
    fn single_blob() {
        let pack = assemble(&[(3, vec![], b"hello world".to_vec())]);
        let objects: Vec<_> = PackParser::new(&pack, HashAlgorithm::Sha1)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].obj_type, ObjectType::Blob);
        assert_eq!(objects[0].data, b"hello world");
        assert_eq!(
            objects[0].oid.to_hex(),
            "95d09f2b10159347eece71399a7e2e907ea3df4f"
        );
        assert_eq!(objects[0].offset, PACK_HEADER_LEN as u64);
    }

    #[test]
    fn ofs_delta_resolves_against_earlier_entry() {
        let base = b"the base content of this test blob".to_vec();
        let target = b"the base content of this test blob, amended".to_vec();
        let delta_stream = crate::delta::compute::compute(&base, &target);

        // First build with a placeholder to learn the base entry's span.
        let base_entry_offset = PACK_HEADER_LEN as u64;
        let base_span =
            crate::entry::encode(3, base.len() as u64).len() + zlib(&base).len();
        let delta_entry_offset = base_entry_offset + base_span as u64;
        let distance = delta_entry_offset - base_entry_offset;

        let pack = assemble(&[
            (3, vec![], base.clone()),
            (
                6,
                crate::entry::encode_ofs_distance(distance),
                delta_stream,
            ),
        ]);

        let objects: Vec<_> = PackParser::new(&pack, HashAlgorithm::Sha1)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1].obj_type, ObjectType::Blob);
        assert_eq!(objects[1].data, target);
    }

    #[test]
    fn ref_delta_uses_external_resolver() {
        let base = b"external base object bytes".to_vec();
        let target = b"external base object bytes plus tail".to_vec();
        let base_oid = Hasher::object_id(HashAlgorithm::Sha1, "blob", &base).unwrap();
        let delta_stream = crate::delta::compute::compute(&base, &target);

        let pack = assemble(&[(7, base_oid.as_bytes().to_vec(), delta_stream)]);

        let base_for_resolver = base.clone();
        let objects: Vec<_> = PackParser::new(&pack, HashAlgorithm::Sha1)
            .unwrap()
            .with_resolver(Box::new(move |oid| {
                (*oid == base_oid).then(|| (ObjectType::Blob, base_for_resolver.clone()))
            }))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(objects[0].data, target);
    }

    #[test]
    fn ref_delta_without_base_fails() {
        let delta_stream = crate::delta::compute::compute(b"x", b"y");
        let missing = ObjectId::from_hex("1111111111111111111111111111111111111111").unwrap();
        let pack = assemble(&[(7, missing.as_bytes().to_vec(), delta_stream)]);

        let err = PackParser::new(&pack, HashAlgorithm::Sha1)
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PackError::MissingBase(oid) if oid == missing));
    }

    #[test]
    fn corrupted_trailer_rejected_up_front() {
        let mut pack = assemble(&[(3, vec![], b"payload".to_vec())]);
        let last = pack.len() - 1;
        pack[last] ^= 0x01;
        assert!(matches!(
            PackParser::new(&pack, HashAlgorithm::Sha1).unwrap_err(),
            PackError::HashMismatch { .. }
        ));
    }

    #[test]
    fn bad_signature_and_version_rejected() {
        let mut pack = assemble(&[]);
        pack[0] = b'K';
        assert!(matches!(
            PackParser::new(&pack, HashAlgorithm::Sha1).unwrap_err(),
            PackError::BadSignature
        ));

        let mut pack = assemble(&[]);
        pack[7] = 3;
        // trailer no longer matches either, but the version check runs first
        assert!(matches!(
            PackParser::new(&pack, HashAlgorithm::Sha1).unwrap_err(),
            PackError::UnsupportedVersion(3)
        ));
    }

    #[test]
    fn declared_size_mismatch_rejected() {
        let payload = b"actual payload".to_vec();
        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&1u32.to_be_bytes());
        pack.extend_from_slice(&crate::entry::encode(3, payload.len() as u64 + 4));
        pack.extend_from_slice(&zlib(&payload));
        let digest = Hasher::digest(HashAlgorithm::Sha1, &pack).unwrap();
        pack.extend_from_slice(digest.as_bytes());

        let err = PackParser::new(&pack, HashAlgorithm::Sha1)
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PackError::SizeMismatch { .. }));
    }

    #[test]
    fn background_decode_preserves_order() {
        let pack = assemble(&[
            (3, vec![], b"first".to_vec()),
            (3, vec![], b"second".to_vec()),
            (3, vec![], b"third".to_vec()),
        ]);
        let rx = decode_in_background(pack, HashAlgorithm::Sha1, None, 2);
        let datas: Vec<Vec<u8>> = rx.iter().map(|r| r.unwrap().data).collect();
        assert_eq!(datas, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
    }
}
