//! Pack index (v2) generation.

use std::path::{Path, PathBuf};

use grit_hash::{hasher::Hasher, HashAlgorithm, ObjectId};

use crate::{PackError, IDX_SIGNATURE, IDX_VERSION};

/// Serialize an index for `entries` (`(oid, offset, crc32)`); the slice is
/// sorted by digest in place. `pack_checksum` is the pack's trailer digest.
pub fn index_bytes(
    entries: &mut [(ObjectId, u64, u32)],
    pack_checksum: &ObjectId,
    algo: HashAlgorithm,
) -> Result<Vec<u8>, PackError> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = Vec::new();
    out.extend_from_slice(&IDX_SIGNATURE);
    out.extend_from_slice(&IDX_VERSION.to_be_bytes());

    // Cumulative fanout.
    let mut fanout = [0u32; 256];
    for (oid, _, _) in entries.iter() {
        fanout[oid.first_byte() as usize] += 1;
    }
    for bucket in 1..256 {
        fanout[bucket] += fanout[bucket - 1];
    }
    for n in fanout {
        out.extend_from_slice(&n.to_be_bytes());
    }

    for (oid, _, _) in entries.iter() {
        out.extend_from_slice(oid.as_bytes());
    }
    for (_, _, crc) in entries.iter() {
        out.extend_from_slice(&crc.to_be_bytes());
    }

    // 31-bit offsets; anything wider goes to the overflow table.
    let mut overflow: Vec<u64> = Vec::new();
    for (_, offset, _) in entries.iter() {
        if *offset < 0x8000_0000 {
            out.extend_from_slice(&(*offset as u32).to_be_bytes());
        } else {
            let slot = overflow.len() as u32;
            out.extend_from_slice(&(0x8000_0000 | slot).to_be_bytes());
            overflow.push(*offset);
        }
    }
    for offset in overflow {
        out.extend_from_slice(&offset.to_be_bytes());
    }

    out.extend_from_slice(pack_checksum.as_bytes());
    let own = Hasher::digest(algo, &out)?;
    out.extend_from_slice(own.as_bytes());
    Ok(out)
}

/// Write the index next to a pack.
pub fn write_index_file(
    idx_path: &Path,
    entries: &mut [(ObjectId, u64, u32)],
    pack_checksum: &ObjectId,
    algo: HashAlgorithm,
) -> Result<PathBuf, PackError> {
    let bytes = index_bytes(entries, pack_checksum, algo)?;
    std::fs::write(idx_path, bytes)?;
    Ok(idx_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PackIndex;

    fn oid(first: u8, last: u8) -> ObjectId {
        let mut d = [0u8; 20];
        d[0] = first;
        d[19] = last;
        ObjectId::from_bytes(&d, HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn written_index_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack-test.idx");
        let mut entries = vec![
            (oid(0x50, 1), 900, 3),
            (oid(0x05, 1), 12, 1),
            (oid(0xf0, 1), 5000, 2),
        ];
        write_index_file(&path, &mut entries, &ObjectId::ZERO_SHA1, HashAlgorithm::Sha1)
            .unwrap();

        let idx = PackIndex::open(&path).unwrap();
        assert_eq!(idx.len(), 3);
        for (oid, offset, crc) in &entries {
            let position = idx.position_of(oid).unwrap();
            assert_eq!(idx.offset_at(position), *offset);
            assert_eq!(idx.crc32_at(position), *crc);
        }
        assert_eq!(idx.pack_checksum(), ObjectId::ZERO_SHA1);
    }

    #[test]
    fn index_checksum_covers_contents() {
        let mut entries = vec![(oid(0x01, 1), 12, 0)];
        let bytes =
            index_bytes(&mut entries, &ObjectId::ZERO_SHA1, HashAlgorithm::Sha1).unwrap();
        let body = &bytes[..bytes.len() - 20];
        let trailer = &bytes[bytes.len() - 20..];
        let computed = Hasher::digest(HashAlgorithm::Sha1, body).unwrap();
        assert_eq!(computed.as_bytes(), trailer);
    }
}
