//! Pack and index integrity checks.

use grit_hash::{hasher::Hasher, HashAlgorithm, ObjectId};

use crate::pack::PackFile;
use crate::parse::PackParser;
use crate::PackError;

/// What a verification pass established.
#[derive(Debug)]
pub struct VerifyReport {
    pub objects: u32,
    pub checksum: ObjectId,
}

/// Fully decode a raw pack buffer, checking the trailer digest, every entry
/// header, every zlib stream, and every delta chain.
pub fn verify_pack_bytes(data: &[u8], algo: HashAlgorithm) -> Result<VerifyReport, PackError> {
    let parser = PackParser::new(data, algo)?;
    let checksum = parser.checksum();
    let mut objects = 0;
    for item in parser {
        item?;
        objects += 1;
    }
    Ok(VerifyReport { objects, checksum })
}

/// Cross-check a finalized pack/index pair: trailer digests agree, the
/// fanout is consistent, and each entry's recorded CRC32 matches its pack
/// bytes.
pub fn verify_pack_file(pack: &PackFile) -> Result<VerifyReport, PackError> {
    let index = pack.index();
    index.check_fanout()?;

    let pack_checksum = pack.checksum()?;
    if index.pack_checksum() != pack_checksum {
        return Err(PackError::BadIndex(format!(
            "index records pack checksum {}, pack has {}",
            index.pack_checksum(),
            pack_checksum
        )));
    }

    // Index's own trailer.
    let idx_bytes = std::fs::read(index.path())?;
    let digest_len = pack_checksum.algorithm().digest_len();
    let body = &idx_bytes[..idx_bytes.len() - digest_len];
    if Hasher::digest(pack_checksum.algorithm(), body)? != index.index_checksum() {
        return Err(PackError::BadIndex("index checksum mismatch".into()));
    }

    // Entry CRCs: recompute from the raw bytes between consecutive offsets.
    let mut offsets: Vec<(u64, u32)> = (0..index.len())
        .map(|p| (index.offset_at(p), index.crc32_at(p)))
        .collect();
    offsets.sort_unstable();
    let body_end = (pack.bytes().len() - digest_len) as u64;
    for (i, (offset, recorded)) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).map(|(o, _)| *o).unwrap_or(body_end);
        let mut h = crc32fast::Hasher::new();
        h.update(&pack.bytes()[*offset as usize..end as usize]);
        if h.finalize() != *recorded {
            return Err(PackError::BadIndex(format!(
                "CRC mismatch for entry at offset {offset}"
            )));
        }
    }

    Ok(VerifyReport {
        objects: pack.len(),
        checksum: pack_checksum,
    })
}
