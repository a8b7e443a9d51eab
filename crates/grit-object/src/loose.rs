//! Whole-object loose encoding: header + content, zlib-compressed as one
//! stream. This is the format non-pack object files use on disk.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::{header, ObjectError, ObjectType};

/// Compress `(type, content)` into loose form.
pub fn encode(obj_type: ObjectType, content: &[u8]) -> Result<Vec<u8>, ObjectError> {
    let mut out = Vec::new();
    let mut z = ZlibEncoder::new(&mut out, Compression::default());
    z.write_all(&header::write(obj_type, content.len()))
        .and_then(|_| z.write_all(content))
        .and_then(|_| z.finish().map(|_| ()))
        .map_err(ObjectError::Zlib)?;
    Ok(out)
}

/// Decompress a loose buffer back into `(type, content)`.
///
/// The declared size must match the decompressed content exactly.
pub fn decode(data: &[u8]) -> Result<(ObjectType, Vec<u8>), ObjectError> {
    let mut raw = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut raw)
        .map_err(ObjectError::Zlib)?;

    let (obj_type, size, header_len) = header::parse(&raw)?;
    let content = raw.split_off(header_len);
    if content.len() != size {
        return Err(ObjectError::SizeMismatch {
            declared: size,
            actual: content.len(),
        });
    }
    Ok((obj_type, content))
}
