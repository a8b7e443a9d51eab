//! The loose object header: `"<type-name> <decimal-size>\0"`.

use crate::{ObjectError, ObjectType};

/// Parse a loose header from the front of `data`.
///
/// Returns `(type, declared_size, header_len)`; `header_len` counts the NUL.
pub fn parse(data: &[u8]) -> Result<(ObjectType, usize, usize), ObjectError> {
    let nul = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ObjectError::BadHeader("missing NUL terminator".into()))?;
    let head = &data[..nul];

    let space = head
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| ObjectError::BadHeader("missing space".into()))?;

    let obj_type = ObjectType::from_name(&head[..space])?;
    let size_text = std::str::from_utf8(&head[space + 1..])
        .map_err(|_| ObjectError::BadHeader("size is not ASCII".into()))?;
    let size = size_text
        .parse::<usize>()
        .map_err(|_| ObjectError::BadHeader(format!("bad size: {size_text:?}")))?;

    Ok((obj_type, size, nul + 1))
}

/// Render the loose header for an object of the given type and content size.
pub fn write(obj_type: ObjectType, size: usize) -> Vec<u8> {
    format!("{} {}\0", obj_type.name(), size).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_blob() {
        let (ty, size, len) = parse(b"blob 11\0hello world").unwrap();
        assert_eq!(ty, ObjectType::Blob);
        assert_eq!(size, 11);
        assert_eq!(len, 8);
    }

    #[test]
    fn write_parse_roundtrip() {
        for (ty, size) in [
            (ObjectType::Commit, 0),
            (ObjectType::Tree, 37),
            (ObjectType::Tag, 123_456),
        ] {
            let hdr = write(ty, size);
            let (ty2, size2, len) = parse(&hdr).unwrap();
            assert_eq!((ty2, size2, len), (ty, size, hdr.len()));
        }
    }

    #[test]
    fn malformed_headers_rejected() {
        assert!(parse(b"blob 11").is_err()); // no NUL
        assert!(parse(b"blob11\0").is_err()); // no space
        assert!(parse(b"blob xy\0").is_err()); // non-numeric size
        assert!(parse(b"wurst 3\0").is_err()); // unknown type
    }
}
