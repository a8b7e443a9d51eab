use bstr::{BString, ByteSlice};
use grit_hash::ObjectId;

use crate::{ObjectError, ObjectType, Signature};

/// An annotated tag object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Id of the tagged object.
    pub target: ObjectId,
    /// Type of the tagged object.
    pub target_type: ObjectType,
    pub name: BString,
    /// Absent on some ancient tags.
    pub tagger: Option<Signature>,
    pub message: BString,
}

impl Tag {
    /// Parse tag content (no loose header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut target = None;
        let mut target_type = None;
        let mut name = None;
        let mut tagger = None;

        let mut pos = 0;
        while pos < content.len() && content[pos] != b'\n' {
            let line_end = content[pos..]
                .find_byte(b'\n')
                .map(|p| p + pos)
                .unwrap_or(content.len());
            let line = &content[pos..line_end];
            pos = (line_end + 1).min(content.len());

            let Some(space) = line.find_byte(b' ') else {
                continue;
            };
            let (key, value) = (&line[..space], &line[space + 1..]);
            match key {
                b"object" => {
                    let hex = std::str::from_utf8(value)
                        .map_err(|_| ObjectError::BadHeader("non-ASCII object id".into()))?;
                    target = Some(ObjectId::from_hex(hex)?);
                }
                b"type" => target_type = Some(ObjectType::from_name(value)?),
                b"tag" => name = Some(BString::from(value)),
                b"tagger" => tagger = Some(Signature::parse(value.as_bstr())?),
                _ => {}
            }
        }

        if pos < content.len() && content[pos] == b'\n' {
            pos += 1;
        }

        Ok(Self {
            target: target.ok_or(ObjectError::MissingTagHeader("object"))?,
            target_type: target_type.ok_or(ObjectError::MissingTagHeader("type"))?,
            name: name.ok_or(ObjectError::MissingTagHeader("tag"))?,
            tagger,
            message: BString::from(&content[pos..]),
        })
    }

    /// Serialize to canonical content bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"object ");
        out.extend_from_slice(self.target.to_hex().as_bytes());
        out.extend_from_slice(b"\ntype ");
        out.extend_from_slice(self.target_type.name().as_bytes());
        out.extend_from_slice(b"\ntag ");
        out.extend_from_slice(&self.name);
        out.push(b'\n');
        if let Some(ref tagger) = self.tagger {
            out.extend_from_slice(b"tagger ");
            out.extend_from_slice(&tagger.to_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}
