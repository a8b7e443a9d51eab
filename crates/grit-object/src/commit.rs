use bstr::{BStr, BString, ByteSlice};
use grit_hash::ObjectId;

use crate::{ObjectError, Signature};

/// A commit object.
///
/// Headers come first (`tree`, zero or more `parent`s, `author`,
/// `committer`, optional `encoding`/`gpgsig`, anything else preserved in
/// `extra_headers`), then a blank line, then the free-form message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub encoding: Option<BString>,
    pub gpgsig: Option<BString>,
    /// Unrecognized headers, kept verbatim so serialization round-trips.
    pub extra_headers: Vec<(BString, BString)>,
    pub message: BString,
}

/// One logical header: `key value`, where continuation lines (leading space)
/// fold into the value joined by `\n`.
fn next_header(data: &[u8], pos: &mut usize) -> Option<(BString, BString)> {
    if *pos >= data.len() || data[*pos] == b'\n' {
        return None;
    }
    let line_end = data[*pos..]
        .find_byte(b'\n')
        .map(|p| p + *pos)
        .unwrap_or(data.len());
    let line = &data[*pos..line_end];
    *pos = (line_end + 1).min(data.len());

    let space = line.find_byte(b' ').unwrap_or(line.len());
    let key = BString::from(&line[..space]);
    let mut value = BString::from(line.get(space + 1..).unwrap_or_default());

    // Fold continuation lines.
    while *pos < data.len() && data[*pos] == b' ' {
        let cont_end = data[*pos..]
            .find_byte(b'\n')
            .map(|p| p + *pos)
            .unwrap_or(data.len());
        value.push(b'\n');
        value.extend_from_slice(&data[*pos + 1..cont_end]);
        *pos = (cont_end + 1).min(data.len());
    }

    Some((key, value))
}

fn oid_from_value(value: &BStr) -> Result<ObjectId, ObjectError> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| ObjectError::BadHeader("non-ASCII object id".into()))?;
    Ok(ObjectId::from_hex(hex.trim())?)
}

impl Commit {
    /// Parse commit content (no loose header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut encoding = None;
        let mut gpgsig = None;
        let mut extra_headers = Vec::new();

        let mut pos = 0;
        while let Some((key, value)) = next_header(content, &mut pos) {
            match key.as_slice() {
                b"tree" => tree = Some(oid_from_value(value.as_bstr())?),
                b"parent" => parents.push(oid_from_value(value.as_bstr())?),
                b"author" => author = Some(Signature::parse(value.as_bstr())?),
                b"committer" => committer = Some(Signature::parse(value.as_bstr())?),
                b"encoding" => encoding = Some(value),
                b"gpgsig" => gpgsig = Some(value),
                _ => extra_headers.push((key, value)),
            }
        }

        // Skip the blank separator if present; the rest is the message.
        if pos < content.len() && content[pos] == b'\n' {
            pos += 1;
        }

        Ok(Self {
            tree: tree.ok_or(ObjectError::MissingCommitHeader("tree"))?,
            parents,
            author: author.ok_or(ObjectError::MissingCommitHeader("author"))?,
            committer: committer.ok_or(ObjectError::MissingCommitHeader("committer"))?,
            encoding,
            gpgsig,
            extra_headers,
            message: BString::from(&content[pos..]),
        })
    }

    /// Serialize to canonical content bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_header(&mut out, b"tree", self.tree.to_hex().as_bytes());
        for parent in &self.parents {
            push_header(&mut out, b"parent", parent.to_hex().as_bytes());
        }
        push_header(&mut out, b"author", &self.author.to_bytes());
        push_header(&mut out, b"committer", &self.committer.to_bytes());
        if let Some(ref enc) = self.encoding {
            push_header(&mut out, b"encoding", enc);
        }
        if let Some(ref sig) = self.gpgsig {
            push_header(&mut out, b"gpgsig", sig);
        }
        for (key, value) in &self.extra_headers {
            push_header(&mut out, key, value);
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// First line of the message.
    pub fn summary(&self) -> &BStr {
        match self.message.find_byte(b'\n') {
            Some(end) => self.message[..end].as_bstr(),
            None => self.message.as_bstr(),
        }
    }
}

/// Write `key value\n`, re-folding embedded newlines as continuation lines.
fn push_header(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    out.extend_from_slice(key);
    out.push(b' ');
    for (i, line) in value.split(|&b| b == b'\n').enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\n ");
        }
        out.extend_from_slice(line);
    }
    out.push(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

    fn sample() -> Vec<u8> {
        format!(
            "tree {TREE}\n\
             parent 0000000000000000000000000000000000000001\n\
             author Ann <ann@example.com> 1700000000 +0100\n\
             committer Bob <bob@example.com> 1700000100 +0000\n\
             \n\
             Add the thing\n\
             \n\
             With details.\n"
        )
        .into_bytes()
    }

    #[test]
    fn parse_and_roundtrip() {
        let bytes = sample();
        let commit = Commit::parse(&bytes).unwrap();
        assert_eq!(commit.tree.to_hex(), TREE);
        assert_eq!(commit.parents.len(), 1);
        assert_eq!(commit.author.name, "Ann");
        assert_eq!(commit.committer.email, "bob@example.com");
        assert_eq!(commit.summary(), "Add the thing".as_bytes());
        assert_eq!(commit.serialize(), bytes);
    }

    #[test]
    fn root_and_merge_commits() {
        let mut root = Commit::parse(&sample()).unwrap();
        root.parents.clear();
        assert!(root.is_root());

        let reparsed = Commit::parse(&root.serialize()).unwrap();
        assert!(reparsed.is_root());

        root.parents = vec![ObjectId::ZERO_SHA1, ObjectId::ZERO_SHA1];
        assert!(root.is_merge());
    }

    #[test]
    fn gpgsig_folds_and_roundtrips() {
        let bytes = format!(
            "tree {TREE}\n\
             author A <a@b> 1 +0000\n\
             committer A <a@b> 1 +0000\n\
             gpgsig -----BEGIN PGP SIGNATURE-----\n\
             \x20line two\n\
             \x20-----END PGP SIGNATURE-----\n\
             \n\
             signed\n"
        )
        .into_bytes();
        let commit = Commit::parse(&bytes).unwrap();
        let sig = commit.gpgsig.as_ref().unwrap();
        assert!(sig.starts_with(b"-----BEGIN PGP SIGNATURE-----"));
        assert!(sig.ends_with(b"-----END PGP SIGNATURE-----"));
        assert_eq!(commit.serialize(), bytes);
    }

    #[test]
    fn unknown_headers_preserved() {
        let bytes = format!(
            "tree {TREE}\n\
             author A <a@b> 1 +0000\n\
             committer A <a@b> 1 +0000\n\
             nonce abc123\n\
             \n\
             msg\n"
        )
        .into_bytes();
        let commit = Commit::parse(&bytes).unwrap();
        assert_eq!(commit.extra_headers.len(), 1);
        assert_eq!(commit.extra_headers[0].0, "nonce");
        assert_eq!(commit.serialize(), bytes);
    }

    #[test]
    fn missing_tree_rejected() {
        let bytes = b"author A <a@b> 1 +0000\ncommitter A <a@b> 1 +0000\n\nmsg\n";
        assert!(matches!(
            Commit::parse(bytes).unwrap_err(),
            ObjectError::MissingCommitHeader("tree")
        ));
    }

    #[test]
    fn empty_message_allowed() {
        let bytes = format!(
            "tree {TREE}\nauthor A <a@b> 1 +0000\ncommitter A <a@b> 1 +0000\n\n"
        )
        .into_bytes();
        let commit = Commit::parse(&bytes).unwrap();
        assert!(commit.message.is_empty());
        assert_eq!(commit.serialize(), bytes);
    }
}
