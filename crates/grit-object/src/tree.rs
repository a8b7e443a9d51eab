use std::cmp::Ordering;

use bstr::BString;
use grit_hash::{HashAlgorithm, ObjectId};

use crate::ObjectError;

/// Mode of a tree entry, stored as octal ASCII on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryMode {
    /// 100644
    File,
    /// 100755
    Executable,
    /// 120000
    Symlink,
    /// 160000 (submodule commit reference)
    Gitlink,
    /// 040000
    Directory,
}

impl EntryMode {
    pub fn from_octal(text: &[u8]) -> Option<Self> {
        match text {
            b"100644" => Some(Self::File),
            b"100755" => Some(Self::Executable),
            b"120000" => Some(Self::Symlink),
            b"160000" => Some(Self::Gitlink),
            b"40000" | b"040000" => Some(Self::Directory),
            _ => None,
        }
    }

    /// Canonical wire form. Directories serialize as `40000`, no leading zero.
    pub fn as_octal(self) -> &'static [u8] {
        match self {
            Self::File => b"100644",
            Self::Executable => b"100755",
            Self::Symlink => b"120000",
            Self::Gitlink => b"160000",
            Self::Directory => b"40000",
        }
    }

    pub fn is_directory(self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// One `(mode, name, id)` row of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub name: BString,
    pub oid: ObjectId,
}

/// A tree object: a sorted directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

/// Git's canonical tree order: compare names bytewise, but a directory name
/// sorts as if it carried a trailing `/`. So `sub` (directory) lands after
/// `sub.c` yet before `sub0`.
pub fn entry_order(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let an = &a.name[..];
    let bn = &b.name[..];
    let common = an.len().min(bn.len());
    match an[..common].cmp(&bn[..common]) {
        Ordering::Equal => {}
        other => return other,
    }
    let next = |name: &[u8], dir: bool| -> u8 {
        if name.len() > common {
            name[common]
        } else if dir {
            b'/'
        } else {
            0
        }
    };
    next(an, a.mode.is_directory()).cmp(&next(bn, b.mode.is_directory()))
}

impl Tree {
    /// Parse the binary tree format: repeated `<octal-mode> <name>\0<digest>`.
    ///
    /// The digest width is fixed by the repository's hash algorithm; this
    /// parser assumes SHA-1 unless told otherwise via [`parse_with`].
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        Self::parse_with(content, HashAlgorithm::Sha1)
    }

    pub fn parse_with(content: &[u8], algo: HashAlgorithm) -> Result<Self, ObjectError> {
        let digest_len = algo.digest_len();
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < content.len() {
            let space = content[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| ObjectError::BadTreeEntry {
                    offset: pos,
                    reason: "no space after mode".into(),
                })?
                + pos;
            let mode = EntryMode::from_octal(&content[pos..space]).ok_or_else(|| {
                ObjectError::BadTreeEntry {
                    offset: pos,
                    reason: format!(
                        "bad mode {:?}",
                        String::from_utf8_lossy(&content[pos..space])
                    ),
                }
            })?;

            let name_start = space + 1;
            let nul = content[name_start..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| ObjectError::BadTreeEntry {
                    offset: name_start,
                    reason: "no NUL after name".into(),
                })?
                + name_start;
            if nul == name_start {
                return Err(ObjectError::BadTreeEntry {
                    offset: name_start,
                    reason: "empty name".into(),
                });
            }

            let digest_start = nul + 1;
            let digest_end = digest_start + digest_len;
            if digest_end > content.len() {
                return Err(ObjectError::BadTreeEntry {
                    offset: digest_start,
                    reason: "truncated digest".into(),
                });
            }

            entries.push(TreeEntry {
                mode,
                name: BString::from(&content[name_start..nul]),
                oid: ObjectId::from_bytes(&content[digest_start..digest_end], algo)?,
            });
            pos = digest_end;
        }

        Ok(Self { entries })
    }

    /// Serialize in canonical order regardless of in-memory entry order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut sorted: Vec<&TreeEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| entry_order(a, b));

        let mut out = Vec::new();
        for entry in sorted {
            out.extend_from_slice(entry.mode.as_octal());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }

    /// Find an entry by exact name.
    pub fn entry(&self, name: &[u8]) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}
