use std::fmt;

use bstr::{BStr, BString, ByteSlice};

use crate::RefError;

/// A validated reference name.
///
/// Validation follows `git-check-ref-format(1)` as scoped here:
/// - slash-separated components, none empty
/// - no `..` anywhere
/// - no ASCII control characters, space, or any of `~ : ^ ? * [ \`
/// - no leading `-`
/// - no component ending in `.lock`
/// - no trailing `.` and no trailing `/`
///
/// `HEAD` and the other all-caps pseudo-refs are accepted without a slash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(BString);

const FORBIDDEN: &[u8] = b" ~:^?*[\\";

const PSEUDO_REFS: &[&str] = &["HEAD", "FETCH_HEAD", "ORIG_HEAD", "MERGE_HEAD"];

impl RefName {
    /// Validate and wrap a reference name.
    pub fn new(name: impl Into<BString>) -> Result<Self, RefError> {
        let name = name.into();
        check(&name)?;
        Ok(Self(name))
    }

    pub fn as_bstr(&self) -> &BStr {
        self.0.as_bstr()
    }

    /// Names that pass validation are ASCII, so this never loses data.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("<non-utf8>")
    }

    pub fn is_branch(&self) -> bool {
        self.0.starts_with(b"refs/heads/")
    }

    pub fn is_tag(&self) -> bool {
        self.0.starts_with(b"refs/tags/")
    }

    /// Strip the conventional prefix, if any.
    pub fn short(&self) -> &BStr {
        for prefix in [&b"refs/heads/"[..], &b"refs/tags/"[..], &b"refs/remotes/"[..]] {
            if let Some(rest) = self.0.strip_prefix(prefix) {
                return rest.as_bstr();
            }
        }
        self.0.as_bstr()
    }
}

fn fail(name: &[u8], reason: &'static str) -> RefError {
    RefError::InvalidName {
        name: String::from_utf8_lossy(name).into_owned(),
        reason,
    }
}

fn check(name: &[u8]) -> Result<(), RefError> {
    if name.is_empty() {
        return Err(fail(name, "empty"));
    }
    if PSEUDO_REFS.iter().any(|p| p.as_bytes() == name) {
        return Ok(());
    }
    if name[0] == b'-' {
        return Err(fail(name, "leading '-'"));
    }
    if name.ends_with(b".") {
        return Err(fail(name, "trailing '.'"));
    }
    if name.ends_with(b"/") || name[0] == b'/' {
        return Err(fail(name, "leading or trailing '/'"));
    }
    if name.find(b"..").is_some() {
        return Err(fail(name, "contains '..'"));
    }
    for &b in name {
        if b < 0x20 || b == 0x7f {
            return Err(fail(name, "contains a control character"));
        }
        if FORBIDDEN.contains(&b) {
            return Err(fail(name, "contains a forbidden character"));
        }
    }
    for component in name.split(|&b| b == b'/') {
        if component.is_empty() {
            return Err(fail(name, "empty path component"));
        }
        if component.ends_with(b".lock") {
            return Err(fail(name, "component ends in '.lock'"));
        }
    }
    Ok(())
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<BStr> for RefName {
    fn as_ref(&self) -> &BStr {
        self.0.as_bstr()
    }
}

impl std::str::FromStr for RefName {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
