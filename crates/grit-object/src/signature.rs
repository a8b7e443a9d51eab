use bstr::{BStr, BString, ByteSlice};

use crate::ObjectError;

/// An author/committer/tagger line: `Name <email> unix-seconds tz-offset`.
///
/// The timestamp is kept raw (seconds since epoch plus a `±HHMM` offset in
/// minutes); calendar rendering is a concern of layers above this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: BString,
    pub email: BString,
    pub seconds: i64,
    /// Timezone offset in minutes east of UTC.
    pub tz_minutes: i32,
}

impl Signature {
    /// Parse `Name <email> 1234567890 +0130`.
    ///
    /// The email is delimited by the last `<`/`>` pair so names containing
    /// angle brackets still parse the way C git parses them.
    pub fn parse(input: &BStr) -> Result<Self, ObjectError> {
        let bytes = input.as_bytes();
        let close = bytes
            .iter()
            .rposition(|&b| b == b'>')
            .ok_or_else(|| ObjectError::BadSignature("no '>' delimiter".into()))?;
        let open = bytes[..close]
            .iter()
            .rposition(|&b| b == b'<')
            .ok_or_else(|| ObjectError::BadSignature("no '<' delimiter".into()))?;

        let name = bytes[..open].trim();
        let email = &bytes[open + 1..close];

        let tail = bytes[close + 1..].trim();
        let tail = std::str::from_utf8(tail)
            .map_err(|_| ObjectError::BadSignature("non-ASCII timestamp".into()))?;
        let mut fields = tail.split_ascii_whitespace();

        let seconds = fields
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| ObjectError::BadSignature(format!("bad timestamp in {tail:?}")))?;
        let tz_minutes = fields
            .next()
            .and_then(parse_tz)
            .ok_or_else(|| ObjectError::BadSignature(format!("bad tz offset in {tail:?}")))?;

        Ok(Self {
            name: BString::from(name),
            email: BString::from(email),
            seconds,
            tz_minutes,
        })
    }

    /// Render in canonical form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let sign = if self.tz_minutes < 0 { '-' } else { '+' };
        let abs = self.tz_minutes.unsigned_abs();
        let mut out = Vec::with_capacity(self.name.len() + self.email.len() + 24);
        out.extend_from_slice(&self.name);
        out.extend_from_slice(b" <");
        out.extend_from_slice(&self.email);
        out.extend_from_slice(b"> ");
        out.extend_from_slice(
            format!("{} {}{:02}{:02}", self.seconds, sign, abs / 60, abs % 60).as_bytes(),
        );
        out
    }
}

/// Parse a `±HHMM` zone offset into minutes.
fn parse_tz(s: &str) -> Option<i32> {
    let (sign, digits) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    Some(sign * (hours * 60 + minutes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic() {
        let sig = Signature::parse(b"Jane Doe <jane@example.com> 1234567890 +0000".as_bstr())
            .unwrap();
        assert_eq!(sig.name, "Jane Doe");
        assert_eq!(sig.email, "jane@example.com");
        assert_eq!(sig.seconds, 1234567890);
        assert_eq!(sig.tz_minutes, 0);
    }

    #[test]
    fn parse_negative_offset() {
        let sig =
            Signature::parse(b"A B <a@b.c> 1700000000 -0530".as_bstr()).unwrap();
        assert_eq!(sig.tz_minutes, -330);
    }

    #[test]
    fn roundtrip() {
        for raw in [
            &b"Jane Doe <jane@example.com> 1234567890 +0000"[..],
            b"A <a@b> 0 +0130",
            b"X Y <x@y> 1700000000 -0800",
        ] {
            let sig = Signature::parse(raw.as_bstr()).unwrap();
            assert_eq!(sig.to_bytes(), raw);
        }
    }

    #[test]
    fn empty_name_is_allowed() {
        let sig = Signature::parse(b"<a@b> 1 +0000".as_bstr()).unwrap();
        assert!(sig.name.is_empty());
    }

    #[test]
    fn missing_delimiters_rejected() {
        assert!(Signature::parse(b"nobody 1 +0000".as_bstr()).is_err());
        assert!(Signature::parse(b"A <a@b 1 +0000".as_bstr()).is_err());
    }

    #[test]
    fn bad_zone_rejected() {
        assert!(Signature::parse(b"A <a@b> 1 0000".as_bstr()).is_err());
        assert!(Signature::parse(b"A <a@b> 1 +00".as_bstr()).is_err());
    }
}
