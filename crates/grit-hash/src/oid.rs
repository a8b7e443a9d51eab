use std::fmt;
use std::str::FromStr;

use crate::{hex, HashAlgorithm, HashError};

/// A git object identifier: the content digest of an object.
///
/// Carries the raw digest inline, one variant per supported algorithm.
/// Immutable once constructed; comparable, hashable, and hex-printable.
/// The all-zero value means "no object" (ref creation/deletion on the wire).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl ObjectId {
    /// The SHA-1 "no object" id.
    pub const ZERO_SHA1: Self = Self::Sha1([0; 20]);
    /// The SHA-256 "no object" id.
    pub const ZERO_SHA256: Self = Self::Sha256([0; 32]);

    /// Build from a raw digest of the given algorithm's width.
    pub fn from_bytes(bytes: &[u8], algo: HashAlgorithm) -> Result<Self, HashError> {
        if bytes.len() != algo.digest_len() {
            return Err(HashError::BadDigestLength {
                expected: algo.digest_len(),
                actual: bytes.len(),
            });
        }
        Ok(match algo {
            HashAlgorithm::Sha1 => {
                let mut d = [0u8; 20];
                d.copy_from_slice(bytes);
                Self::Sha1(d)
            }
            HashAlgorithm::Sha256 => {
                let mut d = [0u8; 32];
                d.copy_from_slice(bytes);
                Self::Sha256(d)
            }
        })
    }

    /// Parse a hex string; the algorithm is inferred from the digit count
    /// (40 → SHA-1, 64 → SHA-256).
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        match HashAlgorithm::from_hex_len(s.len()) {
            Some(HashAlgorithm::Sha1) => {
                let mut d = [0u8; 20];
                hex::decode_into(s, &mut d)?;
                Ok(Self::Sha1(d))
            }
            Some(HashAlgorithm::Sha256) => {
                let mut d = [0u8; 32];
                hex::decode_into(s, &mut d)?;
                Ok(Self::Sha256(d))
            }
            None => Err(HashError::BadHexLength {
                expected: 40,
                actual: s.len(),
            }),
        }
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Sha1(d) => d,
            Self::Sha256(d) => d,
        }
    }

    /// Which algorithm produced this id.
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha1(_) => HashAlgorithm::Sha1,
            Self::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    /// Whether this is the designated "no object" value.
    pub fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0)
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// First digest byte, the fanout-table bucket.
    pub fn first_byte(&self) -> u8 {
        self.as_bytes()[0]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
