use crate::ObjectId;

/// The hash function a repository is built on.
///
/// Chosen once per repository; every object id, pack trailer, and index
/// checksum in that repository uses the same algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-1, 20-byte digests. The default and the only format most remotes
    /// speak today.
    #[default]
    Sha1,
    /// SHA-256, 32-byte digests.
    Sha256,
}

impl HashAlgorithm {
    /// Digest width in bytes.
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Width of the hex form.
    pub const fn hex_len(self) -> usize {
        self.digest_len() * 2
    }

    /// The all-zero id meaning "no object" for this algorithm.
    pub const fn zero(self) -> ObjectId {
        match self {
            Self::Sha1 => ObjectId::ZERO_SHA1,
            Self::Sha256 => ObjectId::ZERO_SHA256,
        }
    }

    /// Name as it appears in the `object-format` capability.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Inverse of [`name`](Self::name); `None` for unrecognized names.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Infer the algorithm from a raw digest length.
    pub fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(Self::Sha1),
            32 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Infer the algorithm from a hex-string length.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(HashAlgorithm::Sha1.digest_len(), 20);
        assert_eq!(HashAlgorithm::Sha1.hex_len(), 40);
        assert_eq!(HashAlgorithm::Sha256.digest_len(), 32);
        assert_eq!(HashAlgorithm::Sha256.hex_len(), 64);
    }

    #[test]
    fn default_is_sha1() {
        assert_eq!(HashAlgorithm::default(), HashAlgorithm::Sha1);
    }

    #[test]
    fn name_roundtrip() {
        for algo in [HashAlgorithm::Sha1, HashAlgorithm::Sha256] {
            assert_eq!(HashAlgorithm::by_name(algo.name()), Some(algo));
        }
        assert_eq!(HashAlgorithm::by_name("md5"), None);
    }

    #[test]
    fn zero_ids() {
        assert!(HashAlgorithm::Sha1.zero().is_zero());
        assert!(HashAlgorithm::Sha256.zero().is_zero());
        assert_eq!(HashAlgorithm::Sha1.zero().as_bytes().len(), 20);
    }

    #[test]
    fn length_inference() {
        assert_eq!(HashAlgorithm::from_digest_len(20), Some(HashAlgorithm::Sha1));
        assert_eq!(HashAlgorithm::from_hex_len(64), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::from_digest_len(21), None);
        assert_eq!(HashAlgorithm::from_hex_len(41), None);
    }
}
