//! Streaming digest computation.

use digest::Digest;

use crate::{HashAlgorithm, HashError, ObjectId};

enum State {
    Sha1(Box<sha1_checked::Sha1>),
    Sha256(sha2::Sha256),
}

/// Incremental hasher producing an [`ObjectId`].
///
/// SHA-1 runs with collision detection; a detected collision attack is
/// reported as [`HashError::Sha1Collision`] at finalization rather than
/// silently producing a forged id. Also usable through [`std::io::Write`]
/// so it can sit behind `io::copy`.
pub struct Hasher {
    state: State,
}

impl Hasher {
    pub fn new(algo: HashAlgorithm) -> Self {
        let state = match algo {
            HashAlgorithm::Sha1 => State::Sha1(Box::new(sha1_checked::Sha1::new())),
            HashAlgorithm::Sha256 => State::Sha256(sha2::Sha256::new()),
        };
        Self { state }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            State::Sha1(h) => h.update(data),
            State::Sha256(h) => h.update(data),
        }
    }

    /// Consume the hasher and produce the digest.
    pub fn finalize(self) -> Result<ObjectId, HashError> {
        match self.state {
            State::Sha1(h) => {
                let out = h.try_finalize();
                if out.has_collision() {
                    return Err(HashError::Sha1Collision);
                }
                let mut d = [0u8; 20];
                d.copy_from_slice(out.hash().as_slice());
                Ok(ObjectId::Sha1(d))
            }
            State::Sha256(h) => {
                let mut d = [0u8; 32];
                d.copy_from_slice(h.finalize().as_slice());
                Ok(ObjectId::Sha256(d))
            }
        }
    }

    /// Hash a complete buffer in one call.
    pub fn digest(algo: HashAlgorithm, data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new(algo);
        h.update(data);
        h.finalize()
    }

    /// Compute a git object id: the digest of `"<type> <len>\0"` followed
    /// by the content bytes.
    pub fn object_id(
        algo: HashAlgorithm,
        type_name: &str,
        content: &[u8],
    ) -> Result<ObjectId, HashError> {
        let mut h = Self::new(algo);
        h.update(type_name.as_bytes());
        h.update(b" ");
        h.update(content.len().to_string().as_bytes());
        h.update(b"\0");
        h.update(content);
        h.finalize()
    }
}

impl std::io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
