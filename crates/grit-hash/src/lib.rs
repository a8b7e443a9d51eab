//! Object identity for the grit git core.
//!
//! Provides [`ObjectId`], a fixed-width content digest in either SHA-1 or
//! SHA-256 form, together with the streaming [`Hasher`](hasher::Hasher) that
//! produces them and the hex codec used on the wire.

mod algorithm;
pub mod hasher;
pub mod hex;
mod oid;

pub use algorithm::HashAlgorithm;
pub use oid::ObjectId;

/// Errors produced by hash and object-id operations.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hex digit '{found}' at offset {offset}")]
    BadHexDigit { offset: usize, found: char },

    #[error("hex string has {actual} digits, expected {expected}")]
    BadHexLength { expected: usize, actual: usize },

    #[error("digest has {actual} bytes, expected {expected}")]
    BadDigestLength { expected: usize, actual: usize },

    #[error("SHA-1 collision attack detected while hashing")]
    Sha1Collision,
}
