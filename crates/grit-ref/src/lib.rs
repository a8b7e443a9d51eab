//! Reference names, values, and the store interface the protocol core
//! consumes. The filesystem backend lives outside this workspace; the
//! in-memory [`MemoryRefStore`](memory::MemoryRefStore) implements the full
//! contract and backs the protocol tests.

pub mod memory;
mod name;
mod store;

pub use name::RefName;
pub use store::{ReferenceStore, MAX_RESOLVE_DEPTH};

use grit_hash::ObjectId;

/// Errors produced by reference operations.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("invalid reference name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("reference not found: {0}")]
    NotFound(String),

    #[error("reference already exists with a different value: {0}")]
    AlreadyExists(String),

    #[error("non-fast-forward update of {0}")]
    NonFastForward(String),

    #[error("symbolic reference chain exceeds {MAX_RESOLVE_DEPTH} links at {0}")]
    MaxResolveRecursion(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A named reference: either resolved to an object id or symbolic,
/// naming another reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Direct { name: RefName, target: ObjectId },
    Symbolic { name: RefName, target: RefName },
}

impl Reference {
    pub fn name(&self) -> &RefName {
        match self {
            Self::Direct { name, .. } | Self::Symbolic { name, .. } => name,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Self::Symbolic { .. })
    }

    /// The target id, if already direct.
    pub fn target(&self) -> Option<ObjectId> {
        match self {
            Self::Direct { target, .. } => Some(*target),
            Self::Symbolic { .. } => None,
        }
    }
}
