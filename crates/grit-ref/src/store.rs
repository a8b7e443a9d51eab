use grit_hash::ObjectId;

use crate::{RefError, Reference, RefName};

/// Upper bound on symbolic-reference chains; longer chains are treated as
/// cyclic and rejected with [`RefError::MaxResolveRecursion`].
pub const MAX_RESOLVE_DEPTH: usize = 1024;

/// The reference-store interface the protocol core consumes.
///
/// Implementations must allow many concurrent readers and serialize
/// writers. `None` results mean "no such reference" and are distinct from
/// I/O failures.
pub trait ReferenceStore: Send + Sync {
    /// Read a single reference without following symbolic links.
    fn get(&self, name: &RefName) -> Result<Option<Reference>, RefError>;

    /// Create or overwrite a reference unconditionally.
    fn set(&self, reference: Reference) -> Result<(), RefError>;

    /// Atomically update `name` only if its current value matches
    /// `expected` (`None` = must not exist). `new = None` deletes.
    ///
    /// Returns `false`, changing nothing, when the expectation fails.
    fn compare_and_set(
        &self,
        name: &RefName,
        expected: Option<&ObjectId>,
        new: Option<&ObjectId>,
    ) -> Result<bool, RefError>;

    /// Remove a reference. Removing an absent reference is not an error.
    fn remove(&self, name: &RefName) -> Result<(), RefError>;

    /// All references, sorted by name.
    fn iter(&self) -> Result<Box<dyn Iterator<Item = Reference> + '_>, RefError>;

    /// Follow symbolic links until a direct reference is reached.
    ///
    /// A chain of exactly [`MAX_RESOLVE_DEPTH`] symbolic links still
    /// resolves; the terminal direct lookup is not itself a link, so the
    /// loop allows one more read than the link bound.
    fn resolve(&self, name: &RefName) -> Result<Reference, RefError> {
        let mut current = name.clone();
        for _ in 0..=MAX_RESOLVE_DEPTH {
            match self.get(&current)? {
                Some(direct @ Reference::Direct { .. }) => return Ok(direct),
                Some(Reference::Symbolic { target, .. }) => current = target,
                None => return Err(RefError::NotFound(current.as_str().into())),
            }
        }
        Err(RefError::MaxResolveRecursion(name.as_str().into()))
    }
}
