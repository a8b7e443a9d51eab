//! The object-store interface the protocol core consumes.
//!
//! A store maps object ids to `(type, content)` and can stage a whole pack
//! behind a quarantine: objects written through [`PackIngest`] become
//! visible only when the pack verified end to end, and vanish when it did
//! not. The filesystem backend lives outside this workspace; the in-memory
//! store here implements the full contract.

pub mod memory;

use grit_hash::ObjectId;
use grit_object::ObjectType;

pub use memory::MemoryObjectStore;

/// Errors produced by object-store operations.
#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("object {oid} is corrupt: {reason}")]
    Corrupt { oid: ObjectId, reason: String },

    #[error("pack quarantine was already finalized")]
    QuarantineClosed,

    #[error(transparent)]
    Object(#[from] grit_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] grit_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Content-addressed object storage.
///
/// Absent objects are `Ok(None)`, never an error, so "not found" stays
/// distinguishable from real failures. Implementations serialize writers
/// and allow concurrent readers; a type filter of `None` means any type.
pub trait ObjectStore: Send + Sync {
    fn contains(&self, oid: &ObjectId) -> bool;

    /// Read an object's type and content.
    fn read(&self, oid: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, OdbError>;

    /// Read just `(type, size)` without materializing content.
    fn read_header(&self, oid: &ObjectId) -> Result<Option<(ObjectType, usize)>, OdbError>;

    /// Write one object, returning its id. Writing an existing object is a
    /// no-op returning the same id.
    fn write(&self, obj_type: ObjectType, data: &[u8]) -> Result<ObjectId, OdbError>;

    /// Iterate stored ids, optionally restricted to one type. Order is
    /// unspecified.
    fn iter(
        &self,
        filter: Option<ObjectType>,
    ) -> Result<Box<dyn Iterator<Item = ObjectId> + '_>, OdbError>;

    /// Open a quarantine for a pack's objects.
    fn begin_pack(&self) -> Result<Box<dyn PackIngest + '_>, OdbError>;
}

/// Staging area for one incoming pack.
///
/// Everything added is invisible to readers until [`commit`]; dropping the
/// ingest without committing discards the staged objects. This is what
/// keeps partially transferred or corrupt packs out of the store.
///
/// [`commit`]: PackIngest::commit
pub trait PackIngest: Send {
    /// Stage one object.
    fn add(&mut self, obj_type: ObjectType, data: &[u8]) -> Result<ObjectId, OdbError>;

    /// Number of staged objects.
    fn staged(&self) -> usize;

    /// Publish every staged object atomically.
    fn commit(self: Box<Self>) -> Result<usize, OdbError>;
}

/// Adapter feeding the pack encoder from a store.
pub struct StoreSource<'a>(pub &'a dyn ObjectStore);

impl grit_pack::encode::ObjectSource for StoreSource<'_> {
    fn read_object(
        &self,
        oid: &ObjectId,
    ) -> Result<Option<(ObjectType, Vec<u8>)>, grit_pack::PackError> {
        self.0
            .read(oid)
            .map_err(|e| grit_pack::PackError::Io(std::io::Error::other(e.to_string())))
    }
}
