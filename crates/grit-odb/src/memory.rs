//! In-memory object store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use grit_hash::{hasher::Hasher, HashAlgorithm, ObjectId};
use grit_object::ObjectType;

use crate::{ObjectStore, OdbError, PackIngest};

type ObjectMap = HashMap<ObjectId, (ObjectType, Vec<u8>)>;

/// An [`ObjectStore`] held entirely in memory.
///
/// Cloning is cheap and shares the underlying map, so a test can hand the
/// same store to a session and inspect it afterwards.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    algo: HashAlgorithm,
    objects: Arc<RwLock<ObjectMap>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_algorithm(HashAlgorithm::Sha1)
    }

    pub fn with_algorithm(algo: HashAlgorithm) -> Self {
        Self {
            algo,
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn contains(&self, oid: &ObjectId) -> bool {
        self.objects
            .read()
            .expect("lock poisoned")
            .contains_key(oid)
    }

    fn read(&self, oid: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, OdbError> {
        Ok(self.objects.read().expect("lock poisoned").get(oid).cloned())
    }

    fn read_header(&self, oid: &ObjectId) -> Result<Option<(ObjectType, usize)>, OdbError> {
        Ok(self
            .objects
            .read()
            .expect("lock poisoned")
            .get(oid)
            .map(|(ty, data)| (*ty, data.len())))
    }

    fn write(&self, obj_type: ObjectType, data: &[u8]) -> Result<ObjectId, OdbError> {
        let oid = Hasher::object_id(self.algo, obj_type.name(), data)?;
        self.objects
            .write()
            .expect("lock poisoned")
            .entry(oid)
            .or_insert_with(|| (obj_type, data.to_vec()));
        Ok(oid)
    }

    fn iter(
        &self,
        filter: Option<ObjectType>,
    ) -> Result<Box<dyn Iterator<Item = ObjectId> + '_>, OdbError> {
        let snapshot: Vec<ObjectId> = self
            .objects
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|(_, (ty, _))| filter.map_or(true, |f| f == *ty))
            .map(|(oid, _)| *oid)
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn begin_pack(&self) -> Result<Box<dyn PackIngest + '_>, OdbError> {
        Ok(Box::new(MemoryPackIngest {
            store: self,
            staged: HashMap::new(),
        }))
    }
}

/// Quarantine for the in-memory store: staged objects live in a private map
/// until commit merges them under the write lock in one step.
struct MemoryPackIngest<'a> {
    store: &'a MemoryObjectStore,
    staged: ObjectMap,
}

impl PackIngest for MemoryPackIngest<'_> {
    fn add(&mut self, obj_type: ObjectType, data: &[u8]) -> Result<ObjectId, OdbError> {
        let oid = Hasher::object_id(self.store.algo, obj_type.name(), data)?;
        self.staged.insert(oid, (obj_type, data.to_vec()));
        Ok(oid)
    }

    fn staged(&self) -> usize {
        self.staged.len()
    }

    fn commit(self: Box<Self>) -> Result<usize, OdbError> {
        let count = self.staged.len();
        let mut objects = self.store.objects.write().expect("lock poisoned");
        for (oid, entry) in self.staged {
            objects.entry(oid).or_insert(entry);
        }
        Ok(count)
    }
}
