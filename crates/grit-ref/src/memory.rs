//! In-memory reference store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use grit_hash::ObjectId;

use crate::{RefError, Reference, ReferenceStore, RefName};

/// A [`ReferenceStore`] held entirely in memory.
///
/// Reads take a shared lock, writes an exclusive one, which gives the
/// many-readers/one-writer discipline the store contract asks for.
#[derive(Debug, Default)]
pub struct MemoryRefStore {
    refs: RwLock<BTreeMap<RefName, Reference>>,
}

impl MemoryRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.refs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReferenceStore for MemoryRefStore {
    fn get(&self, name: &RefName) -> Result<Option<Reference>, RefError> {
        Ok(self.refs.read().expect("lock poisoned").get(name).cloned())
    }

    fn set(&self, reference: Reference) -> Result<(), RefError> {
        self.refs
            .write()
            .expect("lock poisoned")
            .insert(reference.name().clone(), reference);
        Ok(())
    }

    fn compare_and_set(
        &self,
        name: &RefName,
        expected: Option<&ObjectId>,
        new: Option<&ObjectId>,
    ) -> Result<bool, RefError> {
        let mut refs = self.refs.write().expect("lock poisoned");
        let current = match refs.get(name) {
            Some(Reference::Direct { target, .. }) => Some(*target),
            // A symbolic ref never CAS-matches a direct expectation.
            Some(Reference::Symbolic { .. }) => {
                return Ok(false);
            }
            None => None,
        };
        if current.as_ref() != expected {
            return Ok(false);
        }
        match new {
            Some(target) => {
                refs.insert(
                    name.clone(),
                    Reference::Direct {
                        name: name.clone(),
                        target: *target,
                    },
                );
            }
            None => {
                refs.remove(name);
            }
        }
        Ok(true)
    }

    fn remove(&self, name: &RefName) -> Result<(), RefError> {
        self.refs.write().expect("lock poisoned").remove(name);
        Ok(())
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = Reference> + '_>, RefError> {
        let snapshot: Vec<Reference> = self
            .refs
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }
}
