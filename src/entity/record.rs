//! Dynamic entity record
//!
//! `Record` is an [`Entity`] whose association slots live in a map keyed by
//! field name. The in-memory gateway materializes rows as records, and tests
//! build fixtures from them.

use crate::entity::{share, Association, Collection, Entity, EntityRef, Key, Reference};
use std::collections::BTreeMap;

/// Entity with a type name, a key and named association slots
#[derive(Debug)]
pub struct Record {
    entity_type: String,
    id: Key,
    associations: BTreeMap<String, Association>,
}

impl Record {
    pub fn new(entity_type: impl Into<String>, id: impl Into<Key>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            associations: BTreeMap::new(),
        }
    }

    /// Add a to-one slot carrying its foreign key
    pub fn with_reference(mut self, field: impl Into<String>, foreign_key: Option<Key>) -> Self {
        self.associations
            .insert(field.into(), Association::One(Reference::new(foreign_key)));
        self
    }

    /// Add an uninitialized collection slot
    pub fn with_collection(mut self, field: impl Into<String>) -> Self {
        self.associations
            .insert(field.into(), Association::Many(Collection::new()));
        self
    }

    pub fn insert_association(&mut self, field: impl Into<String>, slot: Association) {
        self.associations.insert(field.into(), slot);
    }

    /// Names of all declared slots
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.associations.keys().map(String::as_str)
    }

    pub fn into_ref(self) -> EntityRef {
        share(self)
    }
}

impl Entity for Record {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn id(&self) -> Key {
        self.id.clone()
    }

    fn association(&self, field: &str) -> Option<&Association> {
        self.associations.get(field)
    }

    fn association_mut(&mut self, field: &str) -> Option<&mut Association> {
        self.associations.get_mut(field)
    }
}
