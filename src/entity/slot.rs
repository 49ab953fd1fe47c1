//! Association slots
//!
//! An entity exposes each association field as a slot the loader can read,
//! fill and mark as loaded. A to-one field is a [`Reference`], a to-many field
//! is a [`Collection`]. Once a slot is marked loaded the host ORM must treat it
//! as resolved and never fetch it lazily again.

use crate::entity::{instance_addr, EntityRef, Key};
use std::collections::HashSet;
use std::fmt;

/// Slot of a single association field
pub enum Association {
    /// Many-to-one or one-to-one field
    One(Reference),
    /// One-to-many or many-to-many field
    Many(Collection),
}

impl Association {
    /// Empty to-one slot holding only its foreign key
    pub fn one(foreign_key: Option<Key>) -> Self {
        Association::One(Reference::new(foreign_key))
    }

    /// Empty, uninitialized collection slot
    pub fn many() -> Self {
        Association::Many(Collection::new())
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Association::One(r) => Some(r),
            Association::Many(_) => None,
        }
    }

    pub fn as_reference_mut(&mut self) -> Option<&mut Reference> {
        match self {
            Association::One(r) => Some(r),
            Association::Many(_) => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Association::Many(c) => Some(c),
            Association::One(_) => None,
        }
    }

    pub fn as_collection_mut(&mut self) -> Option<&mut Collection> {
        match self {
            Association::Many(c) => Some(c),
            Association::One(_) => None,
        }
    }

    /// Whether the slot has been resolved (to-one) or initialized (to-many)
    pub fn is_loaded(&self) -> bool {
        match self {
            Association::One(r) => r.is_loaded(),
            Association::Many(c) => c.is_initialized(),
        }
    }

    /// Entities currently held by the slot
    pub fn entities(&self) -> Vec<EntityRef> {
        match self {
            Association::One(r) => r.target().into_iter().collect(),
            Association::Many(c) => c.items().to_vec(),
        }
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Association::One(r) => r.fmt(f),
            Association::Many(c) => c.fmt(f),
        }
    }
}

/// To-one association slot
///
/// Holds the foreign key as stored on the owning row and, once resolved, the
/// target instance handed out by the gateway's identity map.
#[derive(Default)]
pub struct Reference {
    foreign_key: Option<Key>,
    target: Option<EntityRef>,
    loaded: bool,
}

impl Reference {
    pub fn new(foreign_key: Option<Key>) -> Self {
        Self {
            foreign_key,
            target: None,
            loaded: false,
        }
    }

    pub fn foreign_key(&self) -> Option<&Key> {
        self.foreign_key.as_ref()
    }

    pub fn set_foreign_key(&mut self, foreign_key: Option<Key>) {
        self.foreign_key = foreign_key;
    }

    pub fn target(&self) -> Option<EntityRef> {
        self.target.clone()
    }

    /// Link the resolved target and mark the slot loaded
    ///
    /// `None` records that the reference was resolved to nothing (null or
    /// dangling foreign key).
    pub fn assign(&mut self, target: Option<EntityRef>) {
        self.target = target;
        self.loaded = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

impl fmt::Debug for Reference {
    // Targets are printed by key only: entity graphs are usually cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self
            .target
            .as_ref()
            .and_then(|t| t.try_borrow().ok().map(|t| t.id()));
        f.debug_struct("Reference")
            .field("foreign_key", &self.foreign_key)
            .field("target", &target)
            .field("loaded", &self.loaded)
            .finish()
    }
}

/// To-many association slot
///
/// Mirrors a persistent collection: items are appended while hydrating and
/// the `initialized` flag marks the collection as fully loaded.
#[derive(Default)]
pub struct Collection {
    items: Vec<EntityRef>,
    // Instance addresses of `items`
    members: HashSet<*const ()>,
    initialized: bool,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an already initialized collection
    pub fn initialized_with(items: Vec<EntityRef>) -> Self {
        let mut collection = Self::new();
        for item in items {
            collection.hydrate_add(item);
        }
        collection.mark_initialized();
        collection
    }

    pub fn items(&self) -> &[EntityRef] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether this exact instance is already in the collection
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.members.contains(&instance_addr(entity))
    }

    /// Append a fetched entity during hydration
    ///
    /// Does nothing once the collection is initialized, and never adds the
    /// same instance twice. Returns whether the entity was added.
    pub fn hydrate_add(&mut self, entity: EntityRef) -> bool {
        if self.initialized || !self.members.insert(instance_addr(&entity)) {
            return false;
        }
        self.items.push(entity);
        true
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<Option<Key>> = self
            .items
            .iter()
            .map(|item| item.try_borrow().ok().map(|e| e.id()))
            .collect();
        f.debug_struct("Collection")
            .field("items", &ids)
            .field("initialized", &self.initialized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Record};
    use std::rc::Rc;

    #[test]
    fn test_reference_assign_marks_loaded() {
        let mut reference = Reference::new(Some(Key::Int(4)));
        assert!(!reference.is_loaded());
        assert_eq!(reference.foreign_key(), Some(&Key::Int(4)));

        let country = Record::new("Country", 4).into_ref();
        reference.assign(Some(country.clone()));

        assert!(reference.is_loaded());
        assert!(Rc::ptr_eq(&reference.target().unwrap(), &country));
    }

    #[test]
    fn test_reference_assign_none_is_still_loaded() {
        let mut reference = Reference::new(None);
        reference.assign(None);
        assert!(reference.is_loaded());
        assert!(reference.target().is_none());
    }

    #[test]
    fn test_collection_hydrate_add_skips_duplicates() {
        let a = Record::new("Group", 1).into_ref();
        let b = Record::new("Group", 2).into_ref();
        let mut collection = Collection::new();

        assert!(collection.hydrate_add(a.clone()));
        assert!(collection.hydrate_add(b));
        assert!(!collection.hydrate_add(a));
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_collection_membership_by_instance() {
        let items: Vec<EntityRef> = (0..10_000).map(|i| Record::new("Address", i).into_ref()).collect();
        let mut collection = Collection::new();
        for item in items.iter().chain(items.iter()) {
            collection.hydrate_add(item.clone());
        }

        assert_eq!(collection.len(), items.len());
        assert!(collection.contains(&items[9_999]));
        assert!(!collection.contains(&Record::new("Address", 0).into_ref()));
    }

    #[test]
    fn test_initialized_with_drops_repeats() {
        let a = Record::new("Group", 1).into_ref();
        let collection = Collection::initialized_with(vec![a.clone(), a.clone()]);
        assert_eq!(collection.len(), 1);
        assert!(collection.contains(&a));
        assert!(collection.is_initialized());
    }

    #[test]
    fn test_collection_hydrate_add_noop_when_initialized() {
        let mut collection = Collection::new();
        collection.mark_initialized();
        assert!(!collection.hydrate_add(Record::new("Group", 1).into_ref()));
        assert!(collection.is_empty());
        assert!(collection.is_initialized());
    }

    #[test]
    fn test_association_entities_and_loaded_state() {
        let mut slot = Association::many();
        assert!(!slot.is_loaded());
        let item = Record::new("Address", 10).into_ref();
        let collection = slot.as_collection_mut().unwrap();
        collection.hydrate_add(item);
        collection.mark_initialized();

        assert!(slot.is_loaded());
        assert_eq!(slot.entities().len(), 1);
        assert!(slot.as_reference().is_none());
    }

    #[test]
    fn test_debug_does_not_recurse_into_targets() {
        let user = Record::new("User", 1)
            .with_collection("addresses")
            .into_ref();
        let address = Record::new("Address", 2)
            .with_reference("owner", Some(Key::Int(1)))
            .into_ref();

        // Build a cycle: user.addresses -> address, address.owner -> user
        user.borrow_mut()
            .association_mut("addresses")
            .and_then(Association::as_collection_mut)
            .unwrap()
            .hydrate_add(address.clone());
        address
            .borrow_mut()
            .association_mut("owner")
            .and_then(Association::as_reference_mut)
            .unwrap()
            .assign(Some(user.clone()));

        let rendered = format!("{:?}", user.borrow());
        assert!(rendered.contains("addresses"));
    }
}
