//! Collection hydration
//!
//! Slot-level operations the loader uses to put fetched entities onto their
//! roots. All of them go through the [`Entity`](crate::entity::Entity) slot
//! accessors; a root that does not expose the slot named by the metadata is
//! reported as `LoadError::MissingSlot`.
//!
//! None of these functions borrow the entity being assigned, only the entity
//! owning the slot, so a root may safely reference itself.

use crate::entity::{Association, Collection, EntityRef, Key, Reference};
use crate::relation::error::LoadError;
use std::collections::HashMap;

fn missing_slot(entity: &EntityRef, field: &str) -> LoadError {
    let entity = entity
        .try_borrow()
        .map(|e| e.entity_type().to_string())
        .unwrap_or_else(|_| "<borrowed>".to_string());
    LoadError::MissingSlot {
        entity,
        field: field.to_string(),
    }
}

fn with_reference<T>(
    entity: &EntityRef,
    field: &str,
    f: impl FnOnce(&mut Reference) -> T,
) -> Result<T, LoadError> {
    let outcome = entity
        .borrow_mut()
        .association_mut(field)
        .and_then(Association::as_reference_mut)
        .map(f);
    outcome.ok_or_else(|| missing_slot(entity, field))
}

fn with_collection<T>(
    entity: &EntityRef,
    field: &str,
    f: impl FnOnce(&mut Collection) -> T,
) -> Result<T, LoadError> {
    let outcome = entity
        .borrow_mut()
        .association_mut(field)
        .and_then(Association::as_collection_mut)
        .map(f);
    outcome.ok_or_else(|| missing_slot(entity, field))
}

/// Whether the slot `field` of `entity` is already loaded
pub fn is_loaded(entity: &EntityRef, field: &str) -> Result<bool, LoadError> {
    let outcome = entity.borrow().association(field).map(Association::is_loaded);
    outcome.ok_or_else(|| missing_slot(entity, field))
}

/// Foreign key currently stored in the to-one slot `field`
pub fn foreign_key(entity: &EntityRef, field: &str) -> Result<Option<Key>, LoadError> {
    let outcome = entity
        .borrow()
        .association(field)
        .and_then(Association::as_reference)
        .map(|reference| reference.foreign_key().cloned());
    outcome.ok_or_else(|| missing_slot(entity, field))
}

/// Entities currently held by the slot `field`
pub fn slot_entities(entity: &EntityRef, field: &str) -> Result<Vec<EntityRef>, LoadError> {
    let outcome = entity.borrow().association(field).map(Association::entities);
    outcome.ok_or_else(|| missing_slot(entity, field))
}

/// Resolve the to-one slot `field` to `target` and mark it loaded
pub fn link_reference(
    entity: &EntityRef,
    field: &str,
    target: Option<EntityRef>,
) -> Result<(), LoadError> {
    with_reference(entity, field, |reference| reference.assign(target))
}

/// Point the reciprocal reference of `child` at `root` unless already loaded
///
/// Returns whether the reference was linked.
pub fn back_link(child: &EntityRef, reciprocal: &str, root: &EntityRef) -> Result<bool, LoadError> {
    with_reference(child, reciprocal, |reference| {
        if reference.is_loaded() {
            false
        } else {
            reference.assign(Some(root.clone()));
            true
        }
    })
}

/// Append `item` to the collection `field` of `root`
///
/// Returns whether the item was added; see [`Collection::hydrate_add`].
pub fn append(root: &EntityRef, field: &str, item: EntityRef) -> Result<bool, LoadError> {
    with_collection(root, field, |collection| collection.hydrate_add(item))
}

/// Mark the collection `field` of `root` as fully loaded
pub fn mark_initialized(root: &EntityRef, field: &str) -> Result<(), LoadError> {
    with_collection(root, field, Collection::mark_initialized)
}

/// Group one-to-many rows by the owner key stored in their `reciprocal` slot
///
/// Rows without an owner key are dropped.
pub fn group_by_owner(
    rows: &[EntityRef],
    reciprocal: &str,
) -> Result<HashMap<Key, Vec<EntityRef>>, LoadError> {
    let mut grouped: HashMap<Key, Vec<EntityRef>> = HashMap::new();
    for row in rows {
        if let Some(owner) = foreign_key(row, reciprocal)? {
            grouped.entry(owner).or_default().push(row.clone());
        }
    }
    Ok(grouped)
}

/// Group many-to-many children by root key using `(child_id, root_id)` pairs
///
/// A child listed for several roots is routed to each of them.
pub fn route_by_pairs(
    rows: &[EntityRef],
    pairs: &[(Key, Key)],
) -> HashMap<Key, Vec<EntityRef>> {
    let by_id: HashMap<Key, &EntityRef> = rows
        .iter()
        .map(|row| (row.borrow().id(), row))
        .collect();

    let mut routed: HashMap<Key, Vec<EntityRef>> = HashMap::new();
    for (child, root) in pairs {
        match by_id.get(child) {
            Some(row) => routed.entry(root.clone()).or_default().push((*row).clone()),
            None => log::debug!("join pair ({child}, {root}) has no fetched child row"),
        }
    }
    routed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{id_of, Record};
    use std::rc::Rc;

    #[test]
    fn test_link_reference_and_back_link() {
        let user = Record::new("User", 1).with_collection("addresses").into_ref();
        let address = Record::new("Address", 10)
            .with_reference("owner", Some(Key::Int(1)))
            .into_ref();

        assert!(!is_loaded(&address, "owner").unwrap());
        assert!(back_link(&address, "owner", &user).unwrap());
        assert!(is_loaded(&address, "owner").unwrap());
        // Already loaded: left alone
        assert!(!back_link(&address, "owner", &address).unwrap());

        let owner = slot_entities(&address, "owner").unwrap();
        assert!(Rc::ptr_eq(&owner[0], &user));
    }

    #[test]
    fn test_self_reference_does_not_double_borrow() {
        let node = Record::new("Node", 1)
            .with_reference("parent", Some(Key::Int(1)))
            .with_collection("children")
            .into_ref();
        link_reference(&node, "parent", Some(node.clone())).unwrap();
        assert!(append(&node, "children", node.clone()).unwrap());
    }

    #[test]
    fn test_append_and_mark_initialized() {
        let user = Record::new("User", 1).with_collection("groups").into_ref();
        let group = Record::new("Group", 5).into_ref();

        assert!(append(&user, "groups", group.clone()).unwrap());
        assert!(!append(&user, "groups", group).unwrap());
        mark_initialized(&user, "groups").unwrap();

        assert!(is_loaded(&user, "groups").unwrap());
        assert_eq!(slot_entities(&user, "groups").unwrap().len(), 1);
    }

    #[test]
    fn test_missing_or_mismatched_slot() {
        let user = Record::new("User", 1).with_collection("groups").into_ref();
        assert!(matches!(
            link_reference(&user, "groups", None),
            Err(LoadError::MissingSlot { ref entity, ref field }) if entity == "User" && field == "groups"
        ));
        assert!(matches!(
            mark_initialized(&user, "friends"),
            Err(LoadError::MissingSlot { .. })
        ));
    }

    #[test]
    fn test_group_by_owner_drops_orphans() {
        let rows = vec![
            Record::new("Address", 10).with_reference("owner", Some(Key::Int(1))).into_ref(),
            Record::new("Address", 11).with_reference("owner", Some(Key::Int(1))).into_ref(),
            Record::new("Address", 12).with_reference("owner", None).into_ref(),
        ];
        let grouped = group_by_owner(&rows, "owner").unwrap();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[&Key::Int(1)].len(), 2);
    }

    #[test]
    fn test_route_by_pairs_fans_out() {
        let rows = vec![Record::new("Group", 100).into_ref()];
        let pairs = vec![
            (Key::Int(100), Key::Int(1)),
            (Key::Int(100), Key::Int(2)),
            (Key::Int(999), Key::Int(2)),
        ];
        let routed = route_by_pairs(&rows, &pairs);
        assert_eq!(id_of(&routed[&Key::Int(1)][0]), Key::Int(100));
        assert_eq!(routed[&Key::Int(2)].len(), 1);
        assert!(Rc::ptr_eq(&routed[&Key::Int(1)][0], &routed[&Key::Int(2)][0]));
    }
}
