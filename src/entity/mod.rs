//! Entity abstraction consumed by the loader.
//!
//! The loader never inspects entity internals through reflection. Instead every
//! persistent type implements [`Entity`], which exposes its type name, its
//! identity and a named association slot per relationship field. Hosts that
//! already have typed models implement the trait directly; [`Record`] is a
//! dynamic implementation used by the in-memory gateway.
//!
//! Entities are shared as [`EntityRef`] (`Rc<RefCell<dyn Entity>>`): the same
//! instance may be the target of many references and sit in many collections,
//! and the loader mutates slots in place.

pub mod key;
pub mod record;
pub mod slot;

#[doc(inline)]
pub use key::{distinct_keys, Key};
#[doc(inline)]
pub use record::Record;
#[doc(inline)]
pub use slot::{Association, Collection, Reference};

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Shared handle to a persistent entity
pub type EntityRef = Rc<RefCell<dyn Entity>>;

/// A persistent object with a stable identity and named association slots
///
/// # Example
///
/// ```
/// use postfetch::{Association, Entity, Key};
///
/// #[derive(Debug)]
/// struct Country {
///     code: String,
/// }
///
/// impl Entity for Country {
///     fn entity_type(&self) -> &str {
///         "Country"
///     }
///
///     fn id(&self) -> Key {
///         Key::Text(self.code.clone())
///     }
///
///     fn association(&self, _field: &str) -> Option<&Association> {
///         None
///     }
///
///     fn association_mut(&mut self, _field: &str) -> Option<&mut Association> {
///         None
///     }
/// }
/// ```
pub trait Entity: fmt::Debug {
    /// Entity type name as registered in the metadata
    fn entity_type(&self) -> &str;

    /// Primary-key value
    fn id(&self) -> Key;

    /// Read access to an association slot
    fn association(&self, field: &str) -> Option<&Association>;

    /// Write access to an association slot
    fn association_mut(&mut self, field: &str) -> Option<&mut Association>;
}

/// Wrap any entity into a shared handle
pub fn share<E: Entity + 'static>(entity: E) -> EntityRef {
    Rc::new(RefCell::new(entity))
}

/// Identity of a shared entity
pub fn id_of(entity: &EntityRef) -> Key {
    entity.borrow().id()
}

/// Type name of a shared entity
pub fn type_of(entity: &EntityRef) -> String {
    entity.borrow().entity_type().to_string()
}

/// Address of the shared instance, the identity of an entity in memory
///
/// Only meaningful while a handle to the instance is kept alive.
pub(crate) fn instance_addr(entity: &EntityRef) -> *const () {
    Rc::as_ptr(entity) as *const ()
}

/// Remove repeated instances, keeping first-seen order
pub(crate) fn distinct_entities<I>(entities: I) -> Vec<EntityRef>
where
    I: IntoIterator<Item = EntityRef>,
{
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert(instance_addr(e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_and_accessors() {
        let user = share(Record::new("User", 1));
        assert_eq!(id_of(&user), Key::Int(1));
        assert_eq!(type_of(&user), "User");
    }

    #[test]
    fn test_distinct_entities_compares_instances() {
        let a = Record::new("User", 1).into_ref();
        let b = Record::new("User", 2).into_ref();
        let same_key_other_instance = Record::new("User", 1).into_ref();

        let out = distinct_entities([b.clone(), a.clone(), b.clone(), same_key_other_instance]);

        // Identity is by instance; the gateway's identity map is what makes
        // equal keys share an instance.
        assert_eq!(out.len(), 3);
        assert!(Rc::ptr_eq(&out[0], &b));
        assert!(Rc::ptr_eq(&out[1], &a));
    }
}
