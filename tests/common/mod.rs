//! Shared fixture for the integration tests
//!
//! - User has_many Addresses (one-to-many, mapped by `Address.owner`)
//! - User has_many_through Groups (many-to-many, owning side)
//! - Address belongs_to Country and Region (to-one)
//!
//! Users 1, 2 and 3 own 2, 0 and 5 addresses.

#![allow(dead_code)]

use postfetch::memory::{InMemoryGateway, StoredRow};
use postfetch::relation::def::{AssociationDescriptor, EntityMetadata, JoinTable, MetadataRegistry};
use postfetch::{BatchQuery, EntityRef, Key};

pub fn user_metadata() -> EntityMetadata {
    EntityMetadata::new("User", "users")
        .association(AssociationDescriptor::one_to_many(
            "User", "addresses", "Address", "owner",
        ))
        .association(
            AssociationDescriptor::many_to_many(
                "User",
                "groups",
                "Group",
                JoinTable::new("user_groups", "user_id", "group_id"),
            )
            .inversed_by("members"),
        )
}

pub fn registry() -> MetadataRegistry {
    MetadataRegistry::new()
        .register(user_metadata())
        .register(
            EntityMetadata::new("Address", "addresses")
                .association(
                    AssociationDescriptor::to_one("Address", "owner", "User", "owner_id")
                        .inversed_by("addresses"),
                )
                .association(
                    AssociationDescriptor::to_one("Address", "country", "Country", "country_id")
                        .inversed_by("addresses"),
                )
                .association(
                    AssociationDescriptor::to_one("Address", "region", "Region", "region_id")
                        .inversed_by("addresses"),
                ),
        )
        .register(EntityMetadata::new("Country", "countries").primary_key("code"))
        .register(EntityMetadata::new("Region", "regions"))
        .register(EntityMetadata::new("Group", "groups").association(
            AssociationDescriptor::many_to_many_inverse("Group", "members", "User", "groups"),
        ))
}

pub fn seed(gateway: &mut InMemoryGateway) {
    gateway.insert("User", StoredRow::new(1).link("groups", [100, 200]));
    gateway.insert("User", StoredRow::new(2).link("groups", [200]));
    gateway.insert("User", StoredRow::new(3));

    let addresses: [(i64, i64, &str, Option<i64>); 7] = [
        (10, 1, "cz", Some(7)),
        (11, 1, "de", None),
        (30, 3, "cz", Some(8)),
        (31, 3, "at", Some(8)),
        (32, 3, "cz", None),
        (33, 3, "de", Some(7)),
        (34, 3, "cz", None),
    ];
    for (id, owner, country, region) in addresses {
        gateway.insert(
            "Address",
            StoredRow::new(id)
                .reference("owner", Some(Key::Int(owner)))
                .reference("country", Some(Key::from(country)))
                .reference("region", region.map(Key::Int)),
        );
    }

    for code in ["at", "cz", "de"] {
        gateway.insert("Country", StoredRow::new(code));
    }
    gateway.insert("Region", StoredRow::new(7));
    gateway.insert("Region", StoredRow::new(8));
    gateway.insert("Group", StoredRow::new(100));
    gateway.insert("Group", StoredRow::new(200));
}

pub fn gateway() -> InMemoryGateway {
    let mut gateway = InMemoryGateway::new(registry());
    seed(&mut gateway);
    gateway
}

pub fn user(gateway: &InMemoryGateway, id: i64) -> EntityRef {
    gateway
        .find("User", &Key::Int(id))
        .unwrap_or_else(|| panic!("User {id} is not seeded"))
}

/// Keys held by the slot `field` of `entity`, in slot order
pub fn slot_ids(entity: &EntityRef, field: &str) -> Vec<Key> {
    entity
        .borrow()
        .association(field)
        .map(|slot| slot.entities().iter().map(|e| e.borrow().id()).collect())
        .unwrap_or_default()
}

pub fn slot_loaded(entity: &EntityRef, field: &str) -> bool {
    entity
        .borrow()
        .association(field)
        .is_some_and(|slot| slot.is_loaded())
}

/// `kind entity` of every executed query, e.g. `"by_ids Country"`
pub fn executed_shapes(gateway: &InMemoryGateway) -> Vec<String> {
    gateway
        .executed()
        .iter()
        .map(|q: &BatchQuery| format!("{} {}", q.kind(), q.entity()))
        .collect()
}
