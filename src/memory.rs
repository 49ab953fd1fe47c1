//! In-memory persistence gateway
//!
//! `InMemoryGateway` keeps rows per entity type, materializes them as
//! [`Record`] entities through an identity map and answers every
//! [`BatchQuery`] shape. It records the queries it executes, which makes it
//! the fixture the loader's tests count round-trips with, and it is usable by
//! hosts that need a gateway without a database.
//!
//! # Example
//!
//! ```
//! use postfetch::memory::{InMemoryGateway, StoredRow};
//! use postfetch::relation::def::{AssociationDescriptor, EntityMetadata, MetadataRegistry};
//!
//! let registry = MetadataRegistry::new()
//!     .register(EntityMetadata::new("User", "users").association(
//!         AssociationDescriptor::one_to_many("User", "addresses", "Address", "owner"),
//!     ))
//!     .register(EntityMetadata::new("Address", "addresses").association(
//!         AssociationDescriptor::to_one("Address", "owner", "User", "owner_id")
//!             .inversed_by("addresses"),
//!     ));
//!
//! let mut gateway = InMemoryGateway::new(registry);
//! gateway.insert("User", StoredRow::new(1));
//! gateway.insert("Address", StoredRow::new(10).reference("owner", Some(1.into())));
//!
//! let user = gateway.find("User", &1.into()).unwrap();
//! assert!(std::rc::Rc::ptr_eq(&user, &gateway.find("User", &1.into()).unwrap()));
//! ```

use crate::entity::{distinct_keys, Association, EntityRef, Key, Record};
use crate::gateway::{GatewayError, PersistenceGateway, ScalarRow};
use crate::relation::batch::BatchQuery;
use crate::relation::def::{EntityMetadata, MetadataRegistry, MetadataSource};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A stored row: its key, to-one foreign keys and owned many-to-many links
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredRow {
    pub id: Option<Key>,
    pub references: BTreeMap<String, Option<Key>>,
    pub links: BTreeMap<String, Vec<Key>>,
}

impl StoredRow {
    pub fn new(id: impl Into<Key>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Set the foreign key of a to-one field
    pub fn reference(mut self, field: impl Into<String>, key: Option<Key>) -> Self {
        self.references.insert(field.into(), key);
        self
    }

    /// Link keys through a many-to-many field declared on this side
    pub fn link<I, K>(mut self, field: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        self.links
            .entry(field.into())
            .or_default()
            .extend(keys.into_iter().map(Into::into));
        self
    }
}

/// Gateway over in-process tables with an identity map
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    registry: MetadataRegistry,
    tables: HashMap<String, BTreeMap<Key, StoredRow>>,
    identity_map: RefCell<HashMap<(String, Key), EntityRef>>,
    executed: RefCell<Vec<BatchQuery>>,
}

impl InMemoryGateway {
    pub fn new(registry: MetadataRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    /// Store a row; rows without a key are ignored
    pub fn insert(&mut self, entity: impl Into<String>, row: StoredRow) {
        let Some(id) = row.id.clone() else {
            log::warn!("ignoring stored row without a key");
            return;
        };
        self.tables.entry(entity.into()).or_default().insert(id, row);
    }

    /// Materialize one entity through the identity map
    pub fn find(&self, entity: &str, id: &Key) -> Option<EntityRef> {
        self.tables.get(entity)?.get(id)?;
        self.materialize(entity, id).ok()
    }

    /// Materialize every row of a type, ordered by key
    pub fn find_all(&self, entity: &str) -> Vec<EntityRef> {
        let Some(table) = self.tables.get(entity) else {
            return Vec::new();
        };
        table
            .keys()
            .filter_map(|id| self.materialize(entity, id).ok())
            .collect()
    }

    /// Batch queries executed so far, in order
    pub fn executed(&self) -> Vec<BatchQuery> {
        self.executed.borrow().clone()
    }

    pub fn query_count(&self) -> usize {
        self.executed.borrow().len()
    }

    pub fn clear_executed(&self) {
        self.executed.borrow_mut().clear();
    }

    /// Forget materialized instances; later fetches build fresh ones
    pub fn clear_identity_map(&self) {
        self.identity_map.borrow_mut().clear();
    }

    fn metadata_of(&self, entity: &str) -> Result<&EntityMetadata, GatewayError> {
        self.registry
            .metadata(entity)
            .ok_or_else(|| GatewayError::UnknownEntity(entity.to_string()))
    }

    fn row(&self, entity: &str, id: &Key) -> Option<&StoredRow> {
        self.tables.get(entity)?.get(id)
    }

    fn rows(&self, entity: &str) -> impl Iterator<Item = &StoredRow> {
        self.tables.get(entity).into_iter().flat_map(|t| t.values())
    }

    fn materialize(&self, entity: &str, id: &Key) -> Result<EntityRef, GatewayError> {
        let map_key = (entity.to_string(), id.clone());
        if let Some(existing) = self.identity_map.borrow().get(&map_key) {
            return Ok(existing.clone());
        }

        let meta = self.metadata_of(entity)?;
        let row = self
            .row(entity, id)
            .ok_or_else(|| GatewayError::ParseError(format!("no {entity} row with key {id}")))?;

        let mut record = Record::new(entity, id.clone());
        for (field, desc) in meta.associations_of() {
            let slot = if desc.cardinality.is_to_many() {
                Association::many()
            } else {
                Association::one(row.references.get(field).cloned().flatten())
            };
            record.insert_association(field.clone(), slot);
        }

        let shared = record.into_ref();
        self.identity_map
            .borrow_mut()
            .insert(map_key, shared.clone());
        Ok(shared)
    }

    /// `(child_id, root_id)` pairs of the many-to-many `reciprocal` on `entity`
    ///
    /// Links are stored on the owning side only; an inverse reciprocal means
    /// the roots own the links.
    fn join_pairs(
        &self,
        entity: &str,
        reciprocal: &str,
        ids: &[Key],
    ) -> Result<Vec<(Key, Key)>, GatewayError> {
        let meta = self.metadata_of(entity)?;
        let back = meta.get(reciprocal).ok_or_else(|| {
            GatewayError::QueryError(format!("{entity} has no association {reciprocal}"))
        })?;
        let wanted: HashSet<&Key> = ids.iter().collect();

        let mut pairs = Vec::new();
        match &back.mapped_by {
            None => {
                for row in self.rows(entity) {
                    let Some(child) = &row.id else { continue };
                    for root in row.links.get(reciprocal).into_iter().flatten() {
                        if wanted.contains(root) {
                            pairs.push((child.clone(), root.clone()));
                        }
                    }
                }
            }
            Some(owning_field) => {
                for row in self.rows(&back.target) {
                    let Some(root) = &row.id else { continue };
                    if !wanted.contains(root) {
                        continue;
                    }
                    for child in row.links.get(owning_field).into_iter().flatten() {
                        pairs.push((child.clone(), root.clone()));
                    }
                }
            }
        }
        Ok(pairs)
    }

    fn materialize_all<I>(&self, entity: &str, ids: I) -> Result<Vec<EntityRef>, GatewayError>
    where
        I: IntoIterator<Item = Key>,
    {
        distinct_keys(ids)
            .iter()
            .filter(|id| self.row(entity, id).is_some())
            .map(|id| self.materialize(entity, id))
            .collect()
    }
}

impl MetadataSource for InMemoryGateway {
    fn metadata(&self, entity_type: &str) -> Option<&EntityMetadata> {
        self.registry.metadata(entity_type)
    }
}

impl PersistenceGateway for InMemoryGateway {
    fn fetch_entities(&self, query: &BatchQuery) -> Result<Vec<EntityRef>, GatewayError> {
        self.executed.borrow_mut().push(query.clone());

        match query {
            BatchQuery::ByIds { entity, ids } => self.materialize_all(entity, ids.iter().cloned()),
            BatchQuery::ByReciprocal {
                entity,
                reciprocal,
                ids,
            } => {
                let wanted: HashSet<&Key> = ids.iter().collect();
                let matching: Vec<Key> = self
                    .rows(entity)
                    .filter(|row| {
                        row.references
                            .get(reciprocal)
                            .and_then(Option::as_ref)
                            .is_some_and(|fk| wanted.contains(fk))
                    })
                    .filter_map(|row| row.id.clone())
                    .collect();
                self.materialize_all(entity, matching)
            }
            BatchQuery::ByJoin {
                entity,
                reciprocal,
                ids,
            } => {
                let pairs = self.join_pairs(entity, reciprocal, ids)?;
                self.materialize_all(entity, pairs.into_iter().map(|(child, _)| child))
            }
            BatchQuery::ForeignKeys { .. } | BatchQuery::JoinPairs { .. } => {
                Err(GatewayError::QueryError(format!(
                    "{} is a scalar projection",
                    query.kind()
                )))
            }
        }
    }

    fn fetch_scalars(&self, query: &BatchQuery) -> Result<Vec<ScalarRow>, GatewayError> {
        self.executed.borrow_mut().push(query.clone());

        match query {
            BatchQuery::ForeignKeys { entity, fields, ids } => Ok(distinct_keys(ids.iter().cloned())
                .into_iter()
                .filter_map(|id| {
                    let row = self.row(entity, &id)?;
                    let mut scalar = Vec::with_capacity(fields.len() + 1);
                    scalar.push(Some(id));
                    for field in fields {
                        scalar.push(row.references.get(field).cloned().flatten());
                    }
                    Some(scalar)
                })
                .collect()),
            BatchQuery::JoinPairs {
                entity,
                reciprocal,
                ids,
            } => Ok(self
                .join_pairs(entity, reciprocal, ids)?
                .into_iter()
                .map(|(child, root)| vec![Some(child), Some(root)])
                .collect()),
            _ => Err(GatewayError::QueryError(format!(
                "{} selects entities, not scalars",
                query.kind()
            ))),
        }
    }
}
