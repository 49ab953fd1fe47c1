//! Association metadata
//!
//! This module provides the descriptors the loader classifies fields with:
//! the `Cardinality` of each association, the `AssociationDescriptor` naming
//! its target and reciprocal field, and the per-entity `EntityMetadata`
//! collected in a `MetadataRegistry`.
//!
//! Column-level details (`join_column`, `JoinTable`) are only needed to render
//! batch queries to SQL; the loading algorithm itself works on field names.

use std::collections::{BTreeMap, HashMap};

/// Cardinality of an association field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// Many-to-one or one-to-one
    ToOne,
    /// One-to-many (inverse side of a to-one)
    OneToMany,
    /// Many-to-many through a join table
    ManyToMany,
}

impl Cardinality {
    pub fn is_to_many(self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }
}

/// Join table backing a many-to-many association
///
/// Columns are named from the point of view of the side that declares it:
/// `source_column` references the declaring entity, `target_column` the
/// associated one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub name: String,
    pub source_column: String,
    pub target_column: String,
}

impl JoinTable {
    pub fn new(
        name: impl Into<String>,
        source_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_column: source_column.into(),
            target_column: target_column.into(),
        }
    }

    /// The same table seen from the other side of the association
    pub fn flipped(&self) -> Self {
        Self {
            name: self.name.clone(),
            source_column: self.target_column.clone(),
            target_column: self.source_column.clone(),
        }
    }
}

/// Describes one association field declared on an entity type
///
/// # Example
///
/// ```
/// use postfetch::relation::def::{AssociationDescriptor, Cardinality};
///
/// // User#addresses is the inverse side of Address#owner
/// let addresses = AssociationDescriptor::one_to_many("User", "addresses", "Address", "owner");
/// assert_eq!(addresses.cardinality, Cardinality::OneToMany);
/// assert_eq!(addresses.reciprocal(), Some("owner"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDescriptor {
    /// Field name on the source entity
    pub field: String,
    pub cardinality: Cardinality,
    /// Entity type declaring the field
    pub source: String,
    /// Entity type the field points to
    pub target: String,
    /// Reciprocal field on the target when this is the inverse side
    pub mapped_by: Option<String>,
    /// Reciprocal field on the target when this is the owning side
    pub inversed_by: Option<String>,
    /// Foreign-key column of an owning to-one field
    pub join_column: Option<String>,
    /// Join table of an owning many-to-many field
    pub join_table: Option<JoinTable>,
}

impl AssociationDescriptor {
    /// Owning to-one field stored in `join_column`
    pub fn to_one(
        source: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<String>,
        join_column: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            cardinality: Cardinality::ToOne,
            source: source.into(),
            target: target.into(),
            mapped_by: None,
            inversed_by: None,
            join_column: Some(join_column.into()),
            join_table: None,
        }
    }

    /// Inverse one-to-many field mapped by a to-one on the target
    pub fn one_to_many(
        source: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            cardinality: Cardinality::OneToMany,
            source: source.into(),
            target: target.into(),
            mapped_by: Some(mapped_by.into()),
            inversed_by: None,
            join_column: None,
            join_table: None,
        }
    }

    /// Owning many-to-many field with its join table
    pub fn many_to_many(
        source: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<String>,
        join_table: JoinTable,
    ) -> Self {
        Self {
            field: field.into(),
            cardinality: Cardinality::ManyToMany,
            source: source.into(),
            target: target.into(),
            mapped_by: None,
            inversed_by: None,
            join_column: None,
            join_table: Some(join_table),
        }
    }

    /// Inverse many-to-many field mapped by the owning side on the target
    pub fn many_to_many_inverse(
        source: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            cardinality: Cardinality::ManyToMany,
            source: source.into(),
            target: target.into(),
            mapped_by: Some(mapped_by.into()),
            inversed_by: None,
            join_column: None,
            join_table: None,
        }
    }

    /// Name the reciprocal field on the owning side
    pub fn inversed_by(mut self, field: impl Into<String>) -> Self {
        self.inversed_by = Some(field.into());
        self
    }

    pub fn mapped_by(mut self, field: impl Into<String>) -> Self {
        self.mapped_by = Some(field.into());
        self
    }

    /// The field on the target pointing back to the source
    ///
    /// `mapped_by` wins over `inversed_by` when both are set.
    pub fn reciprocal(&self) -> Option<&str> {
        self.mapped_by
            .as_deref()
            .or(self.inversed_by.as_deref())
    }

    pub fn is_self_referencing(&self) -> bool {
        self.source == self.target
    }
}

/// Metadata of one entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    associations: BTreeMap<String, AssociationDescriptor>,
}

impl EntityMetadata {
    /// Metadata with primary-key column `id`
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            associations: BTreeMap::new(),
        }
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn association(mut self, descriptor: AssociationDescriptor) -> Self {
        self.associations
            .insert(descriptor.field.clone(), descriptor);
        self
    }

    /// Descriptor of `field`, if declared
    pub fn get(&self, field: &str) -> Option<&AssociationDescriptor> {
        self.associations.get(field)
    }

    /// All declared associations keyed by field name
    pub fn associations_of(&self) -> &BTreeMap<String, AssociationDescriptor> {
        &self.associations
    }
}

/// Lookup of entity metadata by type name
pub trait MetadataSource {
    fn metadata(&self, entity_type: &str) -> Option<&EntityMetadata>;
}

/// In-process collection of entity metadata
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    entities: HashMap<String, EntityMetadata>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, metadata: EntityMetadata) -> Self {
        self.entities.insert(metadata.name.clone(), metadata);
        self
    }

    pub fn insert(&mut self, metadata: EntityMetadata) {
        self.entities.insert(metadata.name.clone(), metadata);
    }
}

impl MetadataSource for MetadataRegistry {
    fn metadata(&self, entity_type: &str) -> Option<&EntityMetadata> {
        self.entities.get(entity_type)
    }
}

/// Join table of a many-to-many descriptor, seen from its declaring side
///
/// The owning side carries the table; the inverse side borrows it from the
/// reciprocal descriptor on the target and flips the columns.
pub fn resolve_join_table<S: MetadataSource + ?Sized>(
    source: &S,
    descriptor: &AssociationDescriptor,
) -> Option<JoinTable> {
    if let Some(table) = &descriptor.join_table {
        return Some(table.clone());
    }
    let reciprocal = descriptor.reciprocal()?;
    source
        .metadata(&descriptor.target)?
        .get(reciprocal)?
        .join_table
        .as_ref()
        .map(JoinTable::flipped)
}
