//! Association classification
//!
//! Resolves each planned field against the entity metadata and builds the
//! `LoadTree` the loader executes. The tree is built for every level before the
//! first query runs, so an invalid association anywhere below the roots aborts
//! the call without touching the data store.

use crate::config::UnknownFieldPolicy;
use crate::relation::def::{AssociationDescriptor, Cardinality, EntityMetadata, MetadataSource};
use crate::relation::error::LoadError;
use crate::relation::path::PathPlan;

/// Classify `field` of the entity described by `meta`
///
/// Returns `Ok(None)` when the field is not a declared association; the caller
/// decides what an unknown field means.
///
/// # Errors
///
/// - `LoadError::MissingReciprocalField` when the association has neither
///   `mapped_by` nor `inversed_by`, or a to-many reciprocal is not declared as
///   the matching association on the target
/// - `LoadError::AmbiguousJoin` for a self-referencing many-to-many that names
///   two different reciprocal fields
/// - `LoadError::UnknownEntity` when the target type has no metadata
pub fn classify<'m, S: MetadataSource + ?Sized>(
    source: &'m S,
    meta: &'m EntityMetadata,
    field: &str,
) -> Result<Option<&'m AssociationDescriptor>, LoadError> {
    let Some(descriptor) = meta.get(field) else {
        return Ok(None);
    };

    let missing_reciprocal = || LoadError::MissingReciprocalField {
        entity: meta.name.clone(),
        field: field.to_string(),
        target: descriptor.target.clone(),
    };

    if descriptor.cardinality == Cardinality::ManyToMany && descriptor.is_self_referencing() {
        if let (Some(mapped), Some(inversed)) = (&descriptor.mapped_by, &descriptor.inversed_by) {
            if mapped != inversed {
                return Err(LoadError::AmbiguousJoin {
                    entity: meta.name.clone(),
                    field: field.to_string(),
                    candidates: (mapped.clone(), inversed.clone()),
                });
            }
        }
    }

    let reciprocal = descriptor.reciprocal().ok_or_else(missing_reciprocal)?;
    let target = source
        .metadata(&descriptor.target)
        .ok_or_else(|| LoadError::UnknownEntity(descriptor.target.clone()))?;

    // To-many hydration reads or joins through the reciprocal on the target.
    let expected = match descriptor.cardinality {
        Cardinality::ToOne => None,
        Cardinality::OneToMany => Some(Cardinality::ToOne),
        Cardinality::ManyToMany => Some(Cardinality::ManyToMany),
    };
    if let Some(expected) = expected {
        match target.get(reciprocal) {
            Some(back) if back.cardinality == expected => {}
            _ => return Err(missing_reciprocal()),
        }
    }

    Ok(Some(descriptor))
}

/// One association to load at a level, with its nested loads
#[derive(Debug, Clone)]
pub struct LoadNode {
    pub descriptor: AssociationDescriptor,
    /// Dotted path from the top-level roots, used for reporting
    pub path: String,
    pub children: Option<LoadTree>,
}

/// Classified plan for one entity type and its nested levels
#[derive(Debug, Clone)]
pub struct LoadTree {
    pub entity: String,
    pub nodes: Vec<LoadNode>,
    /// Paths dropped at this level because the field is unknown
    pub skipped: Vec<String>,
}

impl LoadTree {
    /// Plan and classify `paths` for roots of type `entity`
    ///
    /// # Errors
    ///
    /// Any classification error in the whole tree, or `UnknownField` under
    /// `UnknownFieldPolicy::Reject`.
    pub fn build<S, P>(
        source: &S,
        entity: &str,
        paths: &[P],
        policy: UnknownFieldPolicy,
    ) -> Result<Self, LoadError>
    where
        S: MetadataSource + ?Sized,
        P: AsRef<str>,
    {
        Self::build_level(source, entity, paths, policy, None)
    }

    fn build_level<S, P>(
        source: &S,
        entity: &str,
        paths: &[P],
        policy: UnknownFieldPolicy,
        prefix: Option<&str>,
    ) -> Result<Self, LoadError>
    where
        S: MetadataSource + ?Sized,
        P: AsRef<str>,
    {
        let plan = PathPlan::from_paths(paths)?;
        let meta = source
            .metadata(entity)
            .ok_or_else(|| LoadError::UnknownEntity(entity.to_string()))?;

        let mut tree = LoadTree {
            entity: entity.to_string(),
            nodes: Vec::with_capacity(plan.current.len()),
            skipped: Vec::new(),
        };

        for field in &plan.current {
            let path = match prefix {
                Some(prefix) => format!("{prefix}.{field}"),
                None => field.clone(),
            };

            let Some(descriptor) = classify(source, meta, field)? else {
                match policy {
                    UnknownFieldPolicy::Warn => {
                        log::warn!("PostFetch: entity {entity} has no association {field}");
                        tree.skipped.push(path);
                        continue;
                    }
                    UnknownFieldPolicy::Reject => {
                        return Err(LoadError::UnknownField {
                            entity: entity.to_string(),
                            field: field.clone(),
                        });
                    }
                }
            };

            let deferred = plan.children(field);
            let children = if deferred.is_empty() {
                None
            } else {
                Some(Self::build_level(
                    source,
                    &descriptor.target,
                    deferred,
                    policy,
                    Some(&path),
                )?)
            };

            tree.nodes.push(LoadNode {
                descriptor: descriptor.clone(),
                path,
                children,
            });
        }

        Ok(tree)
    }

    /// Skipped paths of this level and all levels below
    pub fn skipped_paths(&self) -> Vec<String> {
        let mut out = self.skipped.clone();
        for node in &self.nodes {
            if let Some(children) = &node.children {
                out.extend(children.skipped_paths());
            }
        }
        out
    }

    /// Nodes of the given cardinality, in plan order
    pub fn nodes_of(&self, cardinality: Cardinality) -> impl Iterator<Item = &LoadNode> {
        self.nodes
            .iter()
            .filter(move |n| n.descriptor.cardinality == cardinality)
    }
}
