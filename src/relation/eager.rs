//! Post-fetch eager loading of associations.
//!
//! [`AssociationLoader`] fills association slots of already loaded root
//! entities, one batch query per association and level instead of one query
//! per root.
//!
//! # Example
//!
//! ```no_run
//! use postfetch::{AssociationLoader, EntityRef, LoadError, PersistenceGateway};
//!
//! # fn example(gateway: &dyn PersistenceGateway, users: Vec<EntityRef>) -> Result<(), LoadError> {
//! let report = AssociationLoader::new(gateway).load(&users, &["addresses.country"])?;
//! // One query for the addresses of all users, one probe and one query for
//! // the countries of all those addresses.
//! assert_eq!(report.queries, 3);
//! # Ok(())
//! # }
//! ```
//!
//! # Strategy
//!
//! For each level the loader:
//! 1. Classifies every requested path against the metadata (the whole tree,
//!    before any query)
//! 2. Probes the foreign keys of all to-one fields in one query, then fetches
//!    each to-one target type by those keys
//! 3. Fetches one-to-many targets by their reciprocal foreign key
//! 4. Fetches many-to-many targets through the join table, plus the
//!    `(child, root)` pairs needed to route them
//! 5. Recurses into deferred sub-paths with the entities now held in the
//!    loaded slots as the new roots
//!
//! Only slots that are not loaded yet take part, so loading twice issues no
//! new queries.

use crate::config::LoaderConfig;
use crate::entity::{distinct_entities, distinct_keys, id_of, type_of, EntityRef, Key};
use crate::gateway::{GatewayError, PersistenceGateway, ScalarRow};
use crate::relation::batch::BatchQuery;
use crate::relation::classify::{LoadNode, LoadTree};
use crate::relation::def::{AssociationDescriptor, Cardinality};
use crate::relation::error::LoadError;
use crate::relation::hydrate;
use std::collections::HashMap;

#[cfg(feature = "metrics")]
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Outcome of one `load` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Batch queries issued
    pub queries: usize,
    /// Dotted paths processed, in execution order
    pub loaded: Vec<String>,
    /// Dotted paths dropped because a segment is not an association
    pub skipped: Vec<String>,
    /// Entities assigned into slots
    pub hydrated: usize,
}

/// Batch loader for the associations of already loaded entities
pub struct AssociationLoader<'g, G: PersistenceGateway + ?Sized> {
    gateway: &'g G,
    config: LoaderConfig,
}

impl<'g, G: PersistenceGateway + ?Sized> AssociationLoader<'g, G> {
    pub fn new(gateway: &'g G) -> Self {
        Self::with_config(gateway, LoaderConfig::default())
    }

    pub fn with_config(gateway: &'g G, config: LoaderConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load `paths` for every entity in `roots`
    ///
    /// `roots` must share one entity type. Paths are dotted association
    /// chains such as `"addresses.country"`.
    ///
    /// # Errors
    ///
    /// Classification errors anywhere in the path tree are returned before
    /// any query is issued. Gateway errors abort the call as
    /// `LoadError::Gateway`.
    pub fn load<P: AsRef<str>>(
        &self,
        roots: &[EntityRef],
        paths: &[P],
    ) -> Result<LoadReport, LoadError> {
        if roots.is_empty() || paths.is_empty() {
            return Ok(LoadReport::default());
        }

        let entity = type_of(&roots[0]);
        check_root_types(roots, &entity)?;

        let tree = LoadTree::build(self.gateway, &entity, paths, self.config.unknown_fields)?;
        let mut report = LoadReport {
            skipped: tree.skipped_paths(),
            ..LoadReport::default()
        };

        let outcome = self.load_level(roots, &tree, 0, &mut report);
        #[cfg(feature = "metrics")]
        METRICS.record_hydrated(report.hydrated);
        outcome?;

        log::debug!(
            "PostFetch: {} path(s) on {} {entity} root(s) in {} queries",
            report.loaded.len(),
            roots.len(),
            report.queries
        );
        Ok(report)
    }

    fn load_level(
        &self,
        roots: &[EntityRef],
        tree: &LoadTree,
        depth: usize,
        report: &mut LoadReport,
    ) -> Result<(), LoadError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::load_level_span(&tree.entity, depth, roots.len()).entered();

        let roots = distinct_entities(roots.iter().cloned());

        self.load_to_one(&roots, tree, report)?;
        for node in tree.nodes_of(Cardinality::OneToMany) {
            self.load_one_to_many(&roots, &tree.entity, node, report)?;
        }
        for node in tree.nodes_of(Cardinality::ManyToMany) {
            self.load_many_to_many(&roots, &tree.entity, node, report)?;
        }

        for node in &tree.nodes {
            report.loaded.push(node.path.clone());
            let Some(children) = &node.children else {
                continue;
            };

            let mut held = Vec::new();
            for root in &roots {
                held.extend(hydrate::slot_entities(root, &node.descriptor.field)?);
            }
            let next = distinct_entities(held);
            if next.is_empty() {
                log::debug!("PostFetch: {} is empty, nothing to load below it", node.path);
                continue;
            }
            check_root_types(&next, &children.entity)?;
            self.load_level(&next, children, depth + 1, report)?;
        }
        Ok(())
    }

    /// Probe the foreign keys of all to-one fields, then fetch each target
    fn load_to_one(
        &self,
        roots: &[EntityRef],
        tree: &LoadTree,
        report: &mut LoadReport,
    ) -> Result<(), LoadError> {
        // Per field, the roots whose reference is still unresolved
        let mut pending: Vec<(&AssociationDescriptor, Vec<EntityRef>)> = Vec::new();
        for node in tree.nodes_of(Cardinality::ToOne) {
            let field = &node.descriptor.field;
            let mut unresolved = Vec::new();
            for root in roots {
                if !hydrate::is_loaded(root, field)? {
                    unresolved.push(root.clone());
                }
            }
            if !unresolved.is_empty() {
                pending.push((&node.descriptor, unresolved));
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let probed_roots = distinct_entities(
            pending
                .iter()
                .flat_map(|(_, unresolved)| unresolved.iter().cloned()),
        );
        let probe = BatchQuery::ForeignKeys {
            entity: tree.entity.clone(),
            fields: pending.iter().map(|(d, _)| d.field.clone()).collect(),
            ids: distinct_keys(probed_roots.iter().map(id_of)),
        };
        let foreign_keys = probe_rows(self.scalars(&probe, report)?, pending.len())?;

        for (column, (descriptor, unresolved)) in pending.iter().enumerate() {
            let key_of = |root: &EntityRef| {
                foreign_keys
                    .get(&id_of(root))
                    .and_then(|row| row[column].clone())
            };

            let keys = distinct_keys(unresolved.iter().filter_map(key_of));
            let targets: HashMap<Key, EntityRef> = if keys.is_empty() {
                HashMap::new()
            } else {
                let query = BatchQuery::ByIds {
                    entity: descriptor.target.clone(),
                    ids: keys,
                };
                self.entities(&query, report)?
                    .into_iter()
                    .map(|target| (id_of(&target), target))
                    .collect()
            };

            for root in unresolved {
                let target = match key_of(root) {
                    Some(key) => {
                        let target = targets.get(&key).cloned();
                        if target.is_none() {
                            log::warn!(
                                "PostFetch: {}.{} points to missing {} {key}",
                                tree.entity,
                                descriptor.field,
                                descriptor.target
                            );
                        }
                        target
                    }
                    None => None,
                };
                if target.is_some() {
                    report.hydrated += 1;
                }
                hydrate::link_reference(root, &descriptor.field, target)?;
            }
        }
        Ok(())
    }

    fn load_one_to_many(
        &self,
        roots: &[EntityRef],
        entity: &str,
        node: &LoadNode,
        report: &mut LoadReport,
    ) -> Result<(), LoadError> {
        let descriptor = &node.descriptor;
        let reciprocal = reciprocal_of(entity, descriptor)?;
        let pending = uninitialized(roots, &descriptor.field)?;
        if pending.is_empty() {
            return Ok(());
        }

        let query = BatchQuery::ByReciprocal {
            entity: descriptor.target.clone(),
            reciprocal: reciprocal.to_string(),
            ids: distinct_keys(pending.iter().map(id_of)),
        };
        let rows = self.entities(&query, report)?;
        let grouped = hydrate::group_by_owner(&rows, reciprocal)?;

        for root in &pending {
            if let Some(children) = grouped.get(&id_of(root)) {
                for child in children {
                    if hydrate::append(root, &descriptor.field, child.clone())? {
                        report.hydrated += 1;
                    }
                    hydrate::back_link(child, reciprocal, root)?;
                }
            }
            hydrate::mark_initialized(root, &descriptor.field)?;
        }
        Ok(())
    }

    fn load_many_to_many(
        &self,
        roots: &[EntityRef],
        entity: &str,
        node: &LoadNode,
        report: &mut LoadReport,
    ) -> Result<(), LoadError> {
        let descriptor = &node.descriptor;
        let reciprocal = reciprocal_of(entity, descriptor)?;
        let pending = uninitialized(roots, &descriptor.field)?;
        if pending.is_empty() {
            return Ok(());
        }

        let ids = distinct_keys(pending.iter().map(id_of));
        let rows = self.entities(
            &BatchQuery::ByJoin {
                entity: descriptor.target.clone(),
                reciprocal: reciprocal.to_string(),
                ids: ids.clone(),
            },
            report,
        )?;

        let routed = if rows.is_empty() {
            HashMap::new()
        } else {
            let pairs = self.scalars(
                &BatchQuery::JoinPairs {
                    entity: descriptor.target.clone(),
                    reciprocal: reciprocal.to_string(),
                    ids,
                },
                report,
            )?;
            hydrate::route_by_pairs(&rows, &pair_rows(pairs)?)
        };

        for root in &pending {
            if let Some(children) = routed.get(&id_of(root)) {
                for child in children {
                    if hydrate::append(root, &descriptor.field, child.clone())? {
                        report.hydrated += 1;
                    }
                }
            }
            hydrate::mark_initialized(root, &descriptor.field)?;
        }
        Ok(())
    }

    fn entities(
        &self,
        query: &BatchQuery,
        report: &mut LoadReport,
    ) -> Result<Vec<EntityRef>, LoadError> {
        self.execute(query, report, |gateway, query| gateway.fetch_entities(query))
    }

    fn scalars(
        &self,
        query: &BatchQuery,
        report: &mut LoadReport,
    ) -> Result<Vec<ScalarRow>, LoadError> {
        self.execute(query, report, |gateway, query| gateway.fetch_scalars(query))
    }

    fn execute<T>(
        &self,
        query: &BatchQuery,
        report: &mut LoadReport,
        run: impl FnOnce(&G, &BatchQuery) -> Result<Vec<T>, GatewayError>,
    ) -> Result<Vec<T>, LoadError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::batch_query_span(query.kind(), query.entity()).entered();

        log::debug!("PostFetch: {query}");
        report.queries += 1;

        #[cfg(feature = "metrics")]
        let start = Instant::now();
        let result = run(self.gateway, query).map_err(|e| {
            #[cfg(feature = "metrics")]
            METRICS.record_query_error(query.kind());
            log::error!("PostFetch: {query} failed: {e}");
            LoadError::Gateway(e)
        });

        #[cfg(feature = "metrics")]
        METRICS.record_query(query.kind(), start.elapsed());

        result
    }
}

fn check_root_types(roots: &[EntityRef], expected: &str) -> Result<(), LoadError> {
    for root in roots {
        let found = type_of(root);
        if found != expected {
            return Err(LoadError::MixedRootTypes {
                expected: expected.to_string(),
                found,
            });
        }
    }
    Ok(())
}

fn reciprocal_of<'d>(entity: &str, descriptor: &'d AssociationDescriptor) -> Result<&'d str, LoadError> {
    descriptor
        .reciprocal()
        .ok_or_else(|| LoadError::MissingReciprocalField {
            entity: entity.to_string(),
            field: descriptor.field.clone(),
            target: descriptor.target.clone(),
        })
}

fn uninitialized(roots: &[EntityRef], field: &str) -> Result<Vec<EntityRef>, LoadError> {
    let mut pending = Vec::new();
    for root in roots {
        if !hydrate::is_loaded(root, field)? {
            pending.push(root.clone());
        }
    }
    Ok(pending)
}

/// Index `[root_id, fk_0, .., fk_n]` probe rows by root key
fn probe_rows(rows: Vec<ScalarRow>, fields: usize) -> Result<HashMap<Key, Vec<Option<Key>>>, LoadError> {
    let mut indexed = HashMap::with_capacity(rows.len());
    for mut row in rows {
        if row.len() != fields + 1 {
            return Err(GatewayError::ParseError(format!(
                "foreign key probe row has {} columns, expected {}",
                row.len(),
                fields + 1
            ))
            .into());
        }
        let foreign_keys = row.split_off(1);
        match row.pop().flatten() {
            Some(id) => {
                indexed.insert(id, foreign_keys);
            }
            None => {
                return Err(GatewayError::ParseError(
                    "foreign key probe row without root key".to_string(),
                )
                .into())
            }
        }
    }
    Ok(indexed)
}

/// Decode `[child_id, root_id]` rows
fn pair_rows(rows: Vec<ScalarRow>) -> Result<Vec<(Key, Key)>, LoadError> {
    rows.into_iter()
        .map(|row| match row.as_slice() {
            [Some(child), Some(root)] => Ok((child.clone(), root.clone())),
            _ => Err(GatewayError::ParseError(format!("malformed join pair row: {row:?}")).into()),
        })
        .collect()
}
