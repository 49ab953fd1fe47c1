//! Post-fetch hook for query results.
//!
//! A `PostFetch` collects association paths while a query is being built and
//! loads them for the results once the query has run.
//!
//! # Example
//!
//! ```no_run
//! use postfetch::{EntityRef, LoadError, PersistenceGateway, PostFetch};
//!
//! # fn example(gateway: &dyn PersistenceGateway, users: Vec<EntityRef>) -> Result<(), LoadError> {
//! let mut post_fetch = PostFetch::new();
//! post_fetch.add("contact").add("commission.contract.client");
//!
//! post_fetch.apply(gateway, &users)?;
//! # Ok(())
//! # }
//! ```

use crate::config::LoaderConfig;
use crate::entity::EntityRef;
use crate::gateway::PersistenceGateway;
use crate::relation::eager::{AssociationLoader, LoadReport};
use crate::relation::error::LoadError;

/// Association paths to load for the results of one query
#[derive(Debug, Clone, Default)]
pub struct PostFetch {
    paths: Vec<String>,
    config: LoaderConfig,
}

impl PostFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        Self {
            paths: Vec::new(),
            config,
        }
    }

    /// Register a field (`"contact"`) or a dotted path (`"commission.contract.client"`)
    pub fn add(&mut self, path: impl Into<String>) -> &mut Self {
        self.paths.push(path.into());
        self
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Load the registered paths for a result list
    pub fn apply<G: PersistenceGateway + ?Sized>(
        &self,
        gateway: &G,
        roots: &[EntityRef],
    ) -> Result<LoadReport, LoadError> {
        if self.paths.is_empty() {
            return Ok(LoadReport::default());
        }
        AssociationLoader::with_config(gateway, self.config.clone()).load(roots, &self.paths)
    }

    /// Load the registered paths for a single result
    pub fn apply_one<G: PersistenceGateway + ?Sized>(
        &self,
        gateway: &G,
        root: &EntityRef,
    ) -> Result<LoadReport, LoadError> {
        self.apply(gateway, std::slice::from_ref(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Key;
    use crate::memory::{InMemoryGateway, StoredRow};
    use crate::relation::def::{AssociationDescriptor, EntityMetadata, MetadataRegistry};
    use crate::relation::hydrate;

    fn gateway() -> InMemoryGateway {
        let registry = MetadataRegistry::new()
            .register(EntityMetadata::new("Order", "orders").association(
                AssociationDescriptor::to_one("Order", "contact", "Contact", "contact_id")
                    .inversed_by("orders"),
            ))
            .register(EntityMetadata::new("Contact", "contacts"));
        let mut gateway = InMemoryGateway::new(registry);
        gateway.insert("Order", StoredRow::new(1).reference("contact", Some(Key::Int(5))));
        gateway.insert("Contact", StoredRow::new(5));
        gateway
    }

    #[test]
    fn test_nothing_registered_is_a_noop() {
        let gateway = gateway();
        let orders = gateway.find_all("Order");
        let report = PostFetch::new().apply(&gateway, &orders).unwrap();
        assert_eq!(report, LoadReport::default());
        assert_eq!(gateway.query_count(), 0);
    }

    #[test]
    fn test_apply_one_loads_single_result() {
        let gateway = gateway();
        let order = gateway.find("Order", &Key::Int(1)).unwrap();

        let mut post_fetch = PostFetch::new();
        post_fetch.add("contact");
        let report = post_fetch.apply_one(&gateway, &order).unwrap();

        assert_eq!(report.queries, 2);
        assert_eq!(post_fetch.paths(), ["contact"]);
        let contact = hydrate::slot_entities(&order, "contact").unwrap();
        assert_eq!(contact.len(), 1);
    }
}
