//! # Postfetch
//!
//! Batch loading of associations for entities that are already in memory.
//!
//! Given a set of root entities and dotted association paths
//! (`"addresses.country"`), [`AssociationLoader`] resolves every path with one
//! batch query per association and level against a [`PersistenceGateway`],
//! fills the roots' association slots and marks them loaded.
//!
//! ```
//! use postfetch::memory::{InMemoryGateway, StoredRow};
//! use postfetch::relation::def::{AssociationDescriptor, EntityMetadata, MetadataRegistry};
//! use postfetch::AssociationLoader;
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
//! let users = gateway.find_all("User");
//! let report = AssociationLoader::new(&gateway).load(&users, &["addresses"]).unwrap();
//! assert_eq!(report.queries, 1);
//! ```

pub mod config;
pub mod entity;
pub mod gateway;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod post_fetch;
pub mod relation;
pub mod session;

pub use config::{LoaderConfig, UnknownFieldPolicy};
pub use entity::{Association, Collection, Entity, EntityRef, Key, Record, Reference};
pub use gateway::{GatewayError, PersistenceGateway, ScalarRow};
pub use logging::{LoggingGateway, QueryEntry};
pub use post_fetch::PostFetch;
pub use relation::{AssociationLoader, BatchQuery, LoadError, LoadReport};
pub use session::{LifecycleEvent, LifecycleListener, Phase, Session, SessionError, UnitOfWork};
