//! Association metadata and the post-fetch loader.
//!
//! # Architecture
//!
//! - **Def**: association descriptors and entity metadata (`AssociationDescriptor`, `MetadataRegistry`)
//! - **Path**: dotted path planning per level (`PathPlan`)
//! - **Classify**: validation of every planned field before any query (`LoadTree`)
//! - **Batch**: the batched select shapes and their SQL rendering (`BatchQuery`)
//! - **Hydrate**: slot assignment of fetched rows
//! - **Eager**: the loader driving all of the above (`AssociationLoader`)

pub mod def;
#[doc(inline)]
pub use def::{
    resolve_join_table, AssociationDescriptor, Cardinality, EntityMetadata, JoinTable,
    MetadataRegistry, MetadataSource,
};

pub mod path;
#[doc(inline)]
pub use path::{FieldPath, PathPlan};

pub mod classify;
#[doc(inline)]
pub use classify::{classify, LoadNode, LoadTree};

pub mod batch;
#[doc(inline)]
pub use batch::BatchQuery;

pub mod error;
#[doc(inline)]
pub use error::LoadError;

pub mod hydrate;

pub mod eager;
#[doc(inline)]
pub use eager::{AssociationLoader, LoadReport};
