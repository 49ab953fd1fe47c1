//! Persistence gateway
//!
//! Provides the `PersistenceGateway` trait, the loader's only contract toward
//! the host persistence engine: metadata lookup, batch query execution and
//! identity resolution.
//!
//! Implementations must honour identity resolution: materializing an entity
//! whose key is already present in the current working set returns the same
//! `EntityRef` instance. The loader relies on this to link to-one references
//! and to route one row into several collections.

use crate::entity::{EntityRef, Key};
use crate::relation::batch::BatchQuery;
use crate::relation::def::MetadataSource;
use std::fmt;

/// Gateway error type
#[derive(Debug)]
pub enum GatewayError {
    /// The query could not be built or executed
    QueryError(String),
    /// A row could not be turned into an entity or scalar row
    ParseError(String),
    /// The entity type is not known to the gateway
    UnknownEntity(String),
    /// A constraint rejected the operation (used by `Session::can_delete`)
    ConstraintViolation(String),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::QueryError(s) => {
                write!(f, "Query error: {s}")
            }
            GatewayError::ParseError(s) => {
                write!(f, "Parse error: {s}")
            }
            GatewayError::UnknownEntity(s) => {
                write!(f, "Unknown entity type: {s}")
            }
            GatewayError::ConstraintViolation(s) => {
                write!(f, "Constraint violation: {s}")
            }
            GatewayError::Other(s) => {
                write!(f, "Execution error: {s}")
            }
        }
    }
}

impl std::error::Error for GatewayError {}

/// A scalar projection row
///
/// Column order follows the query: `[root_id, fk_0, fk_1, ...]` for
/// [`BatchQuery::ForeignKeys`] and `[child_id, root_id]` for
/// [`BatchQuery::JoinPairs`].
pub type ScalarRow = Vec<Option<Key>>;

/// Trait implemented by the host persistence engine
///
/// # Examples
///
/// ```no_run
/// use postfetch::{BatchQuery, GatewayError, PersistenceGateway};
///
/// # fn example(gateway: &dyn PersistenceGateway, query: BatchQuery) -> Result<(), GatewayError> {
/// let countries = gateway.fetch_entities(&query)?;
/// println!("fetched {} countries", countries.len());
/// # Ok(())
/// # }
/// ```
pub trait PersistenceGateway: MetadataSource {
    /// Execute a batch query returning materialized entities
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if the query fails or the query shape is a
    /// scalar projection.
    fn fetch_entities(&self, query: &BatchQuery) -> Result<Vec<EntityRef>, GatewayError>;

    /// Execute a batch query returning scalar projection rows
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if the query fails or the query shape is an
    /// entity select.
    fn fetch_scalars(&self, query: &BatchQuery) -> Result<Vec<ScalarRow>, GatewayError>;
}

impl<G: PersistenceGateway + ?Sized> PersistenceGateway for &G {
    fn fetch_entities(&self, query: &BatchQuery) -> Result<Vec<EntityRef>, GatewayError> {
        (**self).fetch_entities(query)
    }

    fn fetch_scalars(&self, query: &BatchQuery) -> Result<Vec<ScalarRow>, GatewayError> {
        (**self).fetch_scalars(query)
    }
}

impl<G: MetadataSource + ?Sized> MetadataSource for &G {
    fn metadata(&self, entity_type: &str) -> Option<&crate::relation::def::EntityMetadata> {
        (**self).metadata(entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_display() {
        let error = GatewayError::QueryError("syntax error".to_string());
        assert_eq!(error.to_string(), "Query error: syntax error");
    }

    #[test]
    fn test_gateway_error_all_variants() {
        let cases = vec![
            (GatewayError::QueryError("q".into()), "Query error: q"),
            (GatewayError::ParseError("p".into()), "Parse error: p"),
            (GatewayError::UnknownEntity("User".into()), "Unknown entity type: User"),
            (
                GatewayError::ConstraintViolation("fk".into()),
                "Constraint violation: fk",
            ),
            (GatewayError::Other("o".into()), "Execution error: o"),
        ];
        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }
}
