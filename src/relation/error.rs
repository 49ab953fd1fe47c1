//! Errors raised while planning or executing a post-fetch

use crate::gateway::GatewayError;
use std::fmt;

/// Loader error type
///
/// Every variant aborts the whole `load` call. Classification errors are
/// detected for the full path tree before the first query is issued.
#[derive(Debug)]
pub enum LoadError {
    /// A path contains an empty segment (`"a..b"`, `""`)
    InvalidPath(String),
    /// Roots of one level do not share an entity type
    MixedRootTypes { expected: String, found: String },
    /// No metadata is registered for an entity type
    UnknownEntity(String),
    /// The field is not an association of the entity type
    /// (only raised under `UnknownFieldPolicy::Reject`)
    UnknownField { entity: String, field: String },
    /// The association cannot route fetched rows back to their roots
    MissingReciprocalField {
        entity: String,
        field: String,
        target: String,
    },
    /// Self-referencing many-to-many with two candidate reciprocal fields
    AmbiguousJoin {
        entity: String,
        field: String,
        candidates: (String, String),
    },
    /// A fetched entity lacks the slot the loader has to fill or read
    MissingSlot { entity: String, field: String },
    /// Error from the persistence gateway, propagated unchanged
    Gateway(GatewayError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::InvalidPath(path) => {
                write!(f, "Invalid post-fetch path: {path:?}")
            }
            LoadError::MixedRootTypes { expected, found } => {
                write!(f, "Root entities must share one type: expected {expected}, found {found}")
            }
            LoadError::UnknownEntity(entity) => {
                write!(f, "No metadata registered for entity {entity}")
            }
            LoadError::UnknownField { entity, field } => {
                write!(f, "Entity {entity} has no association {field}")
            }
            LoadError::MissingReciprocalField {
                entity,
                field,
                target,
            } => {
                write!(
                    f,
                    "Cannot assign {target} rows to {entity}.{field}: no mappedBy or inversedBy field"
                )
            }
            LoadError::AmbiguousJoin {
                entity,
                field,
                candidates,
            } => {
                write!(
                    f,
                    "Self-referencing association {entity}.{field} has two reciprocal candidates: {} and {}",
                    candidates.0, candidates.1
                )
            }
            LoadError::MissingSlot { entity, field } => {
                write!(f, "Entity {entity} does not expose slot {field}")
            }
            LoadError::Gateway(e) => {
                write!(f, "Gateway error: {e}")
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Gateway(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GatewayError> for LoadError {
    fn from(err: GatewayError) -> Self {
        LoadError::Gateway(err)
    }
}
