//! Identity values for entities
//!
//! This module provides the `Key` enum, the primary-key value every entity
//! exposes. Keys are hashable and ordered so they can index identity maps and
//! group fetched rows by owner, and they convert into `sea_query::Value` so
//! the same value can be bound into rendered batch queries.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Primary-key value of an entity
///
/// Supports the single-column key shapes the loader needs to batch on:
/// - Integer keys (`Int`)
/// - UUID keys (`Uuid`)
/// - Natural string keys (`Text`)
///
/// # Example
///
/// ```
/// use postfetch::Key;
///
/// let id: Key = 42.into();
/// assert_eq!(id, Key::Int(42));
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Integer primary key
    Int(i64),
    /// UUID primary key
    Uuid(Uuid),
    /// String primary key
    Text(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Uuid(u) => write!(f, "{u}"),
            Key::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(i64::from(value))
    }
}

impl From<Uuid> for Key {
    fn from(value: Uuid) -> Self {
        Key::Uuid(value)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<Key> for sea_query::Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Int(i) => sea_query::Value::from(i),
            Key::Uuid(u) => sea_query::Value::from(u),
            Key::Text(s) => sea_query::Value::from(s),
        }
    }
}

/// De-duplicate keys while keeping first-seen order
///
/// Batch queries bind these as an `IN (...)` list, so repeated identities would
/// only bloat the statement.
pub fn distinct_keys<I>(keys: I) -> Vec<Key>
where
    I: IntoIterator<Item = Key>,
{
    let mut seen = std::collections::HashSet::new();
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}
