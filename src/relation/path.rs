//! Field path planning
//!
//! Splits dotted paths into the fields fetched at the current level and the
//! remainders deferred to the level below:
//!
//! ```text
//! ["contact", "commission.contract.client", "commission.agent"]
//!   current:  ["contact", "commission"]
//!   deferred: { "commission": ["contract.client", "agent"] }
//! ```

use crate::relation::error::LoadError;
use std::collections::HashMap;

/// A dotted path split at its first segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath<'a> {
    pub immediate: &'a str,
    pub remainder: Option<&'a str>,
}

impl<'a> FieldPath<'a> {
    /// Parse `"a.b.c"` into `("a", Some("b.c"))`
    ///
    /// # Errors
    ///
    /// Returns `LoadError::InvalidPath` for empty paths or empty segments.
    pub fn parse(path: &'a str) -> Result<Self, LoadError> {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(LoadError::InvalidPath(path.to_string()));
        }
        Ok(match path.split_once('.') {
            Some((immediate, remainder)) => Self {
                immediate,
                remainder: Some(remainder),
            },
            None => Self {
                immediate: path,
                remainder: None,
            },
        })
    }
}

/// Fields of one level plus the sub-paths deferred per field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathPlan {
    /// Immediate fields, de-duplicated, in first-seen order
    pub current: Vec<String>,
    /// Remainder paths per immediate field
    pub deferred: HashMap<String, Vec<String>>,
}

impl PathPlan {
    /// Plan one level from a list of dotted paths
    ///
    /// # Errors
    ///
    /// Returns `LoadError::InvalidPath` if any path is malformed.
    pub fn from_paths<S: AsRef<str>>(paths: &[S]) -> Result<Self, LoadError> {
        let mut plan = PathPlan::default();
        for path in paths {
            let parsed = FieldPath::parse(path.as_ref())?;
            if !plan.current.iter().any(|f| f == parsed.immediate) {
                plan.current.push(parsed.immediate.to_string());
            }
            if let Some(rest) = parsed.remainder {
                let children = plan
                    .deferred
                    .entry(parsed.immediate.to_string())
                    .or_default();
                if !children.iter().any(|c| c == rest) {
                    children.push(rest.to_string());
                }
            }
        }
        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Deferred sub-paths of `field` (empty when none)
    pub fn children(&self, field: &str) -> &[String] {
        self.deferred.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_segment() {
        let path = FieldPath::parse("address").unwrap();
        assert_eq!(path.immediate, "address");
        assert_eq!(path.remainder, None);
    }

    #[test]
    fn test_parse_splits_at_first_dot() {
        let path = FieldPath::parse("commission.contract.client").unwrap();
        assert_eq!(path.immediate, "commission");
        assert_eq!(path.remainder, Some("contract.client"));
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        for bad in ["", ".a", "a.", "a..b"] {
            assert!(
                matches!(FieldPath::parse(bad), Err(LoadError::InvalidPath(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_plan_merges_shared_immediate_fields() {
        let plan = PathPlan::from_paths(&["a", "a.b", "a.c", "d"]).unwrap();
        assert_eq!(plan.current, vec!["a", "d"]);
        assert_eq!(plan.children("a"), ["b", "c"]);
        assert!(plan.children("d").is_empty());
    }

    #[test]
    fn test_plan_deduplicates_remainders() {
        let plan = PathPlan::from_paths(&["a.b", "a.b", "a.b.c"]).unwrap();
        assert_eq!(plan.current, vec!["a"]);
        assert_eq!(plan.children("a"), ["b", "b.c"]);
    }

    #[test]
    fn test_plan_empty_input() {
        let plan = PathPlan::from_paths::<&str>(&[]).unwrap();
        assert!(plan.is_empty());
        assert!(plan.deferred.is_empty());
    }
}
