//! SQL statement log
//!
//! `LoggingGateway` decorates any [`PersistenceGateway`]: each batch query is
//! rendered to SQL, timed, written to the `log` facade and kept in an
//! in-memory record that can be inspected or exported as JSON.
//!
//! # Example
//!
//! ```no_run
//! use postfetch::{AssociationLoader, LoaderConfig, LoggingGateway, PersistenceGateway};
//!
//! # fn example<G: PersistenceGateway>(gateway: G, users: Vec<postfetch::EntityRef>) -> Result<(), Box<dyn std::error::Error>> {
//! let logged = LoggingGateway::new(gateway, &LoaderConfig::default());
//! AssociationLoader::new(&logged).load(&users, &["addresses"])?;
//!
//! for entry in logged.queries() {
//!     println!("{:.3} ms  {}", entry.duration_ms, entry.sql);
//! }
//! println!("{}", logged.to_json()?);
//! # Ok(())
//! # }
//! ```

use crate::config::LoaderConfig;
use crate::entity::EntityRef;
use crate::gateway::{GatewayError, PersistenceGateway, ScalarRow};
use crate::relation::batch::BatchQuery;
use crate::relation::def::{EntityMetadata, MetadataSource};
use serde::Serialize;
use std::cell::RefCell;
use std::time::{Duration, Instant};

/// One executed batch query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEntry {
    pub sql: String,
    pub duration_ms: f64,
    /// Rows returned; zero for failed queries
    pub rows: usize,
}

#[derive(Serialize)]
struct QueryLogExport<'a> {
    total_time_ms: f64,
    queries: &'a [QueryEntry],
}

/// Gateway decorator recording every batch query
pub struct LoggingGateway<G> {
    inner: G,
    enabled: bool,
    slow_query: Duration,
    entries: RefCell<Vec<QueryEntry>>,
    total: RefCell<Duration>,
}

impl<G: PersistenceGateway> LoggingGateway<G> {
    pub fn new(inner: G, config: &LoaderConfig) -> Self {
        Self {
            inner,
            enabled: config.log_queries,
            slow_query: Duration::from_millis(config.slow_query_ms),
            entries: RefCell::new(Vec::new()),
            total: RefCell::new(Duration::ZERO),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn into_inner(self) -> G {
        self.inner
    }

    /// Recorded queries in execution order
    pub fn queries(&self) -> Vec<QueryEntry> {
        self.entries.borrow().clone()
    }

    /// Time spent in all recorded queries
    pub fn total_time(&self) -> Duration {
        *self.total.borrow()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
        *self.total.borrow_mut() = Duration::ZERO;
    }

    /// Export the record as `{"total_time_ms": .., "queries": [..]}`
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let entries = self.entries.borrow();
        serde_json::to_string(&QueryLogExport {
            total_time_ms: self.total_time().as_secs_f64() * 1000.0,
            queries: &entries,
        })
    }

    fn logged<T>(
        &self,
        query: &BatchQuery,
        run: impl FnOnce(&G) -> Result<Vec<T>, GatewayError>,
    ) -> Result<Vec<T>, GatewayError> {
        if !self.enabled {
            return run(&self.inner);
        }

        // Fall back to the readable form when the metadata cannot render SQL
        let sql = query
            .to_sql(&self.inner)
            .unwrap_or_else(|_| query.to_string());

        let start = Instant::now();
        let result = run(&self.inner);
        let elapsed = start.elapsed();
        let duration_ms = elapsed.as_secs_f64() * 1000.0;

        let rows = match &result {
            Ok(rows) => {
                if elapsed > self.slow_query {
                    log::warn!("slow query ({duration_ms:.3} ms, {} rows): {sql}", rows.len());
                } else {
                    log::debug!("query ({duration_ms:.3} ms, {} rows): {sql}", rows.len());
                }
                rows.len()
            }
            Err(e) => {
                log::error!("query failed after {duration_ms:.3} ms: {sql}: {e}");
                0
            }
        };

        self.entries.borrow_mut().push(QueryEntry {
            sql,
            duration_ms,
            rows,
        });
        *self.total.borrow_mut() += elapsed;

        result
    }
}

impl<G: PersistenceGateway> MetadataSource for LoggingGateway<G> {
    fn metadata(&self, entity_type: &str) -> Option<&EntityMetadata> {
        self.inner.metadata(entity_type)
    }
}

impl<G: PersistenceGateway> PersistenceGateway for LoggingGateway<G> {
    fn fetch_entities(&self, query: &BatchQuery) -> Result<Vec<EntityRef>, GatewayError> {
        self.logged(query, |inner| inner.fetch_entities(query))
    }

    fn fetch_scalars(&self, query: &BatchQuery) -> Result<Vec<ScalarRow>, GatewayError> {
        self.logged(query, |inner| inner.fetch_scalars(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Key;
    use crate::memory::{InMemoryGateway, StoredRow};
    use crate::relation::def::{AssociationDescriptor, MetadataRegistry};

    fn gateway() -> InMemoryGateway {
        let registry = MetadataRegistry::new()
            .register(EntityMetadata::new("User", "users").association(
                AssociationDescriptor::one_to_many("User", "addresses", "Address", "owner"),
            ))
            .register(EntityMetadata::new("Address", "addresses").association(
                AssociationDescriptor::to_one("Address", "owner", "User", "owner_id")
                    .inversed_by("addresses"),
            ));
        let mut gateway = InMemoryGateway::new(registry);
        gateway.insert("User", StoredRow::new(1));
        gateway.insert("Address", StoredRow::new(10).reference("owner", Some(Key::Int(1))));
        gateway
    }

    fn by_reciprocal() -> BatchQuery {
        BatchQuery::ByReciprocal {
            entity: "Address".into(),
            reciprocal: "owner".into(),
            ids: vec![Key::Int(1)],
        }
    }

    #[test]
    fn test_records_rendered_sql_and_rows() {
        let logged = LoggingGateway::new(gateway(), &LoaderConfig::default());
        let rows = logged.fetch_entities(&by_reciprocal()).unwrap();
        assert_eq!(rows.len(), 1);

        let entries = logged.queries();
        assert_eq!(entries.len(), 1);
        let sql = &entries[0].sql;
        assert!(sql.starts_with("SELECT"), "{sql}");
        assert!(sql.contains(r#""e"."owner_id" IN (1)"#), "{sql}");
        assert_eq!(entries[0].rows, 1);
        assert!(logged.total_time() >= Duration::ZERO);
    }

    #[test]
    fn test_failed_query_is_recorded_and_propagated() {
        let logged = LoggingGateway::new(gateway(), &LoaderConfig::default());
        let wrong_shape = BatchQuery::ByIds {
            entity: "User".into(),
            ids: vec![Key::Int(1)],
        };
        assert!(logged.fetch_scalars(&wrong_shape).is_err());
        assert_eq!(logged.queries()[0].rows, 0);
    }

    #[test]
    fn test_unrenderable_query_uses_display_form() {
        let logged = LoggingGateway::new(gateway(), &LoaderConfig::default());
        let unknown = BatchQuery::ByIds {
            entity: "Ghost".into(),
            ids: vec![Key::Int(1)],
        };
        assert!(logged.fetch_entities(&unknown).unwrap().is_empty());
        assert_eq!(logged.queries()[0].sql, "Ghost by id in (1)");
    }

    #[test]
    fn test_clear_and_json_export() {
        let logged = LoggingGateway::new(gateway(), &LoaderConfig::default());
        logged.fetch_entities(&by_reciprocal()).unwrap();

        let json: serde_json::Value = serde_json::from_str(&logged.to_json().unwrap()).unwrap();
        assert_eq!(json["queries"].as_array().map(Vec::len), Some(1));
        assert!(json["total_time_ms"].is_number());

        logged.clear();
        assert!(logged.queries().is_empty());
        assert_eq!(logged.total_time(), Duration::ZERO);
    }

    #[test]
    fn test_disabled_logging_passes_through() {
        let config = LoaderConfig {
            log_queries: false,
            ..LoaderConfig::default()
        };
        let logged = LoggingGateway::new(gateway(), &config);
        logged.fetch_entities(&by_reciprocal()).unwrap();
        assert!(logged.queries().is_empty());
        assert_eq!(logged.inner().query_count(), 1);
    }
}
