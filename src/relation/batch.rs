//! Batch queries
//!
//! Every fetch the loader issues is one `BatchQuery` covering the whole root
//! set of a level, never one query per root. The query is a typed description
//! that gateways interpret directly; SQL-backed gateways and the statement log
//! render it through `sea-query` with [`BatchQuery::to_statement`].
//!
//! # Shapes
//!
//! | Variant        | Used for                  | Result                      |
//! |----------------|---------------------------|-----------------------------|
//! | `ForeignKeys`  | to-one key probe          | `[root_id, fk_0, fk_1, ..]` |
//! | `ByIds`        | to-one targets            | entities                    |
//! | `ByReciprocal` | one-to-many targets       | entities                    |
//! | `ByJoin`       | many-to-many targets      | entities                    |
//! | `JoinPairs`    | many-to-many routing      | `[child_id, root_id]`       |

use crate::entity::Key;
use crate::gateway::GatewayError;
use crate::relation::def::{resolve_join_table, EntityMetadata, MetadataSource};
use sea_query::{Alias, Asterisk, Expr, ExprTrait, JoinType, PostgresQueryBuilder, Query, SelectStatement};
use serde::Serialize;
use std::fmt;

const ROOT_ALIAS: &str = "e";
const JOIN_ALIAS: &str = "j";

/// A single batched select against one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchQuery {
    /// Foreign keys of several to-one `fields` for every root in `ids`
    ForeignKeys {
        entity: String,
        fields: Vec<String>,
        ids: Vec<Key>,
    },
    /// Entities of type `entity` whose primary key is in `ids`
    ByIds { entity: String, ids: Vec<Key> },
    /// Entities whose to-one `reciprocal` field points into `ids`
    ByReciprocal {
        entity: String,
        reciprocal: String,
        ids: Vec<Key>,
    },
    /// Entities joined through the many-to-many `reciprocal` to `ids`
    ByJoin {
        entity: String,
        reciprocal: String,
        ids: Vec<Key>,
    },
    /// `(child_id, root_id)` pairs of the many-to-many `reciprocal`
    JoinPairs {
        entity: String,
        reciprocal: String,
        ids: Vec<Key>,
    },
}

impl BatchQuery {
    /// Entity type the query selects from
    pub fn entity(&self) -> &str {
        match self {
            BatchQuery::ForeignKeys { entity, .. }
            | BatchQuery::ByIds { entity, .. }
            | BatchQuery::ByReciprocal { entity, .. }
            | BatchQuery::ByJoin { entity, .. }
            | BatchQuery::JoinPairs { entity, .. } => entity,
        }
    }

    /// Identities bound into the `IN (...)` list
    pub fn ids(&self) -> &[Key] {
        match self {
            BatchQuery::ForeignKeys { ids, .. }
            | BatchQuery::ByIds { ids, .. }
            | BatchQuery::ByReciprocal { ids, .. }
            | BatchQuery::ByJoin { ids, .. }
            | BatchQuery::JoinPairs { ids, .. } => ids,
        }
    }

    /// Whether the query yields scalar rows rather than entities
    pub fn is_scalar(&self) -> bool {
        matches!(self, BatchQuery::ForeignKeys { .. } | BatchQuery::JoinPairs { .. })
    }

    /// Short name of the query shape, used in logs and spans
    pub fn kind(&self) -> &'static str {
        match self {
            BatchQuery::ForeignKeys { .. } => "foreign_keys",
            BatchQuery::ByIds { .. } => "by_ids",
            BatchQuery::ByReciprocal { .. } => "by_reciprocal",
            BatchQuery::ByJoin { .. } => "by_join",
            BatchQuery::JoinPairs { .. } => "join_pairs",
        }
    }

    /// Render the query as a `sea-query` select statement
    ///
    /// Table and column names come from `source`; identities are bound as
    /// values.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::UnknownEntity` when a referenced type is not
    /// registered, and `GatewayError::QueryError` when the metadata lacks the
    /// column information the shape needs.
    pub fn to_statement<S: MetadataSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<SelectStatement, GatewayError> {
        let meta = lookup(source, self.entity())?;
        let root = Alias::new(ROOT_ALIAS);
        let mut query = Query::select();
        query.from_as(Alias::new(meta.table.as_str()), root.clone());

        match self {
            BatchQuery::ForeignKeys { fields, ids, .. } => {
                query.expr_as(
                    Expr::col((root.clone(), Alias::new(meta.primary_key.as_str()))),
                    Alias::new("e_id"),
                );
                for (i, field) in fields.iter().enumerate() {
                    let column = join_column(meta, field)?;
                    query.expr_as(
                        Expr::col((root.clone(), Alias::new(column))),
                        Alias::new(format!("id_{i}")),
                    );
                }
                query.and_where(in_list(&root, &meta.primary_key, ids));
            }
            BatchQuery::ByIds { ids, .. } => {
                query
                    .column((root.clone(), Asterisk))
                    .and_where(in_list(&root, &meta.primary_key, ids));
            }
            BatchQuery::ByReciprocal { reciprocal, ids, .. } => {
                let column = join_column(meta, reciprocal)?;
                query
                    .column((root.clone(), Asterisk))
                    .and_where(in_list(&root, column, ids));
            }
            BatchQuery::ByJoin { reciprocal, ids, .. } => {
                let join = Alias::new(JOIN_ALIAS);
                let table = join_table(source, meta, reciprocal)?;
                query
                    .distinct()
                    .column((root.clone(), Asterisk))
                    .join_as(
                        JoinType::InnerJoin,
                        Alias::new(table.name.as_str()),
                        join.clone(),
                        Expr::col((join.clone(), Alias::new(table.source_column.as_str())))
                            .equals((root.clone(), Alias::new(meta.primary_key.as_str()))),
                    )
                    .and_where(in_list(&join, &table.target_column, ids));
            }
            BatchQuery::JoinPairs { reciprocal, ids, .. } => {
                let join = Alias::new(JOIN_ALIAS);
                let table = join_table(source, meta, reciprocal)?;
                query
                    .expr_as(
                        Expr::col((root.clone(), Alias::new(meta.primary_key.as_str()))),
                        Alias::new("child_id"),
                    )
                    .expr_as(
                        Expr::col((join.clone(), Alias::new(table.target_column.as_str()))),
                        Alias::new("root_id"),
                    )
                    .join_as(
                        JoinType::InnerJoin,
                        Alias::new(table.name.as_str()),
                        join.clone(),
                        Expr::col((join.clone(), Alias::new(table.source_column.as_str())))
                            .equals((root.clone(), Alias::new(meta.primary_key.as_str()))),
                    )
                    .and_where(in_list(&join, &table.target_column, ids));
            }
        }

        Ok(query)
    }

    /// Render the query as inline Postgres SQL
    ///
    /// Values are inlined, so the output is meant for logs, not execution.
    pub fn to_sql<S: MetadataSource + ?Sized>(&self, source: &S) -> Result<String, GatewayError> {
        Ok(self.to_statement(source)?.to_string(PostgresQueryBuilder))
    }
}

impl fmt::Display for BatchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.ids().iter().map(ToString::to_string).collect();
        match self {
            BatchQuery::ForeignKeys { entity, fields, .. } => {
                write!(f, "{entity}[{}] keys for ({})", fields.join(", "), ids.join(", "))
            }
            BatchQuery::ByIds { entity, .. } => {
                write!(f, "{entity} by id in ({})", ids.join(", "))
            }
            BatchQuery::ByReciprocal { entity, reciprocal, .. }
            | BatchQuery::ByJoin { entity, reciprocal, .. }
            | BatchQuery::JoinPairs { entity, reciprocal, .. } => {
                write!(f, "{entity} {} {reciprocal} in ({})", self.kind(), ids.join(", "))
            }
        }
    }
}

fn lookup<'a, S: MetadataSource + ?Sized>(
    source: &'a S,
    entity: &str,
) -> Result<&'a EntityMetadata, GatewayError> {
    source
        .metadata(entity)
        .ok_or_else(|| GatewayError::UnknownEntity(entity.to_string()))
}

fn join_column<'a>(meta: &'a EntityMetadata, field: &str) -> Result<&'a str, GatewayError> {
    meta.get(field)
        .and_then(|desc| desc.join_column.as_deref())
        .ok_or_else(|| {
            GatewayError::QueryError(format!(
                "{}.{} has no join column to select",
                meta.name, field
            ))
        })
}

fn join_table<S: MetadataSource + ?Sized>(
    source: &S,
    meta: &EntityMetadata,
    field: &str,
) -> Result<crate::relation::def::JoinTable, GatewayError> {
    meta.get(field)
        .and_then(|desc| resolve_join_table(source, desc))
        .ok_or_else(|| {
            GatewayError::QueryError(format!("{}.{} has no join table", meta.name, field))
        })
}

fn in_list(table: &Alias, column: &str, ids: &[Key]) -> Expr {
    Expr::col((table.clone(), Alias::new(column)))
        .is_in(ids.iter().cloned().map(sea_query::Value::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::def::{AssociationDescriptor, JoinTable, MetadataRegistry};

    fn registry() -> MetadataRegistry {
        MetadataRegistry::new()
            .register(
                EntityMetadata::new("User", "users")
                    .association(AssociationDescriptor::one_to_many(
                        "User", "addresses", "Address", "owner",
                    ))
                    .association(
                        AssociationDescriptor::many_to_many(
                            "User",
                            "groups",
                            "Group",
                            JoinTable::new("user_groups", "user_id", "group_id"),
                        )
                        .inversed_by("members"),
                    )
                    .association(
                        AssociationDescriptor::to_one("User", "manager", "User", "manager_id")
                            .inversed_by("reports"),
                    ),
            )
            .register(
                EntityMetadata::new("Address", "addresses")
                    .association(
                        AssociationDescriptor::to_one("Address", "owner", "User", "owner_id")
                            .inversed_by("addresses"),
                    ),
            )
            .register(
                EntityMetadata::new("Group", "groups").association(
                    AssociationDescriptor::many_to_many_inverse("Group", "members", "User", "groups"),
                ),
            )
    }

    fn ids() -> Vec<Key> {
        vec![Key::Int(1), Key::Int(2)]
    }

    #[test]
    fn test_foreign_key_probe_sql() {
        let query = BatchQuery::ForeignKeys {
            entity: "User".into(),
            fields: vec!["manager".into()],
            ids: ids(),
        };
        let sql = query.to_sql(&registry()).unwrap();
        assert!(sql.contains(r#""e"."id" AS "e_id""#), "{sql}");
        assert!(sql.contains(r#""e"."manager_id" AS "id_0""#), "{sql}");
        assert!(sql.contains(r#"FROM "users" AS "e""#), "{sql}");
        assert!(sql.contains(r#""e"."id" IN (1, 2)"#), "{sql}");
    }

    #[test]
    fn test_one_to_many_sql_filters_on_reciprocal_column() {
        let query = BatchQuery::ByReciprocal {
            entity: "Address".into(),
            reciprocal: "owner".into(),
            ids: ids(),
        };
        let sql = query.to_sql(&registry()).unwrap();
        assert!(sql.contains(r#"FROM "addresses" AS "e""#), "{sql}");
        assert!(sql.contains(r#""e"."owner_id" IN (1, 2)"#), "{sql}");
    }

    #[test]
    fn test_many_to_many_sql_joins_through_table() {
        // Groups of users 1 and 2, reached through Group#members
        let query = BatchQuery::ByJoin {
            entity: "Group".into(),
            reciprocal: "members".into(),
            ids: ids(),
        };
        let sql = query.to_sql(&registry()).unwrap();
        assert!(sql.starts_with("SELECT DISTINCT"), "{sql}");
        assert!(sql.contains(r#"INNER JOIN "user_groups" AS "j""#), "{sql}");
        assert!(sql.contains(r#""j"."group_id" = "e"."id""#), "{sql}");
        assert!(sql.contains(r#""j"."user_id" IN (1, 2)"#), "{sql}");
    }

    #[test]
    fn test_join_pairs_sql_projects_child_and_root() {
        let query = BatchQuery::JoinPairs {
            entity: "Group".into(),
            reciprocal: "members".into(),
            ids: ids(),
        };
        let sql = query.to_sql(&registry()).unwrap();
        assert!(sql.contains(r#""e"."id" AS "child_id""#), "{sql}");
        assert!(sql.contains(r#""j"."user_id" AS "root_id""#), "{sql}");
    }

    #[test]
    fn test_unknown_entity_is_reported() {
        let query = BatchQuery::ByIds {
            entity: "Ghost".into(),
            ids: ids(),
        };
        assert!(matches!(
            query.to_statement(&registry()),
            Err(GatewayError::UnknownEntity(name)) if name == "Ghost"
        ));
    }

    #[test]
    fn test_missing_join_column_is_query_error() {
        // addresses is an inverse one-to-many: it has no column of its own
        let query = BatchQuery::ForeignKeys {
            entity: "User".into(),
            fields: vec!["addresses".into()],
            ids: ids(),
        };
        assert!(matches!(query.to_sql(&registry()), Err(GatewayError::QueryError(_))));
    }

    #[test]
    fn test_query_accessors_and_display() {
        let query = BatchQuery::ByIds {
            entity: "Country".into(),
            ids: vec![Key::from("cz"), Key::from("de")],
        };
        assert_eq!(query.entity(), "Country");
        assert_eq!(query.ids().len(), 2);
        assert!(!query.is_scalar());
        assert_eq!(query.to_string(), "Country by id in (cz, de)");

        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["kind"], "by_ids");
    }
}
