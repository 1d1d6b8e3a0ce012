//! Schema Introspection Module
//!
//! Reads the PostgreSQL catalog of one database into a [`Snapshot`]. The same
//! introspector serves live databases and scratch databases, so every
//! endpoint kind is compared on identical terms.

pub mod queries;

use crate::error::ShiftResult;
use crate::snapshot::{
    CatalogObject, Column, Constraint, ConstraintKind, EnumType, Extension, Function, Grant,
    Identity, Index, ObjectId, ObjectKind, RoutineKind, SchemaDef, Sequence, SequenceOwner,
    Snapshot, Table, Trigger, View,
};
use deadpool_postgres::Client;
use std::collections::BTreeMap;
use tokio_postgres::Row;
use tracing::{debug, info};

/// Catalog reader bound to one client
pub struct PostgresIntrospector<'a> {
    client: &'a Client,
    schema: Option<String>,
    include_privileges: bool,
}

impl<'a> PostgresIntrospector<'a> {
    pub fn new(client: &'a Client, schema: Option<String>, include_privileges: bool) -> Self {
        Self {
            client,
            schema,
            include_privileges,
        }
    }

    async fn fetch(&self, query: &str) -> ShiftResult<Vec<Row>> {
        Ok(self.client.query(query, &[&self.schema]).await?)
    }

    /// Capture the full schema state. Queries run one after another.
    pub async fn snapshot(&self, label: &str) -> ShiftResult<Snapshot> {
        debug!("Introspecting {} (schema filter: {:?})", label, self.schema);

        let mut objects: Vec<CatalogObject> = Vec::new();
        objects.extend(self.get_schemas().await?);
        objects.extend(self.get_extensions().await?);
        objects.extend(self.get_enums().await?);
        objects.extend(self.get_sequences().await?);

        let deps = self.get_dependencies().await?;

        let mut functions = self.get_functions().await?;
        for f in &mut functions {
            let id = ObjectId::new(ObjectKind::Function, f.schema.clone(), f.signature());
            f.uses = deps.get(&id).cloned().unwrap_or_default();
        }
        objects.extend(functions.into_iter().map(CatalogObject::Function));

        let mut tables = self.get_tables().await?;
        for table in tables.values_mut() {
            let id = ObjectId::table(table.schema.clone(), table.name.clone());
            table.uses = deps.get(&id).cloned().unwrap_or_default();
        }
        objects.extend(tables.into_values().map(CatalogObject::Table));

        let mut constraints = self.get_constraints().await?;
        for c in &mut constraints {
            let id = ObjectId::child(ObjectKind::Constraint, c.schema.clone(), c.table.clone(), c.name.clone());
            c.uses = deps.get(&id).cloned().unwrap_or_default();
        }
        objects.extend(constraints.into_iter().map(CatalogObject::Constraint));

        let mut indexes = self.get_indexes().await?;
        for i in &mut indexes {
            let id = ObjectId::child(ObjectKind::Index, i.schema.clone(), i.relation.name.clone(), i.name.clone());
            i.uses = deps.get(&id).cloned().unwrap_or_default();
        }
        objects.extend(indexes.into_iter().map(CatalogObject::Index));

        let mut views = self.get_views().await?;
        for v in &mut views {
            let id = ObjectId::new(ObjectKind::View, v.schema.clone(), v.name.clone());
            v.depends_on = deps.get(&id).cloned().unwrap_or_default();
        }
        objects.extend(views.into_iter().map(CatalogObject::View));

        objects.extend(self.get_triggers().await?);

        if self.include_privileges {
            objects.extend(self.get_grants().await?);
        }

        let snapshot = Snapshot::new(label, objects);
        info!(
            "Captured {} objects from {} (checksum {})",
            snapshot.len(),
            label,
            &snapshot.checksum[..12]
        );
        Ok(snapshot)
    }

    async fn get_schemas(&self) -> ShiftResult<Vec<CatalogObject>> {
        let rows = self.fetch(queries::SCHEMAS).await?;
        Ok(rows
            .iter()
            .map(|row| CatalogObject::Schema(SchemaDef { name: row.get("name") }))
            .collect())
    }

    async fn get_extensions(&self) -> ShiftResult<Vec<CatalogObject>> {
        let rows = self.fetch(queries::EXTENSIONS).await?;
        Ok(rows
            .iter()
            .map(|row| {
                CatalogObject::Extension(Extension {
                    name: row.get("name"),
                    schema: row.get("schema"),
                    version: row.get("version"),
                })
            })
            .collect())
    }

    async fn get_enums(&self) -> ShiftResult<Vec<CatalogObject>> {
        let rows = self.fetch(queries::ENUMS).await?;
        Ok(rows
            .iter()
            .map(|row| {
                CatalogObject::Type(EnumType {
                    schema: row.get("schema"),
                    name: row.get("name"),
                    labels: row.get("labels"),
                })
            })
            .collect())
    }

    async fn get_sequences(&self) -> ShiftResult<Vec<CatalogObject>> {
        let rows = self.fetch(queries::SEQUENCES).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let owned_table: Option<String> = row.get("owned_table");
                let owned_column: Option<String> = row.get("owned_column");
                CatalogObject::Sequence(Sequence {
                    schema: row.get("schema"),
                    name: row.get("name"),
                    data_type: row.get("data_type"),
                    start: row.get("start"),
                    increment: row.get("increment"),
                    min_value: row.get("min_value"),
                    max_value: row.get("max_value"),
                    cache: row.get("cache"),
                    cycle: row.get("cycle"),
                    owned_by: owned_table
                        .zip(owned_column)
                        .map(|(table, column)| SequenceOwner { table, column }),
                })
            })
            .collect())
    }

    async fn get_functions(&self) -> ShiftResult<Vec<Function>> {
        let rows = self.fetch(queries::FUNCTIONS).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let kind: String = row.get("kind");
                let definition: String = row.get("definition");
                Function {
                    schema: row.get("schema"),
                    name: row.get("name"),
                    identity_args: row.get("identity_args"),
                    result_type: row.get("result_type"),
                    kind: if kind == "p" {
                        RoutineKind::Procedure
                    } else {
                        RoutineKind::Function
                    },
                    language: row.get("language"),
                    definition: definition.trim_end().to_string(),
                    uses: Vec::new(),
                }
            })
            .collect())
    }

    /// Tables with their columns, keyed by (schema, name)
    async fn get_tables(&self) -> ShiftResult<BTreeMap<(String, String), Table>> {
        let mut tables = BTreeMap::new();
        for row in self.fetch(queries::TABLES).await? {
            let schema: String = row.get("schema");
            let name: String = row.get("name");
            tables.insert(
                (schema.clone(), name.clone()),
                Table {
                    schema,
                    name,
                    columns: Vec::new(),
                    uses: Vec::new(),
                },
            );
        }

        for row in self.fetch(queries::COLUMNS).await? {
            let key: (String, String) = (row.get("schema"), row.get("table_name"));
            if let Some(table) = tables.get_mut(&key) {
                table.columns.push(column_from_row(&row));
            }
        }

        Ok(tables)
    }

    async fn get_constraints(&self) -> ShiftResult<Vec<Constraint>> {
        let rows = self.fetch(queries::CONSTRAINTS).await?;
        let mut constraints = Vec::with_capacity(rows.len());
        for row in rows {
            let contype: String = row.get("contype");
            let Some(kind) = ConstraintKind::from_contype(&contype) else {
                continue;
            };

            let mut references = Vec::new();
            let ref_schema: Option<String> = row.get("ref_schema");
            let ref_table: Option<String> = row.get("ref_table");
            if let (Some(schema), Some(table)) = (ref_schema, ref_table) {
                let ref_constraint: Option<String> = row.get("ref_constraint");
                let ref_index: Option<String> = row.get("ref_index");
                if let Some(name) = ref_constraint {
                    references.push(ObjectId::child(ObjectKind::Constraint, schema.clone(), table.clone(), name));
                } else if let Some(name) = ref_index {
                    references.push(ObjectId::child(ObjectKind::Index, schema.clone(), table.clone(), name));
                }
                references.push(ObjectId::table(schema, table));
            }

            constraints.push(Constraint {
                schema: row.get("schema"),
                table: row.get("table_name"),
                name: row.get("name"),
                kind,
                definition: row.get("definition"),
                references,
                uses: Vec::new(),
            });
        }
        Ok(constraints)
    }

    async fn get_indexes(&self) -> ShiftResult<Vec<Index>> {
        let rows = self.fetch(queries::INDEXES).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let schema: String = row.get("schema");
                let relkind: String = row.get("relkind");
                Index {
                    relation: relation_id(&relkind, schema.clone(), row.get("relation")),
                    schema,
                    name: row.get("name"),
                    definition: row.get("definition"),
                    unique: row.get("is_unique"),
                    uses: Vec::new(),
                }
            })
            .collect())
    }

    async fn get_views(&self) -> ShiftResult<Vec<View>> {
        let rows = self.fetch(queries::VIEWS).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let definition: String = row.get("definition");
                View {
                    schema: row.get("schema"),
                    name: row.get("name"),
                    materialized: row.get("materialized"),
                    definition: definition.trim().trim_end_matches(';').trim_end().to_string(),
                    depends_on: Vec::new(),
                }
            })
            .collect())
    }

    async fn get_triggers(&self) -> ShiftResult<Vec<CatalogObject>> {
        let rows = self.fetch(queries::TRIGGERS).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let schema: String = row.get("schema");
                let relkind: String = row.get("relkind");
                let function_schema: String = row.get("function_schema");
                let function_signature: String = row.get("function_signature");
                CatalogObject::Trigger(Trigger {
                    relation: relation_id(&relkind, schema.clone(), row.get("relation")),
                    schema,
                    name: row.get("name"),
                    definition: row.get("definition"),
                    function: ObjectId::new(ObjectKind::Function, function_schema, function_signature),
                })
            })
            .collect())
    }

    async fn get_grants(&self) -> ShiftResult<Vec<CatalogObject>> {
        let rows = self.fetch(queries::GRANTS).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let relkind: String = row.get("relkind");
                CatalogObject::Grant(Grant {
                    relation: relation_id(&relkind, row.get("schema"), row.get("relation")),
                    grantee: row.get("grantee"),
                    privilege: row.get("privilege"),
                    grantable: row.get("grantable"),
                })
            })
            .collect())
    }

    /// Dependency edges, keyed by the dependent object
    async fn get_dependencies(&self) -> ShiftResult<BTreeMap<ObjectId, Vec<ObjectId>>> {
        let rows = self.fetch(queries::DEPENDENCIES).await?;
        let mut deps: BTreeMap<ObjectId, Vec<ObjectId>> = BTreeMap::new();
        for row in rows {
            let owner_kind: String = row.get("owner_kind");
            let ref_kind: String = row.get("ref_kind");
            let (Some(owner_kind), Some(ref_kind)) = (kind_from_str(&owner_kind), kind_from_str(&ref_kind)) else {
                continue;
            };

            let schema: String = row.get("schema");
            let parent: Option<String> = row.get("parent");
            let name: String = row.get("name");
            let owner = match parent {
                Some(parent) => ObjectId::child(owner_kind, schema, parent, name),
                None => ObjectId::new(owner_kind, schema, name),
            };
            let referenced = ObjectId::new(ref_kind, row.get::<_, String>("ref_schema"), row.get::<_, String>("ref_name"));

            if owner != referenced {
                deps.entry(owner).or_default().push(referenced);
            }
        }
        debug!("Resolved dependencies for {} objects", deps.len());
        Ok(deps)
    }
}

fn column_from_row(row: &Row) -> Column {
    let identity: Option<String> = row.get("identity");
    let enum_schema: Option<String> = row.get("enum_schema");
    let enum_name: Option<String> = row.get("enum_name");

    Column {
        name: row.get("name"),
        data_type: row.get("data_type"),
        nullable: row.get("nullable"),
        default: row.get("default_expr"),
        identity: match identity.as_deref() {
            Some("a") => Some(Identity::Always),
            Some("d") => Some(Identity::ByDefault),
            _ => None,
        },
        generated: row.get("generated_expr"),
        type_ref: enum_schema
            .zip(enum_name)
            .map(|(schema, name)| ObjectId::new(ObjectKind::Type, schema, name)),
    }
}

/// Map a `relkind` to the object kind pgshift models it as
fn relation_id(relkind: &str, schema: String, name: String) -> ObjectId {
    let kind = match relkind {
        "v" | "m" => ObjectKind::View,
        "S" => ObjectKind::Sequence,
        _ => ObjectKind::Table,
    };
    ObjectId::new(kind, schema, name)
}

fn kind_from_str(kind: &str) -> Option<ObjectKind> {
    match kind {
        "table" => Some(ObjectKind::Table),
        "view" => Some(ObjectKind::View),
        "sequence" => Some(ObjectKind::Sequence),
        "function" => Some(ObjectKind::Function),
        "type" => Some(ObjectKind::Type),
        "constraint" => Some(ObjectKind::Constraint),
        "index" => Some(ObjectKind::Index),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_relation_id_by_relkind() {
        assert_eq!(
            relation_id("m", "public".to_string(), "mv".to_string()).kind,
            ObjectKind::View
        );
        assert_eq!(
            relation_id("S", "public".to_string(), "s".to_string()).kind,
            ObjectKind::Sequence
        );
        assert_eq!(
            relation_id("r", "public".to_string(), "t".to_string()),
            ObjectId::table("public", "t")
        );
    }

    #[test]
    fn test_kind_from_str_matches_query_labels() {
        for label in ["table", "view", "sequence", "function", "type", "constraint", "index"] {
            let kind = kind_from_str(label).unwrap();
            assert_eq!(kind.as_str(), label);
        }
        assert_eq!(kind_from_str("rule"), None);
    }

    #[test]
    fn test_every_query_filters_on_schema_parameter() {
        for query in [
            queries::SCHEMAS,
            queries::EXTENSIONS,
            queries::ENUMS,
            queries::SEQUENCES,
            queries::FUNCTIONS,
            queries::TABLES,
            queries::COLUMNS,
            queries::CONSTRAINTS,
            queries::INDEXES,
            queries::VIEWS,
            queries::TRIGGERS,
            queries::GRANTS,
            queries::DEPENDENCIES,
        ] {
            assert!(query.contains("$1::text IS NULL"), "missing schema filter in {}", query);
        }
    }
}
