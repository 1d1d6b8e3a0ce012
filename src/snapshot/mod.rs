//! Schema Snapshot Module
//!
//! A snapshot is an immutable, point-in-time capture of one schema state,
//! keyed by object identity. It is produced once per endpoint and handed to
//! the diff engine; nothing mutates it afterwards.

pub mod objects;

pub use objects::{
    CatalogObject, Column, Constraint, ConstraintKind, EnumType, Extension, Function, Grant,
    Identity, Index, ObjectId, ObjectKind, RoutineKind, SchemaDef, Sequence, SequenceOwner,
    Table, Trigger, View,
};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Complete schema state at a point in time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Where the state came from, e.g. `migrations` or a masked URL
    pub label: String,
    pub captured_at: DateTime<Utc>,
    pub checksum: String,
    #[serde(serialize_with = "objects_as_list")]
    objects: BTreeMap<ObjectId, CatalogObject>,
    #[serde(skip)]
    dependents: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
}

fn objects_as_list<S: Serializer>(
    objects: &BTreeMap<ObjectId, CatalogObject>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(objects.values())
}

impl Snapshot {
    pub fn new(label: impl Into<String>, objects: impl IntoIterator<Item = CatalogObject>) -> Self {
        let objects: BTreeMap<ObjectId, CatalogObject> =
            objects.into_iter().map(|o| (o.id(), o)).collect();

        let mut dependents: BTreeMap<ObjectId, BTreeSet<ObjectId>> = BTreeMap::new();
        for (id, object) in &objects {
            for dep in object.requires() {
                dependents.entry(dep).or_default().insert(id.clone());
            }
        }

        let checksum = Self::compute_checksum(&objects);
        Self {
            label: label.into(),
            captured_at: Utc::now(),
            checksum,
            objects,
            dependents,
        }
    }

    /// SHA-256 over every object's identity and canonical JSON, in key order
    fn compute_checksum(objects: &BTreeMap<ObjectId, CatalogObject>) -> String {
        let mut hasher = Sha256::new();
        for (id, object) in objects {
            hasher.update(id.to_string().as_bytes());
            hasher.update(b"\0");
            // Serializing plain data structs cannot fail
            if let Ok(json) = serde_json::to_vec(object) {
                hasher.update(&json);
            }
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, id: &ObjectId) -> Option<&CatalogObject> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects in identity order
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &CatalogObject)> {
        self.objects.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.objects.keys()
    }

    /// Direct requirements of `id` that exist in this snapshot
    pub fn dependencies(&self, id: &ObjectId) -> Vec<ObjectId> {
        self.objects
            .get(id)
            .map(|o| {
                o.requires()
                    .into_iter()
                    .filter(|d| self.objects.contains_key(d))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Objects that directly require `id`
    pub fn dependents(&self, id: &ObjectId) -> Vec<ObjectId> {
        self.dependents
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn table(&self, id: &ObjectId) -> Option<&Table> {
        match self.objects.get(id) {
            Some(CatalogObject::Table(t)) => Some(t),
            _ => None,
        }
    }

    pub fn count_by_kind(&self) -> BTreeMap<ObjectKind, usize> {
        let mut counts = BTreeMap::new();
        for id in self.objects.keys() {
            *counts.entry(id.kind).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Small builders for hand-made snapshots in unit tests

    use super::*;

    pub fn schema(name: &str) -> CatalogObject {
        CatalogObject::Schema(SchemaDef {
            name: name.to_string(),
        })
    }

    pub fn column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            default: None,
            identity: None,
            generated: None,
            type_ref: None,
        }
    }

    pub fn not_null(mut column: Column) -> Column {
        column.nullable = false;
        column
    }

    pub fn with_default(mut column: Column, default: &str) -> Column {
        column.default = Some(default.to_string());
        column
    }

    pub fn table(schema: &str, name: &str, columns: Vec<Column>) -> CatalogObject {
        CatalogObject::Table(Table {
            schema: schema.to_string(),
            name: name.to_string(),
            columns,
            uses: Vec::new(),
        })
    }

    pub fn primary_key(schema: &str, table: &str, columns: &str) -> CatalogObject {
        CatalogObject::Constraint(Constraint {
            schema: schema.to_string(),
            table: table.to_string(),
            name: format!("{}_pkey", table),
            kind: ConstraintKind::PrimaryKey,
            definition: format!("PRIMARY KEY ({})", columns),
            references: Vec::new(),
            uses: Vec::new(),
        })
    }

    pub fn foreign_key(
        schema: &str,
        table: &str,
        column: &str,
        target: &str,
        target_column: &str,
    ) -> CatalogObject {
        CatalogObject::Constraint(Constraint {
            schema: schema.to_string(),
            table: table.to_string(),
            name: format!("{}_{}_fkey", table, column),
            kind: ConstraintKind::ForeignKey,
            definition: format!(
                "FOREIGN KEY ({}) REFERENCES {}.{}({})",
                column, schema, target, target_column
            ),
            references: vec![
                ObjectId::table(schema, target),
                ObjectId::child(ObjectKind::Constraint, schema, target, format!("{}_pkey", target)),
            ],
            uses: Vec::new(),
        })
    }

    pub fn view(schema: &str, name: &str, definition: &str, depends_on: Vec<ObjectId>) -> CatalogObject {
        CatalogObject::View(View {
            schema: schema.to_string(),
            name: name.to_string(),
            materialized: false,
            definition: definition.to_string(),
            depends_on,
        })
    }

    pub fn enum_type(schema: &str, name: &str, labels: &[&str]) -> CatalogObject {
        CatalogObject::Type(EnumType {
            schema: schema.to_string(),
            name: name.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        })
    }

    pub fn grant(schema: &str, table: &str, grantee: &str, privilege: &str) -> CatalogObject {
        CatalogObject::Grant(Grant {
            relation: ObjectId::table(schema, table),
            grantee: grantee.to_string(),
            privilege: privilege.to_string(),
            grantable: false,
        })
    }

    pub fn snapshot(label: &str, objects: Vec<CatalogObject>) -> Snapshot {
        Snapshot::new(label, objects)
    }
}
