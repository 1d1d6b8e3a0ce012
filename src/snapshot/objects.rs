//! Catalog object model
//!
//! One variant per object kind the diff engine understands. Every object can
//! name its own identity and the identities it directly requires.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object kind. The declaration order is the creation tier used to break
/// ordering ties: lower tiers are created first and dropped last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Schema,
    Extension,
    Type,
    Sequence,
    Function,
    Table,
    Constraint,
    Index,
    View,
    Trigger,
    Grant,
}

impl ObjectKind {
    pub fn tier(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Schema => "schema",
            ObjectKind::Extension => "extension",
            ObjectKind::Type => "type",
            ObjectKind::Sequence => "sequence",
            ObjectKind::Function => "function",
            ObjectKind::Table => "table",
            ObjectKind::Constraint => "constraint",
            ObjectKind::Index => "index",
            ObjectKind::View => "view",
            ObjectKind::Trigger => "trigger",
            ObjectKind::Grant => "grant",
        }
    }
}

/// Identity of a catalog object.
///
/// `parent` is set for objects that live on a relation (constraints, indexes,
/// triggers, grants). Functions carry their identity arguments in `name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectId {
    pub kind: ObjectKind,
    pub schema: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub name: String,
}

impl ObjectId {
    pub fn new(kind: ObjectKind, schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            schema: schema.into(),
            parent: None,
            name: name.into(),
        }
    }

    pub fn child(
        kind: ObjectKind,
        schema: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            schema: schema.into(),
            parent: Some(parent.into()),
            name: name.into(),
        }
    }

    pub fn schema(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ObjectKind::Schema, name.clone(), name)
    }

    pub fn table(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Table, schema, name)
    }

    /// The relation a child object lives on, as a table id
    pub fn parent_table(&self) -> Option<ObjectId> {
        self.parent
            .as_ref()
            .map(|p| ObjectId::table(self.schema.clone(), p.clone()))
    }

    /// Dotted path, e.g. `public.users.users_pkey`
    pub fn path(&self) -> String {
        match (&self.kind, &self.parent) {
            (ObjectKind::Schema, _) | (ObjectKind::Extension, _) => self.name.clone(),
            (_, Some(parent)) => format!("{}.{}.{}", self.schema, parent, self.name),
            (_, None) => format!("{}.{}", self.schema, self.name),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub name: String,
    pub schema: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumType {
    pub schema: String,
    pub name: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceOwner {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub schema: String,
    pub name: String,
    pub data_type: String,
    pub start: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cache: i64,
    pub cycle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<SequenceOwner>,
}

impl Sequence {
    /// Everything but ownership, which is diffed separately
    pub fn same_parameters(&self, other: &Sequence) -> bool {
        self.data_type == other.data_type
            && self.start == other.start
            && self.increment == other.increment
            && self.min_value == other.min_value
            && self.max_value == other.max_value
            && self.cache == other.cache
            && self.cycle == other.cycle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    Function,
    Procedure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    pub schema: String,
    pub name: String,
    pub identity_args: String,
    pub result_type: Option<String>,
    pub kind: RoutineKind,
    pub language: String,
    /// Full `CREATE OR REPLACE` text as the server prints it
    pub definition: String,
    /// Tables and types named in the signature
    pub uses: Vec<ObjectId>,
}

impl Function {
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.identity_args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Always,
    ByDefault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    /// Expression of a stored generated column
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,
    /// User-defined (enum) type of the column or of its array elements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<ObjectId>,
}

impl Column {
    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.identity.is_some() || self.generated.is_some()
    }

    pub fn is_array(&self) -> bool {
        self.data_type.ends_with("[]")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    /// Sequences and functions named in column defaults
    pub uses: Vec<ObjectId>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    Check,
    ForeignKey,
    Exclusion,
}

impl ConstraintKind {
    pub fn from_contype(contype: &str) -> Option<Self> {
        match contype {
            "p" => Some(ConstraintKind::PrimaryKey),
            "u" => Some(ConstraintKind::Unique),
            "c" => Some(ConstraintKind::Check),
            "f" => Some(ConstraintKind::ForeignKey),
            "x" => Some(ConstraintKind::Exclusion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub kind: ConstraintKind,
    pub definition: String,
    /// Referenced table and the key it targets, for foreign keys
    pub references: Vec<ObjectId>,
    pub uses: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema: String,
    pub name: String,
    /// Table or materialized view the index is built on
    pub relation: ObjectId,
    pub definition: String,
    pub unique: bool,
    pub uses: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub schema: String,
    pub name: String,
    pub materialized: bool,
    /// Query text without the trailing semicolon
    pub definition: String,
    pub depends_on: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub schema: String,
    pub name: String,
    pub relation: ObjectId,
    pub definition: String,
    pub function: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    /// Table, view or sequence the privilege applies to
    pub relation: ObjectId,
    pub grantee: String,
    pub privilege: String,
    pub grantable: bool,
}

/// Any object captured from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum CatalogObject {
    Schema(SchemaDef),
    Extension(Extension),
    Type(EnumType),
    Sequence(Sequence),
    Function(Function),
    Table(Table),
    Constraint(Constraint),
    Index(Index),
    View(View),
    Trigger(Trigger),
    Grant(Grant),
}

impl CatalogObject {
    pub fn id(&self) -> ObjectId {
        match self {
            CatalogObject::Schema(s) => ObjectId::schema(s.name.clone()),
            CatalogObject::Extension(e) => ObjectId::new(ObjectKind::Extension, "", e.name.clone()),
            CatalogObject::Type(t) => ObjectId::new(ObjectKind::Type, t.schema.clone(), t.name.clone()),
            CatalogObject::Sequence(s) => ObjectId::new(ObjectKind::Sequence, s.schema.clone(), s.name.clone()),
            CatalogObject::Function(f) => ObjectId::new(ObjectKind::Function, f.schema.clone(), f.signature()),
            CatalogObject::Table(t) => ObjectId::table(t.schema.clone(), t.name.clone()),
            CatalogObject::Constraint(c) => {
                ObjectId::child(ObjectKind::Constraint, c.schema.clone(), c.table.clone(), c.name.clone())
            }
            CatalogObject::Index(i) => ObjectId::child(
                ObjectKind::Index,
                i.schema.clone(),
                i.relation.name.clone(),
                i.name.clone(),
            ),
            CatalogObject::View(v) => ObjectId::new(ObjectKind::View, v.schema.clone(), v.name.clone()),
            CatalogObject::Trigger(t) => ObjectId::child(
                ObjectKind::Trigger,
                t.schema.clone(),
                t.relation.name.clone(),
                t.name.clone(),
            ),
            CatalogObject::Grant(g) => ObjectId::child(
                ObjectKind::Grant,
                g.relation.schema.clone(),
                g.relation.name.clone(),
                format!("{}:{}", g.grantee, g.privilege),
            ),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            CatalogObject::Schema(_) => ObjectKind::Schema,
            CatalogObject::Extension(_) => ObjectKind::Extension,
            CatalogObject::Type(_) => ObjectKind::Type,
            CatalogObject::Sequence(_) => ObjectKind::Sequence,
            CatalogObject::Function(_) => ObjectKind::Function,
            CatalogObject::Table(_) => ObjectKind::Table,
            CatalogObject::Constraint(_) => ObjectKind::Constraint,
            CatalogObject::Index(_) => ObjectKind::Index,
            CatalogObject::View(_) => ObjectKind::View,
            CatalogObject::Trigger(_) => ObjectKind::Trigger,
            CatalogObject::Grant(_) => ObjectKind::Grant,
        }
    }

    /// Relation the object lives on, if any
    pub fn relation(&self) -> Option<ObjectId> {
        match self {
            CatalogObject::Constraint(c) => Some(ObjectId::table(c.schema.clone(), c.table.clone())),
            CatalogObject::Index(i) => Some(i.relation.clone()),
            CatalogObject::Trigger(t) => Some(t.relation.clone()),
            CatalogObject::Grant(g) => Some(g.relation.clone()),
            _ => None,
        }
    }

    /// Identities this object needs to exist before it can be created.
    ///
    /// Sequence ownership is left out: it is attached after both sides exist
    /// and never blocks a drop.
    pub fn requires(&self) -> Vec<ObjectId> {
        let mut deps = match self {
            CatalogObject::Schema(_) => Vec::new(),
            CatalogObject::Extension(e) => vec![ObjectId::schema(e.schema.clone())],
            CatalogObject::Type(t) => vec![ObjectId::schema(t.schema.clone())],
            CatalogObject::Sequence(s) => vec![ObjectId::schema(s.schema.clone())],
            CatalogObject::Function(f) => {
                let mut deps = vec![ObjectId::schema(f.schema.clone())];
                deps.extend(f.uses.iter().cloned());
                deps
            }
            CatalogObject::Table(t) => {
                let mut deps = vec![ObjectId::schema(t.schema.clone())];
                deps.extend(t.columns.iter().filter_map(|c| c.type_ref.clone()));
                deps.extend(t.uses.iter().cloned());
                deps
            }
            CatalogObject::Constraint(c) => {
                let mut deps = vec![ObjectId::table(c.schema.clone(), c.table.clone())];
                deps.extend(c.references.iter().cloned());
                deps.extend(c.uses.iter().cloned());
                deps
            }
            CatalogObject::Index(i) => {
                let mut deps = vec![i.relation.clone()];
                deps.extend(i.uses.iter().cloned());
                deps
            }
            CatalogObject::View(v) => {
                let mut deps = vec![ObjectId::schema(v.schema.clone())];
                deps.extend(v.depends_on.iter().cloned());
                deps
            }
            CatalogObject::Trigger(t) => vec![t.relation.clone(), t.function.clone()],
            CatalogObject::Grant(g) => vec![g.relation.clone()],
        };
        let own = self.id();
        deps.retain(|d| *d != own);
        deps.sort();
        deps.dedup();
        deps
    }
}
