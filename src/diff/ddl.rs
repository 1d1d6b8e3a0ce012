//! DDL text builders
//!
//! Every embedded name goes through `quote`. Definitions captured from the
//! server (`pg_get_*def`) are used verbatim. Statements carry no trailing
//! semicolon.

use crate::quote::{ident, literal, qualified};
use crate::snapshot::{
    Column, Constraint, EnumType, Extension, Function, Grant, Identity, Index, ObjectId,
    ObjectKind, RoutineKind, Sequence, Table, Trigger, View,
};

pub fn create_schema(name: &str) -> String {
    format!("CREATE SCHEMA {}", ident(name))
}

pub fn drop_schema(name: &str) -> String {
    format!("DROP SCHEMA {}", ident(name))
}

pub fn create_extension(ext: &Extension) -> String {
    format!(
        "CREATE EXTENSION IF NOT EXISTS {} WITH SCHEMA {} VERSION {}",
        ident(&ext.name),
        ident(&ext.schema),
        literal(&ext.version)
    )
}

pub fn update_extension(ext: &Extension) -> String {
    format!("ALTER EXTENSION {} UPDATE TO {}", ident(&ext.name), literal(&ext.version))
}

pub fn set_extension_schema(ext: &Extension) -> String {
    format!("ALTER EXTENSION {} SET SCHEMA {}", ident(&ext.name), ident(&ext.schema))
}

pub fn drop_extension(ext: &Extension) -> String {
    format!("DROP EXTENSION {}", ident(&ext.name))
}

pub fn create_enum(t: &EnumType) -> String {
    let labels: Vec<String> = t.labels.iter().map(|l| literal(l)).collect();
    format!(
        "CREATE TYPE {} AS ENUM ({})",
        qualified(&t.schema, &t.name),
        labels.join(", ")
    )
}

/// Where a new enum label goes relative to an existing one
pub enum LabelPosition<'a> {
    After(&'a str),
    Before(&'a str),
    End,
}

pub fn add_enum_value(t: &EnumType, label: &str, position: LabelPosition<'_>) -> String {
    let placement = match position {
        LabelPosition::After(other) => format!(" AFTER {}", literal(other)),
        LabelPosition::Before(other) => format!(" BEFORE {}", literal(other)),
        LabelPosition::End => String::new(),
    };
    format!(
        "ALTER TYPE {} ADD VALUE {}{}",
        qualified(&t.schema, &t.name),
        literal(label),
        placement
    )
}

pub fn rename_type(schema: &str, name: &str, new_name: &str) -> String {
    format!("ALTER TYPE {} RENAME TO {}", qualified(schema, name), ident(new_name))
}

pub fn drop_type(schema: &str, name: &str) -> String {
    format!("DROP TYPE {}", qualified(schema, name))
}

fn sequence_parameters(s: &Sequence) -> String {
    format!(
        "AS {} INCREMENT BY {} MINVALUE {} MAXVALUE {} START WITH {} CACHE {} {}",
        s.data_type,
        s.increment,
        s.min_value,
        s.max_value,
        s.start,
        s.cache,
        if s.cycle { "CYCLE" } else { "NO CYCLE" }
    )
}

pub fn create_sequence(s: &Sequence) -> String {
    format!(
        "CREATE SEQUENCE {} {}",
        qualified(&s.schema, &s.name),
        sequence_parameters(s)
    )
}

pub fn alter_sequence(s: &Sequence) -> String {
    format!(
        "ALTER SEQUENCE {} {}",
        qualified(&s.schema, &s.name),
        sequence_parameters(s)
    )
}

pub fn sequence_owned_by(s: &Sequence) -> String {
    let owner = match &s.owned_by {
        Some(owner) => format!("{}.{}", qualified(&s.schema, &owner.table), ident(&owner.column)),
        None => "NONE".to_string(),
    };
    format!("ALTER SEQUENCE {} OWNED BY {}", qualified(&s.schema, &s.name), owner)
}

pub fn drop_sequence(s: &Sequence) -> String {
    format!("DROP SEQUENCE {}", qualified(&s.schema, &s.name))
}

pub fn drop_function(f: &Function) -> String {
    let keyword = match f.kind {
        RoutineKind::Function => "FUNCTION",
        RoutineKind::Procedure => "PROCEDURE",
    };
    format!(
        "DROP {} {}({})",
        keyword,
        qualified(&f.schema, &f.name),
        f.identity_args
    )
}

pub fn column_definition(c: &Column) -> String {
    let mut def = format!("{} {}", ident(&c.name), c.data_type);
    if let Some(expr) = &c.generated {
        def.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", expr));
    } else if let Some(default) = &c.default {
        def.push_str(&format!(" DEFAULT {}", default));
    }
    if let Some(identity) = c.identity {
        def.push_str(&format!(" GENERATED {} AS IDENTITY", identity_keyword(identity)));
    }
    if !c.nullable {
        def.push_str(" NOT NULL");
    }
    def
}

fn identity_keyword(identity: Identity) -> &'static str {
    match identity {
        Identity::Always => "ALWAYS",
        Identity::ByDefault => "BY DEFAULT",
    }
}

pub fn create_table(t: &Table) -> String {
    if t.columns.is_empty() {
        return format!("CREATE TABLE {} ()", qualified(&t.schema, &t.name));
    }
    let columns: Vec<String> = t
        .columns
        .iter()
        .map(|c| format!("    {}", column_definition(c)))
        .collect();
    format!(
        "CREATE TABLE {} (\n{}\n)",
        qualified(&t.schema, &t.name),
        columns.join(",\n")
    )
}

pub fn drop_table(t: &Table) -> String {
    format!("DROP TABLE {}", qualified(&t.schema, &t.name))
}

fn alter_table(t: &Table) -> String {
    format!("ALTER TABLE {}", qualified(&t.schema, &t.name))
}

pub fn add_column(t: &Table, c: &Column) -> String {
    format!("{} ADD COLUMN {}", alter_table(t), column_definition(c))
}

pub fn drop_column(t: &Table, column: &str) -> String {
    format!("{} DROP COLUMN {}", alter_table(t), ident(column))
}

pub fn alter_column_type(t: &Table, c: &Column) -> String {
    format!(
        "{} ALTER COLUMN {} TYPE {} USING {}::{}",
        alter_table(t),
        ident(&c.name),
        c.data_type,
        ident(&c.name),
        c.data_type
    )
}

/// Retype a column onto a rebuilt enum, going through text
pub fn alter_column_type_via_text(t: &Table, c: &Column) -> String {
    let via = if c.is_array() { "text[]" } else { "text" };
    format!(
        "{} ALTER COLUMN {} TYPE {} USING {}::{}::{}",
        alter_table(t),
        ident(&c.name),
        c.data_type,
        ident(&c.name),
        via,
        c.data_type
    )
}

pub fn set_default(t: &Table, column: &str, default: &str) -> String {
    format!("{} ALTER COLUMN {} SET DEFAULT {}", alter_table(t), ident(column), default)
}

pub fn drop_default(t: &Table, column: &str) -> String {
    format!("{} ALTER COLUMN {} DROP DEFAULT", alter_table(t), ident(column))
}

pub fn set_not_null(t: &Table, column: &str) -> String {
    format!("{} ALTER COLUMN {} SET NOT NULL", alter_table(t), ident(column))
}

pub fn drop_not_null(t: &Table, column: &str) -> String {
    format!("{} ALTER COLUMN {} DROP NOT NULL", alter_table(t), ident(column))
}

pub fn add_identity(t: &Table, column: &str, identity: Identity) -> String {
    format!(
        "{} ALTER COLUMN {} ADD GENERATED {} AS IDENTITY",
        alter_table(t),
        ident(column),
        identity_keyword(identity)
    )
}

pub fn set_identity(t: &Table, column: &str, identity: Identity) -> String {
    format!(
        "{} ALTER COLUMN {} SET GENERATED {}",
        alter_table(t),
        ident(column),
        identity_keyword(identity)
    )
}

pub fn drop_identity(t: &Table, column: &str) -> String {
    format!("{} ALTER COLUMN {} DROP IDENTITY", alter_table(t), ident(column))
}

pub fn add_constraint(c: &Constraint) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {}",
        qualified(&c.schema, &c.table),
        ident(&c.name),
        c.definition
    )
}

pub fn drop_constraint(c: &Constraint) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        qualified(&c.schema, &c.table),
        ident(&c.name)
    )
}

pub fn drop_index(i: &Index) -> String {
    format!("DROP INDEX {}", qualified(&i.schema, &i.name))
}

pub fn create_view(v: &View) -> String {
    format!(
        "CREATE {}VIEW {} AS\n{}",
        if v.materialized { "MATERIALIZED " } else { "" },
        qualified(&v.schema, &v.name),
        v.definition
    )
}

pub fn drop_view(v: &View) -> String {
    format!(
        "DROP {}VIEW {}",
        if v.materialized { "MATERIALIZED " } else { "" },
        qualified(&v.schema, &v.name)
    )
}

pub fn drop_trigger(t: &Trigger) -> String {
    format!(
        "DROP TRIGGER {} ON {}",
        ident(&t.name),
        qualified(&t.relation.schema, &t.relation.name)
    )
}

fn grant_target(relation: &ObjectId) -> String {
    let keyword = if relation.kind == ObjectKind::Sequence {
        "SEQUENCE"
    } else {
        "TABLE"
    };
    format!("{} {}", keyword, qualified(&relation.schema, &relation.name))
}

fn grantee(name: &str) -> String {
    if name == "PUBLIC" {
        name.to_string()
    } else {
        ident(name)
    }
}

pub fn grant(g: &Grant) -> String {
    format!(
        "GRANT {} ON {} TO {}{}",
        g.privilege,
        grant_target(&g.relation),
        grantee(&g.grantee),
        if g.grantable { " WITH GRANT OPTION" } else { "" }
    )
}

pub fn revoke(g: &Grant) -> String {
    format!(
        "REVOKE {} ON {} FROM {}",
        g.privilege,
        grant_target(&g.relation),
        grantee(&g.grantee)
    )
}
