//! Safety rules
//!
//! Every generated statement is tagged with the rule that produced it. The
//! rule decides the default safety; configuration may override any rule.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Risk tag of a single statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Safety {
    Safe,
    Unsafe,
}

impl fmt::Display for Safety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Safety::Safe => "safe",
            Safety::Unsafe => "unsafe",
        })
    }
}

/// The kind of change a statement makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRule {
    CreateSchema,
    DropSchema,
    CreateExtension,
    AlterExtension,
    DropExtension,
    CreateType,
    AddEnumValue,
    EnumRebuild,
    DropType,
    CreateSequence,
    AlterSequence,
    DropSequence,
    CreateFunction,
    ReplaceFunction,
    DropFunction,
    CreateTable,
    DropTable,
    AddColumn,
    AddNotNullColumn,
    DropColumn,
    WidenColumnType,
    AlterColumnType,
    SetNotNull,
    DropNotNull,
    AlterColumnDefault,
    AlterColumnIdentity,
    AddConstraint,
    AddConstraintExistingTable,
    DropConstraint,
    CreateIndex,
    DropIndex,
    CreateView,
    DropView,
    CreateTrigger,
    DropTrigger,
    Grant,
    Revoke,
}

impl ChangeRule {
    pub const ALL: &'static [ChangeRule] = &[
        ChangeRule::CreateSchema,
        ChangeRule::DropSchema,
        ChangeRule::CreateExtension,
        ChangeRule::AlterExtension,
        ChangeRule::DropExtension,
        ChangeRule::CreateType,
        ChangeRule::AddEnumValue,
        ChangeRule::EnumRebuild,
        ChangeRule::DropType,
        ChangeRule::CreateSequence,
        ChangeRule::AlterSequence,
        ChangeRule::DropSequence,
        ChangeRule::CreateFunction,
        ChangeRule::ReplaceFunction,
        ChangeRule::DropFunction,
        ChangeRule::CreateTable,
        ChangeRule::DropTable,
        ChangeRule::AddColumn,
        ChangeRule::AddNotNullColumn,
        ChangeRule::DropColumn,
        ChangeRule::WidenColumnType,
        ChangeRule::AlterColumnType,
        ChangeRule::SetNotNull,
        ChangeRule::DropNotNull,
        ChangeRule::AlterColumnDefault,
        ChangeRule::AlterColumnIdentity,
        ChangeRule::AddConstraint,
        ChangeRule::AddConstraintExistingTable,
        ChangeRule::DropConstraint,
        ChangeRule::CreateIndex,
        ChangeRule::DropIndex,
        ChangeRule::CreateView,
        ChangeRule::DropView,
        ChangeRule::CreateTrigger,
        ChangeRule::DropTrigger,
        ChangeRule::Grant,
        ChangeRule::Revoke,
    ];

    /// Built-in classification: anything that can lose data or fail on
    /// existing rows is unsafe.
    pub fn default_safety(self) -> Safety {
        match self {
            ChangeRule::DropSchema
            | ChangeRule::DropExtension
            | ChangeRule::EnumRebuild
            | ChangeRule::DropType
            | ChangeRule::DropSequence
            | ChangeRule::DropTable
            | ChangeRule::AddNotNullColumn
            | ChangeRule::DropColumn
            | ChangeRule::AlterColumnType
            | ChangeRule::SetNotNull
            | ChangeRule::AddConstraintExistingTable => Safety::Unsafe,
            _ => Safety::Safe,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeRule::CreateSchema => "create_schema",
            ChangeRule::DropSchema => "drop_schema",
            ChangeRule::CreateExtension => "create_extension",
            ChangeRule::AlterExtension => "alter_extension",
            ChangeRule::DropExtension => "drop_extension",
            ChangeRule::CreateType => "create_type",
            ChangeRule::AddEnumValue => "add_enum_value",
            ChangeRule::EnumRebuild => "enum_rebuild",
            ChangeRule::DropType => "drop_type",
            ChangeRule::CreateSequence => "create_sequence",
            ChangeRule::AlterSequence => "alter_sequence",
            ChangeRule::DropSequence => "drop_sequence",
            ChangeRule::CreateFunction => "create_function",
            ChangeRule::ReplaceFunction => "replace_function",
            ChangeRule::DropFunction => "drop_function",
            ChangeRule::CreateTable => "create_table",
            ChangeRule::DropTable => "drop_table",
            ChangeRule::AddColumn => "add_column",
            ChangeRule::AddNotNullColumn => "add_not_null_column",
            ChangeRule::DropColumn => "drop_column",
            ChangeRule::WidenColumnType => "widen_column_type",
            ChangeRule::AlterColumnType => "alter_column_type",
            ChangeRule::SetNotNull => "set_not_null",
            ChangeRule::DropNotNull => "drop_not_null",
            ChangeRule::AlterColumnDefault => "alter_column_default",
            ChangeRule::AlterColumnIdentity => "alter_column_identity",
            ChangeRule::AddConstraint => "add_constraint",
            ChangeRule::AddConstraintExistingTable => "add_constraint_existing_table",
            ChangeRule::DropConstraint => "drop_constraint",
            ChangeRule::CreateIndex => "create_index",
            ChangeRule::DropIndex => "drop_index",
            ChangeRule::CreateView => "create_view",
            ChangeRule::DropView => "drop_view",
            ChangeRule::CreateTrigger => "create_trigger",
            ChangeRule::DropTrigger => "drop_trigger",
            ChangeRule::Grant => "grant",
            ChangeRule::Revoke => "revoke",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ChangeRule::DropSchema => "Dropping a schema removes everything left in it",
            ChangeRule::DropExtension => "Dropping an extension removes its types and functions",
            ChangeRule::EnumRebuild => "Enum labels were removed or reordered; columns are rewritten",
            ChangeRule::DropType => "Dropping a type fails or loses data if columns still use it",
            ChangeRule::DropSequence => "Dropping a sequence resets key generation",
            ChangeRule::DropTable => "Dropping a table loses its data",
            ChangeRule::AddNotNullColumn => "NOT NULL column without default fails on non-empty tables",
            ChangeRule::DropColumn => "Dropping a column loses its data",
            ChangeRule::AlterColumnType => "Type change may truncate values or fail to cast",
            ChangeRule::SetNotNull => "SET NOT NULL fails if existing rows hold NULL",
            ChangeRule::AddConstraintExistingTable => "New constraint may be violated by existing rows",
            ChangeRule::WidenColumnType => "Widening type change keeps every value",
            _ => "Does not touch stored rows",
        }
    }
}

impl fmt::Display for ChangeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule-to-safety table: built-in defaults plus configured overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyTable {
    overrides: BTreeMap<ChangeRule, Safety>,
}

impl SafetyTable {
    pub fn with_overrides(overrides: BTreeMap<ChangeRule, Safety>) -> Self {
        Self { overrides }
    }

    pub fn classify(&self, rule: ChangeRule) -> Safety {
        self.overrides
            .get(&rule)
            .copied()
            .unwrap_or_else(|| rule.default_safety())
    }

    pub fn is_overridden(&self, rule: ChangeRule) -> bool {
        self.overrides.contains_key(&rule)
    }
}

static SIZED_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(character varying|varchar|numeric|decimal|bit varying)(?:\((\d+)(?:,\s*(\d+))?\))?$")
        .expect("sized type pattern is valid")
});

/// Whether a column type change from `from` to `to` keeps every value.
///
/// Type names are compared as `format_type` prints them.
pub fn is_widening(from: &str, to: &str) -> bool {
    let from = from.trim().to_lowercase();
    let to = to.trim().to_lowercase();
    if from == to {
        return true;
    }

    let integer_rank = |t: &str| match t {
        "smallint" => Some(1),
        "integer" => Some(2),
        "bigint" => Some(3),
        _ => None,
    };
    if let (Some(a), Some(b)) = (integer_rank(&from), integer_rank(&to)) {
        return a < b;
    }
    if integer_rank(&from).is_some() && to == "numeric" {
        return true;
    }
    if from == "real" && to == "double precision" {
        return true;
    }

    let (Some(f), Some(t)) = (SIZED_TYPE.captures(&from), SIZED_TYPE.captures(&to)) else {
        return from.starts_with("character varying") && to == "text";
    };

    let base = |s: &str| match s {
        "varchar" => "character varying",
        "decimal" => "numeric",
        other => other,
    }
    .to_string();
    let f_base = base(&f[1]);
    let t_base = base(&t[1]);
    if f_base != t_base {
        return false;
    }

    let num = |c: &regex::Captures, i: usize| c.get(i).and_then(|m| m.as_str().parse::<i64>().ok());
    match (num(&f, 2), num(&t, 2)) {
        // unbounded target
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(fp), Some(tp)) if f_base == "numeric" => {
            let fs = num(&f, 3).unwrap_or(0);
            let ts = num(&t, 3).unwrap_or(0);
            ts >= fs && tp - ts >= fp - fs
        }
        (Some(fl), Some(tl)) => tl >= fl,
    }
}
