//! Change statements and the ordered change list

use crate::safety::rules::{ChangeRule, Safety};
use crate::snapshot::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a statement does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Alter,
    Drop,
    Grant,
    Revoke,
}

/// Whether a statement changes structure or only access rights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivilegeScope {
    Structural,
    PrivilegeOnly,
}

impl fmt::Display for PrivilegeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrivilegeScope::Structural => "structural",
            PrivilegeScope::PrivilegeOnly => "privilege",
        })
    }
}

/// One DDL statement in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatement {
    /// 1-based position in the list
    pub ordinal: usize,
    /// SQL text without a trailing semicolon
    pub sql: String,
    pub target: ObjectId,
    pub kind: ChangeKind,
    pub safety: Safety,
    pub privilege: PrivilegeScope,
    pub rule: ChangeRule,
    /// Ordinals of the statements that must run before this one
    pub depends_on: Vec<usize>,
}

impl ChangeStatement {
    pub fn is_unsafe(&self) -> bool {
        self.safety == Safety::Unsafe
    }

    pub fn annotation(&self) -> String {
        format!("-- [{}] [{}] {}", self.safety, self.privilege, self.rule)
    }
}

/// Ordered list of statements; emitting it top to bottom respects every
/// dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeList {
    statements: Vec<ChangeStatement>,
}

impl ChangeList {
    pub fn new(statements: Vec<ChangeStatement>) -> Self {
        Self { statements }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChangeStatement> {
        self.statements.iter()
    }

    pub fn statements(&self) -> &[ChangeStatement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<ChangeStatement> {
        self.statements
    }

    pub fn count_unsafe(&self) -> usize {
        self.statements.iter().filter(|s| s.is_unsafe()).count()
    }

    /// Plain SQL, statements separated by blank lines
    pub fn to_sql(&self, annotated: bool) -> String {
        let mut out = String::new();
        for (i, statement) in self.statements.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            if annotated {
                out.push_str(&statement.annotation());
                out.push('\n');
            }
            out.push_str(&statement.sql);
            out.push_str(";\n");
        }
        out
    }
}

impl<'a> IntoIterator for &'a ChangeList {
    type Item = &'a ChangeStatement;
    type IntoIter = std::slice::Iter<'a, ChangeStatement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ObjectKind;
    use pretty_assertions::assert_eq;

    fn statement(ordinal: usize, sql: &str, safety: Safety, rule: ChangeRule) -> ChangeStatement {
        ChangeStatement {
            ordinal,
            sql: sql.to_string(),
            target: ObjectId::new(ObjectKind::Table, "public", "t"),
            kind: ChangeKind::Alter,
            safety,
            privilege: PrivilegeScope::Structural,
            rule,
            depends_on: Vec::new(),
        }
    }

    #[test]
    fn test_plain_sql_separated_by_blank_lines() {
        let list = ChangeList::new(vec![
            statement(1, "ALTER TABLE \"public\".\"t\" ADD COLUMN \"a\" text", Safety::Safe, ChangeRule::AddColumn),
            statement(2, "ALTER TABLE \"public\".\"t\" DROP COLUMN \"b\"", Safety::Unsafe, ChangeRule::DropColumn),
        ]);

        assert_eq!(
            list.to_sql(false),
            "ALTER TABLE \"public\".\"t\" ADD COLUMN \"a\" text;\n\nALTER TABLE \"public\".\"t\" DROP COLUMN \"b\";\n"
        );
        assert_eq!(list.count_unsafe(), 1);
    }

    #[test]
    fn test_annotated_sql() {
        let list = ChangeList::new(vec![statement(
            1,
            "ALTER TABLE \"public\".\"t\" DROP COLUMN \"b\"",
            Safety::Unsafe,
            ChangeRule::DropColumn,
        )]);

        assert_eq!(
            list.to_sql(true),
            "-- [unsafe] [structural] drop_column\nALTER TABLE \"public\".\"t\" DROP COLUMN \"b\";\n"
        );
    }

    #[test]
    fn test_empty_list_renders_nothing() {
        assert_eq!(ChangeList::default().to_sql(true), "");
    }

    #[test]
    fn test_json_shape() {
        let list = ChangeList::new(vec![statement(1, "SELECT 1", Safety::Safe, ChangeRule::AddColumn)]);
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json[0]["ordinal"], 1);
        assert_eq!(json[0]["privilege"], "structural");
        assert_eq!(json[0]["rule"], "add_column");
        assert_eq!(json[0]["dependsOn"], serde_json::json!([]));
    }
}
