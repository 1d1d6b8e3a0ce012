//! Safety Filter
//!
//! Applies the run's safety mode to a change list. Filtering never reorders:
//! surviving statements keep their relative order and are renumbered, with
//! `depends_on` remapped to the new ordinals.

pub mod rules;

pub use rules::{ChangeRule, Safety, SafetyTable};

use crate::diff::{ChangeList, ChangeStatement, PrivilegeScope};
use crate::error::{ShiftError, ShiftResult};
use crate::policy::DiffPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// How unsafe statements are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyMode {
    /// Withhold unsafe statements
    AllowSafeOnly,
    /// No filtering
    #[default]
    AllowAll,
    /// Unsafe statements need `allow_unsafe`
    AllowUnsafeExplicit,
}

impl SafetyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyMode::AllowSafeOnly => "allow-safe-only",
            SafetyMode::AllowAll => "allow-all",
            SafetyMode::AllowUnsafeExplicit => "allow-unsafe-explicit",
        }
    }
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafetyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "allow-safe-only" | "safe-only" | "safe" => Ok(SafetyMode::AllowSafeOnly),
            "allow-all" | "all" => Ok(SafetyMode::AllowAll),
            "allow-unsafe-explicit" | "explicit" => Ok(SafetyMode::AllowUnsafeExplicit),
            other => Err(format!(
                "unknown safety mode '{}' (expected allow-safe-only, allow-all or allow-unsafe-explicit)",
                other
            )),
        }
    }
}

/// Result of filtering: what runs, and what was held back
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOutcome {
    pub kept: ChangeList,
    /// Unsafe statements removed in safe-only mode, with their original ordinals
    pub withheld: Vec<ChangeStatement>,
}

pub struct SafetyFilter;

impl SafetyFilter {
    pub fn apply(changes: ChangeList, policy: &DiffPolicy) -> ShiftResult<FilterOutcome> {
        let mut kept: Vec<ChangeStatement> = Vec::new();
        let mut withheld: Vec<ChangeStatement> = Vec::new();

        for statement in changes.into_statements() {
            if !policy.include_privileges && statement.privilege == PrivilegeScope::PrivilegeOnly {
                debug!("Skipping privilege statement #{}: {}", statement.ordinal, statement.sql);
                continue;
            }
            if statement.is_unsafe() {
                match policy.safety_mode {
                    SafetyMode::AllowSafeOnly => {
                        warn!(
                            "Withholding unsafe statement #{} ({}): {}",
                            statement.ordinal, statement.rule, statement.sql
                        );
                        withheld.push(statement);
                        continue;
                    }
                    SafetyMode::AllowUnsafeExplicit if !policy.allow_unsafe => {
                        return Err(ShiftError::UnsafeChangeRejected {
                            ordinal: statement.ordinal,
                            rule: statement.rule.to_string(),
                            statement: statement.sql,
                        });
                    }
                    _ => {}
                }
            }
            kept.push(statement);
        }

        let removed: BTreeMap<usize, &ChangeStatement> =
            withheld.iter().map(|s| (s.ordinal, s)).collect();
        for statement in &kept {
            if let Some(blocker) = statement.depends_on.iter().find_map(|d| removed.get(d)) {
                return Err(ShiftError::UnresolvableSafetyConflict {
                    kept: statement.ordinal,
                    kept_sql: statement.sql.clone(),
                    withheld: blocker.ordinal,
                    withheld_sql: blocker.sql.clone(),
                });
            }
        }

        let renumbered: BTreeMap<usize, usize> = kept
            .iter()
            .enumerate()
            .map(|(i, s)| (s.ordinal, i + 1))
            .collect();
        for statement in &mut kept {
            statement.ordinal = renumbered[&statement.ordinal];
            statement.depends_on = statement
                .depends_on
                .iter()
                .filter_map(|d| renumbered.get(d).copied())
                .collect();
        }

        if !withheld.is_empty() {
            warn!(
                "{} unsafe statement(s) withheld by {} mode",
                withheld.len(),
                policy.safety_mode
            );
        }

        Ok(FilterOutcome {
            kept: ChangeList::new(kept),
            withheld,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{ChangeKind, DiffEngine};
    use crate::snapshot::fixtures::{column, schema, snapshot, table, view};
    use crate::snapshot::{ObjectId, ObjectKind};
    use pretty_assertions::assert_eq;

    fn statement(ordinal: usize, safety: Safety, depends_on: Vec<usize>) -> ChangeStatement {
        ChangeStatement {
            ordinal,
            sql: format!("SELECT {}", ordinal),
            target: ObjectId::new(ObjectKind::Table, "public", "t"),
            kind: ChangeKind::Alter,
            safety,
            privilege: PrivilegeScope::Structural,
            rule: if safety == Safety::Safe {
                ChangeRule::AddColumn
            } else {
                ChangeRule::DropColumn
            },
            depends_on,
        }
    }

    fn policy(mode: SafetyMode) -> DiffPolicy {
        DiffPolicy::default().with_safety_mode(mode)
    }

    #[test]
    fn test_allow_all_passes_everything() {
        let list = ChangeList::new(vec![
            statement(1, Safety::Safe, vec![]),
            statement(2, Safety::Unsafe, vec![1]),
        ]);
        let outcome = SafetyFilter::apply(list.clone(), &policy(SafetyMode::AllowAll)).unwrap();
        assert_eq!(outcome.kept, list);
        assert!(outcome.withheld.is_empty());
    }

    #[test]
    fn test_safe_only_withholds_and_renumbers() {
        let list = ChangeList::new(vec![
            statement(1, Safety::Safe, vec![]),
            statement(2, Safety::Unsafe, vec![]),
            statement(3, Safety::Safe, vec![1]),
        ]);
        let outcome = SafetyFilter::apply(list, &policy(SafetyMode::AllowSafeOnly)).unwrap();

        let kept: Vec<(usize, &str, Vec<usize>)> = outcome
            .kept
            .iter()
            .map(|s| (s.ordinal, s.sql.as_str(), s.depends_on.clone()))
            .collect();
        assert_eq!(kept, vec![(1, "SELECT 1", vec![]), (2, "SELECT 3", vec![1])]);
        assert_eq!(outcome.withheld.len(), 1);
        assert_eq!(outcome.withheld[0].ordinal, 2);
        assert_eq!(outcome.kept.count_unsafe(), 0);
    }

    #[test]
    fn test_safe_only_conflict_when_kept_depends_on_withheld() {
        let list = ChangeList::new(vec![
            statement(1, Safety::Unsafe, vec![]),
            statement(2, Safety::Safe, vec![1]),
        ]);
        let err = SafetyFilter::apply(list, &policy(SafetyMode::AllowSafeOnly)).unwrap_err();
        match err {
            ShiftError::UnresolvableSafetyConflict { kept, withheld, .. } => {
                assert_eq!((kept, withheld), (2, 1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_explicit_mode_needs_confirmation() {
        let list = ChangeList::new(vec![
            statement(1, Safety::Safe, vec![]),
            statement(2, Safety::Unsafe, vec![]),
        ]);

        let err = SafetyFilter::apply(list.clone(), &policy(SafetyMode::AllowUnsafeExplicit)).unwrap_err();
        assert!(matches!(err, ShiftError::UnsafeChangeRejected { ordinal: 2, .. }));

        let confirmed = policy(SafetyMode::AllowUnsafeExplicit).allowing_unsafe(true);
        let outcome = SafetyFilter::apply(list.clone(), &confirmed).unwrap();
        assert_eq!(outcome.kept, list);
    }

    #[test]
    fn test_privilege_statements_dropped_when_excluded() {
        let mut grant = statement(2, Safety::Safe, vec![1]);
        grant.privilege = PrivilegeScope::PrivilegeOnly;
        grant.kind = ChangeKind::Grant;
        let list = ChangeList::new(vec![statement(1, Safety::Safe, vec![]), grant]);

        let outcome = SafetyFilter::apply(list.clone(), &policy(SafetyMode::AllowAll)).unwrap();
        assert_eq!(outcome.kept.len(), 1);

        let with_privileges = policy(SafetyMode::AllowAll).with_privileges(true);
        assert_eq!(SafetyFilter::apply(list, &with_privileges).unwrap().kept.len(), 2);
    }

    #[test]
    fn test_dropped_column_withheld_without_conflict() {
        let from = snapshot(
            "from",
            vec![schema("public"), table("public", "t", vec![column("id", "integer"), column("name", "text")])],
        );
        let to = snapshot("to", vec![schema("public"), table("public", "t", vec![column("id", "integer")])]);

        let safe_only = policy(SafetyMode::AllowSafeOnly);
        let changes = DiffEngine::diff(&from, &to, &safe_only);
        assert_eq!(changes.len(), 1);
        assert!(changes.statements()[0].is_unsafe());

        let outcome = SafetyFilter::apply(changes, &safe_only).unwrap();
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.withheld.len(), 1);
    }

    #[test]
    fn test_table_replaced_by_view_conflicts_under_safe_only() {
        let from = snapshot(
            "from",
            vec![schema("public"), table("public", "report", vec![column("id", "integer")])],
        );
        let to = snapshot(
            "to",
            vec![schema("public"), view("public", "report", "SELECT 1 AS id", vec![])],
        );

        let safe_only = policy(SafetyMode::AllowSafeOnly);
        let changes = DiffEngine::diff(&from, &to, &safe_only);
        match SafetyFilter::apply(changes, &safe_only).unwrap_err() {
            ShiftError::UnresolvableSafetyConflict { kept, withheld, .. } => {
                assert_eq!((kept, withheld), (2, 1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overrides_change_classification() {
        let from = snapshot(
            "from",
            vec![schema("public"), table("public", "t", vec![column("id", "integer"), column("name", "text")])],
        );
        let to = snapshot("to", vec![schema("public"), table("public", "t", vec![column("id", "integer")])]);

        let mut overrides = BTreeMap::new();
        overrides.insert(ChangeRule::DropColumn, Safety::Safe);
        let relaxed = DiffPolicy {
            safety_table: SafetyTable::with_overrides(overrides),
            ..policy(SafetyMode::AllowSafeOnly)
        };

        let changes = DiffEngine::diff(&from, &to, &relaxed);
        let outcome = SafetyFilter::apply(changes, &relaxed).unwrap();
        assert_eq!(outcome.kept.len(), 1);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("allow-safe-only".parse::<SafetyMode>(), Ok(SafetyMode::AllowSafeOnly));
        assert_eq!("ALLOW_UNSAFE_EXPLICIT".parse::<SafetyMode>(), Ok(SafetyMode::AllowUnsafeExplicit));
        assert!("yolo".parse::<SafetyMode>().is_err());
        assert_eq!(SafetyMode::default().to_string(), "allow-all");
    }
}
