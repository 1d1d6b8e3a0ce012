//! Dependency ordering of diff steps
//!
//! Kahn's algorithm over a step graph with a total priority key, so the
//! output never depends on hash or allocation order. Drops form the first
//! phase (dependents before dependencies, per the "from" graph); creates and
//! alters form the second (dependencies first, per the "to" graph).

use super::change::{ChangeKind, PrivilegeScope};
use crate::safety::rules::ChangeRule;
use crate::snapshot::ObjectId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Phase {
    Drop,
    Create,
}

/// One statement before ordering
#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub phase: Phase,
    pub target: ObjectId,
    pub kind: ChangeKind,
    pub rule: ChangeRule,
    pub privilege: PrivilegeScope,
    pub sql: String,
    /// Drop phase: this step runs before the drops of these ids.
    /// Create phase: this step runs after the creates and alters of these ids.
    pub requires: Vec<ObjectId>,
    /// Indexes of earlier steps that must precede this one
    pub after: Vec<usize>,
    /// Sequence ownership links. They wait for their table but nothing
    /// waits for them.
    pub ownership: bool,
}

type Key = (Phase, u8, String, Option<String>, String, usize);

fn priority(step: &Step, seq: usize) -> Key {
    let tier = step.target.kind.tier();
    let tier = match step.phase {
        Phase::Drop => u8::MAX - tier,
        Phase::Create => tier,
    };
    (
        step.phase,
        tier,
        step.target.schema.clone(),
        step.target.parent.clone(),
        step.target.name.clone(),
        seq,
    )
}

/// Ordered steps with each step's direct predecessors (as output positions)
pub(crate) struct Ordered {
    pub steps: Vec<Step>,
    pub predecessors: Vec<Vec<usize>>,
}

pub(crate) fn order(steps: Vec<Step>) -> Ordered {
    let n = steps.len();

    let mut by_target: BTreeMap<(Phase, &ObjectId), Vec<usize>> = BTreeMap::new();
    for (i, step) in steps.iter().enumerate() {
        by_target.entry((step.phase, &step.target)).or_default().push(i);
    }

    let mut preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for (i, step) in steps.iter().enumerate() {
        preds[i].extend(step.after.iter().copied().filter(|&j| j != i && j < n));

        for required in &step.requires {
            let Some(others) = by_target.get(&(step.phase, required)) else {
                continue;
            };
            for &j in others {
                if j == i || steps[j].ownership {
                    continue;
                }
                match step.phase {
                    Phase::Create => {
                        preds[i].insert(j);
                    }
                    Phase::Drop => {
                        preds[j].insert(i);
                    }
                }
            }
        }
    }

    let mut succs: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree: Vec<usize> = vec![0; n];
    for (i, p) in preds.iter().enumerate() {
        indegree[i] = p.len();
        for &j in p {
            succs[j].push(i);
        }
    }

    let keys: Vec<Key> = steps.iter().enumerate().map(|(i, s)| priority(s, i)).collect();
    let mut ready: BTreeSet<(&Key, usize)> = (0..n)
        .filter(|&i| indegree[i] == 0)
        .map(|i| (&keys[i], i))
        .collect();

    let mut sequence: Vec<usize> = Vec::with_capacity(n);
    let mut placed = vec![false; n];
    while let Some(&(key, i)) = ready.iter().next() {
        ready.remove(&(key, i));
        sequence.push(i);
        placed[i] = true;
        for &s in &succs[i] {
            indegree[s] -= 1;
            if indegree[s] == 0 {
                ready.insert((&keys[s], s));
            }
        }
    }

    if sequence.len() < n {
        let mut rest: Vec<usize> = (0..n).filter(|&i| !placed[i]).collect();
        rest.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
        warn!(
            "Dependency cycle among {} statements; emitting them in tie-break order",
            rest.len()
        );
        for i in &rest {
            warn!("  involved: {} ({})", steps[*i].target, steps[*i].rule);
        }
        sequence.extend(rest);
    }

    let mut position = vec![0usize; n];
    for (pos, &i) in sequence.iter().enumerate() {
        position[i] = pos;
    }

    let predecessors: Vec<Vec<usize>> = sequence
        .iter()
        .map(|&i| {
            let mut p: Vec<usize> = preds[i].iter().map(|&j| position[j]).collect();
            p.sort_unstable();
            p
        })
        .collect();

    let mut slots: Vec<Option<Step>> = steps.into_iter().map(Some).collect();
    let steps = sequence
        .iter()
        .filter_map(|&i| slots[i].take())
        .collect();

    Ordered { steps, predecessors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ObjectKind;
    use pretty_assertions::assert_eq;

    fn step(phase: Phase, target: ObjectId, sql: &str, requires: Vec<ObjectId>) -> Step {
        Step {
            phase,
            target,
            kind: ChangeKind::Create,
            rule: ChangeRule::CreateTable,
            privilege: PrivilegeScope::Structural,
            sql: sql.to_string(),
            requires,
            after: Vec::new(),
            ownership: false,
        }
    }

    fn sqls(ordered: &Ordered) -> Vec<&str> {
        ordered.steps.iter().map(|s| s.sql.as_str()).collect()
    }

    #[test]
    fn test_creates_follow_dependencies() {
        let a = ObjectId::table("public", "a");
        let z = ObjectId::table("public", "z");
        // "a" references "z", so "z" must come first despite sorting later
        let ordered = order(vec![
            step(Phase::Create, a.clone(), "create a", vec![z.clone()]),
            step(Phase::Create, z.clone(), "create z", vec![]),
        ]);
        assert_eq!(sqls(&ordered), vec!["create z", "create a"]);
        assert_eq!(ordered.predecessors, vec![vec![], vec![0]]);
    }

    #[test]
    fn test_drops_come_first_and_dependents_first() {
        let t = ObjectId::table("public", "t");
        let v = ObjectId::new(ObjectKind::View, "public", "v");
        let ordered = order(vec![
            step(Phase::Create, ObjectId::table("public", "n"), "create n", vec![]),
            step(Phase::Drop, t.clone(), "drop t", vec![]),
            step(Phase::Drop, v, "drop v", vec![t]),
        ]);
        assert_eq!(sqls(&ordered), vec!["drop v", "drop t", "create n"]);
    }

    #[test]
    fn test_ties_break_on_tier_then_name() {
        let ordered = order(vec![
            step(Phase::Create, ObjectId::table("public", "b"), "table b", vec![]),
            step(Phase::Create, ObjectId::schema("app"), "schema app", vec![]),
            step(Phase::Create, ObjectId::table("public", "a"), "table a", vec![]),
        ]);
        assert_eq!(sqls(&ordered), vec!["schema app", "table a", "table b"]);
    }

    #[test]
    fn test_ownership_links_do_not_block() {
        let t = ObjectId::table("public", "t");
        let seq = ObjectId::new(ObjectKind::Sequence, "public", "t_id_seq");
        let mut owned_by = step(Phase::Create, seq.clone(), "owned by", vec![t.clone()]);
        owned_by.ownership = true;
        owned_by.after = vec![0];

        let ordered = order(vec![
            step(Phase::Create, seq.clone(), "create seq", vec![]),
            owned_by,
            step(Phase::Create, t, "create t", vec![seq]),
        ]);
        assert_eq!(sqls(&ordered), vec!["create seq", "create t", "owned by"]);
    }

    #[test]
    fn test_cycle_falls_back_to_key_order() {
        let a = ObjectId::table("public", "a");
        let b = ObjectId::table("public", "b");
        let ordered = order(vec![
            step(Phase::Create, b.clone(), "create b", vec![a.clone()]),
            step(Phase::Create, a, "create a", vec![b]),
        ]);
        assert_eq!(sqls(&ordered), vec!["create a", "create b"]);
    }
}
