//! Schema Diff Engine
//!
//! Compares two snapshots and produces the ordered DDL that turns "from" into
//! "to". Planning happens in two passes: `analyze` works out which objects
//! must be rebuilt because something beneath them changed, `emit` turns every
//! identity into zero or more steps. `order` then sorts the steps.

pub mod change;
pub mod ddl;
mod order;

pub use change::{ChangeKind, ChangeList, ChangeStatement, PrivilegeScope};

use crate::policy::DiffPolicy;
use crate::quote::fit_identifier;
use crate::safety::rules::{is_widening, ChangeRule};
use crate::snapshot::{
    CatalogObject, Column, EnumType, ObjectId, ObjectKind, Sequence, Snapshot, Table,
};
use ddl::LabelPosition;
use order::{Phase, Step};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Suffix for an enum renamed out of the way while it is rebuilt
const OLD_TYPE_SUFFIX: &str = "__pgshift_old";

/// Snapshot comparison entry point
pub struct DiffEngine;

impl DiffEngine {
    /// Ordered statements that turn `from` into `to`.
    ///
    /// Pure: the same inputs always give the same list, byte for byte.
    pub fn diff(from: &Snapshot, to: &Snapshot, policy: &DiffPolicy) -> ChangeList {
        let (from, to) = if policy.reverse_direction {
            (to, from)
        } else {
            (from, to)
        };

        let mut planner = Planner::new(from, to, policy.include_privileges);
        planner.analyze();
        planner.emit();
        debug!(
            "Planned {} step(s); {} view(s) rebuilt, {} enum(s) rebuilt",
            planner.steps.len(),
            planner.rebuilt_views.len(),
            planner.rebuilt_enums.len()
        );

        let ordered = order::order(planner.steps);
        let statements = ordered
            .steps
            .into_iter()
            .zip(ordered.predecessors)
            .enumerate()
            .map(|(position, (step, predecessors))| ChangeStatement {
                ordinal: position + 1,
                sql: step.sql,
                target: step.target,
                kind: step.kind,
                safety: policy.safety_table.classify(step.rule),
                privilege: step.privilege,
                rule: step.rule,
                depends_on: predecessors.into_iter().map(|p| p + 1).collect(),
            })
            .collect();

        let changes = ChangeList::new(statements);
        info!(
            "Diff {} -> {}: {} statement(s), {} unsafe",
            from.label,
            to.label,
            changes.len(),
            changes.count_unsafe()
        );
        changes
    }
}

struct Planner<'a> {
    from: &'a Snapshot,
    to: &'a Snapshot,
    include_privileges: bool,
    steps: Vec<Step>,
    /// Tables and views that disappear; children go with them
    dropped_relations: BTreeSet<ObjectId>,
    /// Columns removed from tables that survive
    dropped_columns: BTreeSet<(ObjectId, String)>,
    rebuilt_enums: BTreeSet<ObjectId>,
    /// Functions dropped and recreated rather than replaced in place
    replaced_functions: BTreeSet<ObjectId>,
    /// Views dropped and recreated because something beneath them changed
    rebuilt_views: BTreeSet<ObjectId>,
    /// Constraints and indexes dropped and recreated
    recreated_keys: BTreeSet<ObjectId>,
    /// Unchanged column defaults that call a replaced function; they are
    /// dropped before it and set again once it is recreated
    refreshed_defaults: BTreeSet<(ObjectId, String)>,
    /// Removed types whose columns move onto types created in this diff; the
    /// drop has to wait until those columns are retyped.
    late_type_drops: BTreeSet<ObjectId>,
    /// Step that retypes a column onto a rebuilt enum
    enum_retypes: BTreeMap<(ObjectId, String), usize>,
}

impl<'a> Planner<'a> {
    fn new(from: &'a Snapshot, to: &'a Snapshot, include_privileges: bool) -> Self {
        Self {
            from,
            to,
            include_privileges,
            steps: Vec::new(),
            dropped_relations: BTreeSet::new(),
            dropped_columns: BTreeSet::new(),
            rebuilt_enums: BTreeSet::new(),
            replaced_functions: BTreeSet::new(),
            rebuilt_views: BTreeSet::new(),
            recreated_keys: BTreeSet::new(),
            refreshed_defaults: BTreeSet::new(),
            late_type_drops: BTreeSet::new(),
            enum_retypes: BTreeMap::new(),
        }
    }

    fn analyze(&mut self) {
        let (from, to) = (self.from, self.to);

        for id in from.ids() {
            if matches!(id.kind, ObjectKind::Table | ObjectKind::View) && !to.contains(id) {
                self.dropped_relations.insert(id.clone());
            }
        }

        for (id, object) in from.iter() {
            if let (CatalogObject::Type(old), Some(CatalogObject::Type(new))) = (object, to.get(id)) {
                if old.labels != new.labels && appended_labels(&old.labels, &new.labels).is_none() {
                    self.rebuilt_enums.insert(id.clone());
                }
            }
        }

        for (id, object) in from.iter() {
            if let (CatalogObject::Function(old), Some(CatalogObject::Function(new))) =
                (object, to.get(id))
            {
                let signature_changed = old.result_type != new.result_type || old.kind != new.kind;
                let uses_rebuilt_enum = old.uses.iter().any(|u| self.rebuilt_enums.contains(u));
                if signature_changed || uses_rebuilt_enum {
                    self.replaced_functions.insert(id.clone());
                }
            }
        }

        // Keys and defaults built on a replaced function cannot outlive its drop
        let mut function_keys: Vec<ObjectId> = Vec::new();
        for function in &self.replaced_functions {
            for dependent in from.dependents(function) {
                match dependent.kind {
                    ObjectKind::Constraint | ObjectKind::Index if to.contains(&dependent) => {
                        function_keys.push(dependent);
                    }
                    ObjectKind::Table => {
                        let (Some(old), Some(new)) = (from.table(&dependent), to.table(&dependent)) else {
                            continue;
                        };
                        for column in defaults_calling(old, function) {
                            let unchanged = new.column(&column).is_some_and(|c| {
                                c.default == old.column(&column).and_then(|o| o.default.clone())
                            });
                            if unchanged {
                                self.refreshed_defaults.insert((dependent.clone(), column));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        // Tables whose surviving columns change shape under dependent views
        let mut reshaped: BTreeSet<ObjectId> = BTreeSet::new();
        for (id, object) in from.iter() {
            let CatalogObject::Table(old) = object else {
                continue;
            };
            let Some(new) = to.table(id) else {
                continue;
            };
            for column in &old.columns {
                let Some(target) = new.column(&column.name) else {
                    self.dropped_columns.insert((id.clone(), column.name.clone()));
                    reshaped.insert(id.clone());
                    continue;
                };
                let on_rebuilt_enum = column
                    .type_ref
                    .as_ref()
                    .is_some_and(|t| self.rebuilt_enums.contains(t));
                if column.data_type != target.data_type
                    || column.generated != target.generated
                    || on_rebuilt_enum
                {
                    reshaped.insert(id.clone());
                }
                if let Some(old_type) = &column.type_ref {
                    let onto_new_type = target.type_ref.as_ref().is_some_and(|t| !from.contains(t));
                    if !to.contains(old_type) && onto_new_type {
                        self.late_type_drops.insert(old_type.clone());
                    }
                }
            }
        }

        let mut pending: Vec<ObjectId> = Vec::new();
        for (id, object) in from.iter() {
            let CatalogObject::View(old) = object else {
                continue;
            };
            let Some(new) = to.get(id) else {
                continue;
            };
            let undermined = old.depends_on.iter().any(|d| {
                reshaped.contains(d) || self.replaced_functions.contains(d) || self.rebuilt_enums.contains(d)
            });
            if object != new || undermined {
                pending.push(id.clone());
            }
        }
        while let Some(view) = pending.pop() {
            if !self.rebuilt_views.insert(view.clone()) {
                continue;
            }
            pending.extend(
                from.dependents(&view)
                    .into_iter()
                    .filter(|d| d.kind == ObjectKind::View && to.contains(d)),
            );
        }

        let is_key = |id: &ObjectId| matches!(id.kind, ObjectKind::Constraint | ObjectKind::Index);
        let mut pending: Vec<ObjectId> = from
            .iter()
            .filter(|(id, object)| is_key(id) && to.get(id).is_some_and(|new| new != *object))
            .map(|(id, _)| id.clone())
            .chain(function_keys)
            .collect();
        while let Some(key) = pending.pop() {
            if !self.recreated_keys.insert(key.clone()) {
                continue;
            }
            pending.extend(
                from.dependents(&key)
                    .into_iter()
                    .filter(|d| is_key(d) && to.contains(d)),
            );
        }
    }

    fn emit(&mut self) {
        let (from, to) = (self.from, self.to);
        let include_privileges = self.include_privileges;
        let ids: BTreeSet<&ObjectId> = from
            .ids()
            .chain(to.ids())
            .filter(|id| include_privileges || id.kind != ObjectKind::Grant)
            .collect();

        for id in ids {
            match (from.get(id), to.get(id)) {
                (Some(old), None) => self.removed(id, old),
                (None, Some(new)) => self.added(id, new),
                (Some(old), Some(new)) => self.changed(id, old, new),
                (None, None) => {}
            }
        }
        self.link_name_reuse();
    }

    /// A create that takes over a name freed in this diff runs after the
    /// drop that frees it, so the safety filter sees the pairing.
    fn link_name_reuse(&mut self) {
        let (from, to) = (self.from, self.to);
        let mut freed: Vec<(ObjectId, usize)> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.kind == ChangeKind::Drop && !to.contains(&step.target))
            .map(|(position, step)| (step.target.clone(), position))
            .collect();

        // Indexes and owned sequences leave with their table, without a step
        for (id, object) in from.iter() {
            if to.contains(id) || freed.iter().any(|(target, _)| target == id) {
                continue;
            }
            let owner = match object {
                CatalogObject::Index(i) => i.relation.clone(),
                CatalogObject::Sequence(Sequence {
                    schema,
                    owned_by: Some(owner),
                    ..
                }) => ObjectId::table(schema.clone(), owner.table.clone()),
                _ => continue,
            };
            let carrier = self.steps.iter().position(|step| {
                step.target == owner
                    && matches!(
                        step.rule,
                        ChangeRule::DropTable | ChangeRule::DropView | ChangeRule::DropColumn
                    )
            });
            if let Some(position) = carrier {
                freed.push((id.clone(), position));
            }
        }

        for position in 0..self.steps.len() {
            if self.steps[position].kind != ChangeKind::Create {
                continue;
            }
            let target = &self.steps[position].target;
            let earlier: Vec<usize> = freed
                .iter()
                .filter(|(id, _)| shares_name(id, target))
                .map(|(_, step)| *step)
                .collect();
            if !earlier.is_empty() {
                debug!("{} reuses a name freed earlier in this diff", target);
                self.follows(position, earlier);
            }
        }
    }

    fn push(
        &mut self,
        phase: Phase,
        target: &ObjectId,
        kind: ChangeKind,
        rule: ChangeRule,
        sql: String,
        requires: Vec<ObjectId>,
    ) -> usize {
        let privilege = if target.kind == ObjectKind::Grant {
            PrivilegeScope::PrivilegeOnly
        } else {
            PrivilegeScope::Structural
        };
        self.steps.push(Step {
            phase,
            target: target.clone(),
            kind,
            rule,
            privilege,
            sql,
            requires,
            after: Vec::new(),
            ownership: false,
        });
        self.steps.len() - 1
    }

    /// Step ordered against the "from" dependency graph
    fn drop_step(&mut self, target: &ObjectId, kind: ChangeKind, rule: ChangeRule, sql: String) -> usize {
        let requires = self.from.dependencies(target);
        self.push(Phase::Drop, target, kind, rule, sql, requires)
    }

    /// Step ordered against the "to" dependency graph
    fn create_step(&mut self, target: &ObjectId, kind: ChangeKind, rule: ChangeRule, sql: String) -> usize {
        let requires = self.to.dependencies(target);
        self.push(Phase::Create, target, kind, rule, sql, requires)
    }

    fn follows(&mut self, step: usize, earlier: impl IntoIterator<Item = usize>) {
        self.steps[step].after.extend(earlier);
    }

    /// Drop followed by a create of the same identity
    fn recreate(&mut self, target: &ObjectId, drop: (ChangeRule, String), create: (ChangeRule, String)) {
        let dropped = self.drop_step(target, ChangeKind::Drop, drop.0, drop.1);
        let created = self.create_step(target, ChangeKind::Create, create.0, create.1);
        self.follows(created, [dropped]);
    }

    fn relation_gone(&self, relation: &ObjectId) -> bool {
        self.dropped_relations.contains(relation) || self.rebuilt_views.contains(relation)
    }

    fn removed(&mut self, id: &ObjectId, object: &CatalogObject) {
        match object {
            CatalogObject::Schema(s) => {
                self.drop_step(id, ChangeKind::Drop, ChangeRule::DropSchema, ddl::drop_schema(&s.name));
            }
            CatalogObject::Extension(e) => {
                self.drop_step(id, ChangeKind::Drop, ChangeRule::DropExtension, ddl::drop_extension(e));
            }
            CatalogObject::Type(t) => {
                let sql = ddl::drop_type(&t.schema, &t.name);
                if self.late_type_drops.contains(id) {
                    let users: Vec<ObjectId> = self
                        .from
                        .dependents(id)
                        .into_iter()
                        .filter(|d| d.kind == ObjectKind::Table && self.to.contains(d))
                        .collect();
                    self.push(Phase::Create, id, ChangeKind::Drop, ChangeRule::DropType, sql, users);
                } else {
                    self.drop_step(id, ChangeKind::Drop, ChangeRule::DropType, sql);
                }
            }
            CatalogObject::Sequence(s) => {
                if self.goes_with_owner(s) {
                    debug!("{} is dropped together with its owning column", id);
                    return;
                }
                self.drop_step(id, ChangeKind::Drop, ChangeRule::DropSequence, ddl::drop_sequence(s));
            }
            CatalogObject::Function(f) => {
                self.drop_step(id, ChangeKind::Drop, ChangeRule::DropFunction, ddl::drop_function(f));
            }
            CatalogObject::Table(t) => {
                self.drop_step(id, ChangeKind::Drop, ChangeRule::DropTable, ddl::drop_table(t));
            }
            CatalogObject::Constraint(c) => {
                if self.relation_gone(&ObjectId::table(c.schema.clone(), c.table.clone())) {
                    return;
                }
                self.drop_step(id, ChangeKind::Drop, ChangeRule::DropConstraint, ddl::drop_constraint(c));
            }
            CatalogObject::Index(i) => {
                if self.relation_gone(&i.relation) {
                    return;
                }
                self.drop_step(id, ChangeKind::Drop, ChangeRule::DropIndex, ddl::drop_index(i));
            }
            CatalogObject::View(v) => {
                self.drop_step(id, ChangeKind::Drop, ChangeRule::DropView, ddl::drop_view(v));
            }
            CatalogObject::Trigger(t) => {
                if self.relation_gone(&t.relation) {
                    return;
                }
                self.drop_step(id, ChangeKind::Drop, ChangeRule::DropTrigger, ddl::drop_trigger(t));
            }
            CatalogObject::Grant(g) => {
                if self.relation_gone(&g.relation) {
                    return;
                }
                self.drop_step(id, ChangeKind::Revoke, ChangeRule::Revoke, ddl::revoke(g));
            }
        }
    }

    fn added(&mut self, id: &ObjectId, object: &CatalogObject) {
        let create = ChangeKind::Create;
        match object {
            CatalogObject::Schema(s) => {
                self.create_step(id, create, ChangeRule::CreateSchema, ddl::create_schema(&s.name));
            }
            CatalogObject::Extension(e) => {
                self.create_step(id, create, ChangeRule::CreateExtension, ddl::create_extension(e));
            }
            CatalogObject::Type(t) => {
                self.create_step(id, create, ChangeRule::CreateType, ddl::create_enum(t));
            }
            CatalogObject::Sequence(s) => {
                let created = self.create_step(id, create, ChangeRule::CreateSequence, ddl::create_sequence(s));
                self.attach_owner(id, s, Some(created));
            }
            CatalogObject::Function(f) => {
                self.create_step(id, create, ChangeRule::CreateFunction, f.definition.clone());
            }
            CatalogObject::Table(t) => {
                self.create_step(id, create, ChangeRule::CreateTable, ddl::create_table(t));
            }
            CatalogObject::Constraint(c) => {
                let table = ObjectId::table(c.schema.clone(), c.table.clone());
                let rule = if self.from.contains(&table) {
                    ChangeRule::AddConstraintExistingTable
                } else {
                    ChangeRule::AddConstraint
                };
                self.create_step(id, create, rule, ddl::add_constraint(c));
            }
            CatalogObject::Index(i) => {
                self.create_step(id, create, ChangeRule::CreateIndex, i.definition.clone());
            }
            CatalogObject::View(v) => {
                self.create_step(id, create, ChangeRule::CreateView, ddl::create_view(v));
            }
            CatalogObject::Trigger(t) => {
                self.create_step(id, create, ChangeRule::CreateTrigger, t.definition.clone());
            }
            CatalogObject::Grant(g) => {
                self.create_step(id, ChangeKind::Grant, ChangeRule::Grant, ddl::grant(g));
            }
        }
    }

    fn changed(&mut self, id: &ObjectId, old: &CatalogObject, new: &CatalogObject) {
        match (old, new) {
            (CatalogObject::Extension(o), CatalogObject::Extension(n)) => {
                if o.schema != n.schema {
                    self.create_step(id, ChangeKind::Alter, ChangeRule::AlterExtension, ddl::set_extension_schema(n));
                }
                if o.version != n.version {
                    self.create_step(id, ChangeKind::Alter, ChangeRule::AlterExtension, ddl::update_extension(n));
                }
            }
            (CatalogObject::Type(o), CatalogObject::Type(n)) => self.enum_changed(id, o, n),
            (CatalogObject::Sequence(o), CatalogObject::Sequence(n)) => self.sequence_changed(id, o, n),
            (CatalogObject::Function(o), CatalogObject::Function(n)) => {
                if self.replaced_functions.contains(id) {
                    self.recreate(
                        id,
                        (ChangeRule::DropFunction, ddl::drop_function(o)),
                        (ChangeRule::CreateFunction, n.definition.clone()),
                    );
                } else if o != n {
                    self.create_step(id, ChangeKind::Alter, ChangeRule::ReplaceFunction, n.definition.clone());
                }
            }
            (CatalogObject::Table(o), CatalogObject::Table(n)) => self.table_changed(id, o, n),
            (CatalogObject::Constraint(o), CatalogObject::Constraint(n)) => {
                if self.recreated_keys.contains(id) {
                    self.recreate(
                        id,
                        (ChangeRule::DropConstraint, ddl::drop_constraint(o)),
                        (ChangeRule::AddConstraintExistingTable, ddl::add_constraint(n)),
                    );
                }
            }
            (CatalogObject::Index(o), CatalogObject::Index(n)) => {
                if self.rebuilt_views.contains(&n.relation) {
                    self.create_step(id, ChangeKind::Create, ChangeRule::CreateIndex, n.definition.clone());
                } else if self.recreated_keys.contains(id) {
                    self.recreate(
                        id,
                        (ChangeRule::DropIndex, ddl::drop_index(o)),
                        (ChangeRule::CreateIndex, n.definition.clone()),
                    );
                }
            }
            (CatalogObject::View(o), CatalogObject::View(n)) => {
                if self.rebuilt_views.contains(id) {
                    if !self.include_privileges {
                        // grants were not introspected, so nothing restores them
                        warn!("{} is rebuilt; its grants are lost unless privileges are included", id);
                    }
                    self.recreate(
                        id,
                        (ChangeRule::DropView, ddl::drop_view(o)),
                        (ChangeRule::CreateView, ddl::create_view(n)),
                    );
                }
            }
            (CatalogObject::Trigger(o), CatalogObject::Trigger(n)) => {
                if self.rebuilt_views.contains(&n.relation) {
                    self.create_step(id, ChangeKind::Create, ChangeRule::CreateTrigger, n.definition.clone());
                } else if o != n || self.replaced_functions.contains(&o.function) {
                    self.recreate(
                        id,
                        (ChangeRule::DropTrigger, ddl::drop_trigger(o)),
                        (ChangeRule::CreateTrigger, n.definition.clone()),
                    );
                }
            }
            (CatalogObject::Grant(o), CatalogObject::Grant(n)) => {
                if self.rebuilt_views.contains(&n.relation) {
                    self.create_step(id, ChangeKind::Grant, ChangeRule::Grant, ddl::grant(n));
                } else if o != n {
                    let revoked = self.drop_step(id, ChangeKind::Revoke, ChangeRule::Revoke, ddl::revoke(o));
                    let granted = self.create_step(id, ChangeKind::Grant, ChangeRule::Grant, ddl::grant(n));
                    self.follows(granted, [revoked]);
                }
            }
            // Schemas carry nothing beyond their name
            _ => {}
        }
    }

    fn goes_with_owner(&self, sequence: &Sequence) -> bool {
        sequence.owned_by.as_ref().is_some_and(|owner| {
            let table = ObjectId::table(sequence.schema.clone(), owner.table.clone());
            self.dropped_relations.contains(&table)
                || self.dropped_columns.contains(&(table, owner.column.clone()))
        })
    }

    fn attach_owner(&mut self, id: &ObjectId, sequence: &Sequence, after: Option<usize>) {
        let Some(owner) = &sequence.owned_by else {
            return;
        };
        let table = ObjectId::table(sequence.schema.clone(), owner.table.clone());
        let step = self.push(
            Phase::Create,
            id,
            ChangeKind::Alter,
            ChangeRule::AlterSequence,
            ddl::sequence_owned_by(sequence),
            vec![table],
        );
        self.steps[step].ownership = true;
        self.follows(step, after);
    }

    fn sequence_changed(&mut self, id: &ObjectId, old: &Sequence, new: &Sequence) {
        if !old.same_parameters(new) {
            self.create_step(id, ChangeKind::Alter, ChangeRule::AlterSequence, ddl::alter_sequence(new));
        }
        if old.owned_by == new.owned_by {
            return;
        }
        // Detach first so dropping the old owner does not take the sequence along
        if let Some(owner) = &old.owned_by {
            let table = ObjectId::table(old.schema.clone(), owner.table.clone());
            let released = Sequence {
                owned_by: None,
                ..old.clone()
            };
            let step = self.push(
                Phase::Drop,
                id,
                ChangeKind::Alter,
                ChangeRule::AlterSequence,
                ddl::sequence_owned_by(&released),
                vec![table],
            );
            self.steps[step].ownership = true;
        }
        self.attach_owner(id, new, None);
    }

    fn enum_changed(&mut self, id: &ObjectId, old: &EnumType, new: &EnumType) {
        if old.labels == new.labels {
            return;
        }
        let Some(added) = appended_labels(&old.labels, &new.labels) else {
            self.rebuild_enum(id, new);
            return;
        };

        let mut previous = None;
        for index in added {
            let position = if index > 0 {
                LabelPosition::After(&new.labels[index - 1])
            } else if let Some(first) = old.labels.first() {
                LabelPosition::Before(first)
            } else {
                LabelPosition::End
            };
            let sql = ddl::add_enum_value(new, &new.labels[index], position);
            let step = self.create_step(id, ChangeKind::Alter, ChangeRule::AddEnumValue, sql);
            self.follows(step, previous);
            previous = Some(step);
        }
    }

    /// Rename the old type aside, create the new one, move every column over
    /// through text, then drop the old type.
    fn rebuild_enum(&mut self, id: &ObjectId, new: &EnumType) {
        let (from, to) = (self.from, self.to);
        let rule = ChangeRule::EnumRebuild;
        let aside = fit_identifier(&new.name, OLD_TYPE_SUFFIX);

        let renamed = self.create_step(
            id,
            ChangeKind::Alter,
            rule,
            ddl::rename_type(&new.schema, &new.name, &aside),
        );
        let created = self.create_step(id, ChangeKind::Create, rule, ddl::create_enum(new));
        self.follows(created, [renamed]);

        let mut finished = vec![created];
        let mut users = Vec::new();
        for table_id in from.dependents(id) {
            let (Some(old_table), Some(new_table)) = (from.table(&table_id), to.table(&table_id)) else {
                continue;
            };
            users.push(table_id.clone());

            for column in &old_table.columns {
                if column.type_ref.as_ref() != Some(id) {
                    continue;
                }
                let Some(target) = new_table.column(&column.name) else {
                    continue;
                };
                if target.type_ref.as_ref() != Some(id)
                    || target.data_type != column.data_type
                    || target.generated.is_some()
                {
                    continue;
                }
                finished.push(self.retype_onto_rebuilt(&table_id, new_table, column, target, created));
            }
        }

        let old_id = ObjectId::new(ObjectKind::Type, new.schema.clone(), aside.clone());
        let dropped = self.push(
            Phase::Create,
            &old_id,
            ChangeKind::Drop,
            rule,
            ddl::drop_type(&new.schema, &aside),
            users,
        );
        self.follows(dropped, finished);
    }

    fn retype_onto_rebuilt(
        &mut self,
        table_id: &ObjectId,
        table: &Table,
        old: &Column,
        new: &Column,
        created: usize,
    ) -> usize {
        let rule = ChangeRule::EnumRebuild;
        let keep_default = old.default.is_some() && old.default == new.default;

        let mut previous = created;
        if keep_default {
            let step = self.push(
                Phase::Create,
                table_id,
                ChangeKind::Alter,
                rule,
                ddl::drop_default(table, &new.name),
                Vec::new(),
            );
            self.follows(step, [previous]);
            previous = step;
        }

        let retyped = self.push(
            Phase::Create,
            table_id,
            ChangeKind::Alter,
            rule,
            ddl::alter_column_type_via_text(table, new),
            Vec::new(),
        );
        self.follows(retyped, [previous]);
        self.enum_retypes
            .insert((table_id.clone(), new.name.clone()), retyped);
        previous = retyped;

        if let (true, Some(default)) = (keep_default, &new.default) {
            let step = self.push(
                Phase::Create,
                table_id,
                ChangeKind::Alter,
                rule,
                ddl::set_default(table, &new.name, default),
                Vec::new(),
            );
            self.follows(step, [previous]);
            previous = step;
        }
        previous
    }

    fn table_changed(&mut self, id: &ObjectId, old: &Table, new: &Table) {
        for column in &old.columns {
            if new.column(&column.name).is_none() {
                self.drop_step(id, ChangeKind::Drop, ChangeRule::DropColumn, ddl::drop_column(old, &column.name));
            }
        }

        for column in &new.columns {
            match old.column(&column.name) {
                None => {
                    let rule = if !column.nullable && !column.has_default() {
                        ChangeRule::AddNotNullColumn
                    } else {
                        ChangeRule::AddColumn
                    };
                    self.create_step(id, ChangeKind::Alter, rule, ddl::add_column(new, column));
                }
                Some(previous) if previous != column => self.column_changed(id, new, previous, column),
                Some(_) => {}
            }
        }

        for column in &new.columns {
            let Some(default) = &column.default else {
                continue;
            };
            if !self.refreshed_defaults.contains(&(id.clone(), column.name.clone())) {
                continue;
            }
            let released = self.drop_step(
                id,
                ChangeKind::Alter,
                ChangeRule::AlterColumnDefault,
                ddl::drop_default(old, &column.name),
            );
            let restored = self.create_step(
                id,
                ChangeKind::Alter,
                ChangeRule::AlterColumnDefault,
                ddl::set_default(new, &column.name, default),
            );
            self.follows(restored, [released]);
        }
    }

    fn column_changed(&mut self, id: &ObjectId, table: &Table, old: &Column, new: &Column) {
        let alter = ChangeKind::Alter;

        if old.generated != new.generated {
            let dropped = self.drop_step(id, ChangeKind::Drop, ChangeRule::DropColumn, ddl::drop_column(table, &old.name));
            let added = self.create_step(id, alter, ChangeRule::AddColumn, ddl::add_column(table, new));
            self.follows(added, [dropped]);
            return;
        }

        let default_changed = old.default != new.default;
        let released = match (&old.default, default_changed) {
            (Some(_), true) => Some(self.drop_step(
                id,
                alter,
                ChangeRule::AlterColumnDefault,
                ddl::drop_default(table, &old.name),
            )),
            _ => None,
        };

        let mut retyped = None;
        if old.data_type != new.data_type {
            let rule = if is_widening(&old.data_type, &new.data_type) {
                ChangeRule::WidenColumnType
            } else {
                ChangeRule::AlterColumnType
            };
            let sql = ddl::alter_column_type(table, new);
            // Leaving a type that is dropped in the first phase
            let leaves_dropped_type = old
                .type_ref
                .as_ref()
                .is_some_and(|t| !self.to.contains(t) && !self.late_type_drops.contains(t));
            let step = if leaves_dropped_type {
                self.drop_step(id, alter, rule, sql)
            } else {
                self.create_step(id, alter, rule, sql)
            };
            self.follows(step, released);
            retyped = Some(step);
        }

        if let (true, Some(default)) = (default_changed, &new.default) {
            let enum_retype = self.enum_retypes.get(&(id.clone(), new.name.clone())).copied();
            let step = self.create_step(
                id,
                alter,
                ChangeRule::AlterColumnDefault,
                ddl::set_default(table, &new.name, default),
            );
            self.follows(step, released.into_iter().chain(retyped).chain(enum_retype));
        }

        let mut last = None;
        if old.identity.is_some() && new.identity.is_none() {
            last = Some(self.create_step(
                id,
                alter,
                ChangeRule::AlterColumnIdentity,
                ddl::drop_identity(table, &new.name),
            ));
        }
        if old.nullable != new.nullable {
            let (rule, sql) = if new.nullable {
                (ChangeRule::DropNotNull, ddl::drop_not_null(table, &new.name))
            } else {
                (ChangeRule::SetNotNull, ddl::set_not_null(table, &new.name))
            };
            let step = self.create_step(id, alter, rule, sql);
            self.follows(step, last);
            last = Some(step);
        }
        match (old.identity, new.identity) {
            (None, Some(identity)) => {
                let step = self.create_step(
                    id,
                    alter,
                    ChangeRule::AlterColumnIdentity,
                    ddl::add_identity(table, &new.name, identity),
                );
                self.follows(step, last);
            }
            (Some(a), Some(b)) if a != b => {
                self.create_step(id, alter, ChangeRule::AlterColumnIdentity, ddl::set_identity(table, &new.name, b));
            }
            _ => {}
        }
    }
}

/// Two different objects competing for one name: tables, views, sequences
/// and indexes share the relation namespace, and every relation except an
/// index also owns a row type of its name.
fn shares_name(a: &ObjectId, b: &ObjectId) -> bool {
    let relation = |k: ObjectKind| {
        matches!(k, ObjectKind::Table | ObjectKind::View | ObjectKind::Sequence | ObjectKind::Index)
    };
    let row_type = |k: ObjectKind| {
        matches!(k, ObjectKind::Type | ObjectKind::Table | ObjectKind::View | ObjectKind::Sequence)
    };
    a != b
        && a.schema == b.schema
        && a.name == b.name
        && ((relation(a.kind) && relation(b.kind)) || (row_type(a.kind) && row_type(b.kind)))
}

/// Columns of `table` whose default calls `function`. Dependencies are
/// recorded per table, so when no default names the function every default
/// is taken.
fn defaults_calling(table: &Table, function: &ObjectId) -> Vec<String> {
    let name = function.name.split('(').next().unwrap_or(&function.name);
    let calls = [format!("{}(", name), format!("{}(", crate::quote::ident(name))];
    let with_default = || table.columns.iter().filter(|c| c.default.is_some());

    let named: Vec<String> = with_default()
        .filter(|c| {
            c.default
                .as_deref()
                .is_some_and(|d| calls.iter().any(|call| d.contains(call.as_str())))
        })
        .map(|c| c.name.clone())
        .collect();
    if named.is_empty() {
        with_default().map(|c| c.name.clone()).collect()
    } else {
        named
    }
}

/// Positions in `new` of labels missing from `old`, when `old` survives as an
/// ordered subsequence of `new` (so the change is additions only).
fn appended_labels(old: &[String], new: &[String]) -> Option<Vec<usize>> {
    let mut remaining = old.iter().peekable();
    let mut added = Vec::new();
    for (index, label) in new.iter().enumerate() {
        if remaining.peek() == Some(&label) {
            remaining.next();
        } else if old.contains(label) {
            return None;
        } else {
            added.push(index);
        }
    }
    remaining.peek().is_none().then_some(added)
}
