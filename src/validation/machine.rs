//! Static declaration of an entity's lifecycle
use super::{
    AutoUpdate, ErrorEntry, ErrorTable, Issue, PermissionCheck, Predicate, PrepareFn,
    RejectionKind, RigidFields, Rule, ValidationErrors, common_errors, map_errors,
};
use crate::entity::Entity;
use std::collections::HashMap;

/// A declared `sources -> targets` status change.
pub struct Transition<E: Entity> {
    pub method: &'static str,
    pub sources: Vec<E::Status>,
    pub targets: Vec<E::Status>,
    pub conditions: Vec<Rule<E>>,
    pub permission: Option<PermissionCheck<E>>,
}

impl<E: Entity> Transition<E> {
    pub fn new(method: &'static str, sources: &[E::Status], targets: &[E::Status]) -> Self {
        Self {
            method,
            sources: sources.to_vec(),
            targets: targets.to_vec(),
            conditions: Vec::new(),
            permission: None,
        }
    }

    pub fn when(mut self, condition: Rule<E>) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn permission(mut self, check: PermissionCheck<E>) -> Self {
        self.permission = Some(check);
        self
    }

    pub fn matches(&self, source: E::Status, target: E::Status) -> bool {
        self.sources.contains(&source) && self.targets.contains(&target)
    }
}

/// One entry of the potential auto-transitions table.
pub struct AutoTarget<E: Entity> {
    pub target: E::Status,
    pub updates: Vec<AutoUpdate<E>>,
}

/// Runs on the candidate before any layer sees it.
pub struct PrepareStep<E: Entity> {
    pub name: &'static str,
    pub kind: RejectionKind,
    pub run: PrepareFn<E>,
}

pub struct Machine<E: Entity> {
    states: Vec<E::Status>,
    terminal: Vec<E::Status>,
    transitions: Vec<Transition<E>>,
    auto: HashMap<E::Status, Vec<AutoTarget<E>>>,
    basic: Vec<Rule<E>>,
    state_rules: HashMap<E::Status, Predicate<E>>,
    rigid: HashMap<E::Status, RigidFields<E>>,
    prepare: Vec<PrepareStep<E>>,
    errors: ErrorTable,
}

impl<E: Entity> Machine<E> {
    pub fn builder(states: &[E::Status]) -> MachineBuilder<E> {
        MachineBuilder {
            machine: Machine {
                states: states.to_vec(),
                terminal: Vec::new(),
                transitions: Vec::new(),
                auto: HashMap::new(),
                basic: Vec::new(),
                state_rules: HashMap::new(),
                rigid: HashMap::new(),
                prepare: Vec::new(),
                errors: common_errors(),
            },
        }
    }

    pub fn states(&self) -> &[E::Status] {
        &self.states
    }

    pub fn is_declared(&self, status: E::Status) -> bool {
        self.states.contains(&status)
    }

    pub fn is_terminal(&self, status: E::Status) -> bool {
        self.terminal.contains(&status)
    }

    /// First declared transition covering `source -> target`.
    pub fn transition(&self, source: E::Status, target: E::Status) -> Option<&Transition<E>> {
        self.transitions.iter().find(|t| t.matches(source, target))
    }

    /// Potential auto-transitions out of `source`, in priority order.
    pub fn auto_targets(&self, source: E::Status) -> &[AutoTarget<E>] {
        self.auto.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Updates the auto table attaches to `source -> target`. A manual
    /// transition along the same edge gets the same side effects.
    pub fn side_effects(&self, source: E::Status, target: E::Status) -> &[AutoUpdate<E>] {
        self.auto_targets(source)
            .iter()
            .find(|a| a.target == target)
            .map(|a| a.updates.as_slice())
            .unwrap_or(&[])
    }

    pub fn basic_rules(&self) -> &[Rule<E>] {
        &self.basic
    }

    pub fn state_rule(&self, status: E::Status) -> Option<Predicate<E>> {
        self.state_rules.get(&status).copied()
    }

    pub fn rigid_fields(&self, candidate: &E, status: E::Status) -> Vec<&'static str> {
        self.rigid
            .get(&status)
            .map(|fields| fields(candidate))
            .unwrap_or_default()
    }

    pub fn prepare_steps(&self) -> &[PrepareStep<E>] {
        &self.prepare
    }

    pub fn errors(&self) -> &ErrorTable {
        &self.errors
    }

    pub fn map(&self, issues: &[Issue]) -> ValidationErrors {
        map_errors(issues, &self.errors)
    }
}

pub struct MachineBuilder<E: Entity> {
    machine: Machine<E>,
}

impl<E: Entity> MachineBuilder<E> {
    pub fn terminal(mut self, states: &[E::Status]) -> Self {
        self.machine.terminal.extend_from_slice(states);
        self
    }

    pub fn transition(mut self, transition: Transition<E>) -> Self {
        self.machine.transitions.push(transition);
        self
    }

    /// Append `target` to the potentials of `source`. Call order is priority.
    pub fn auto(mut self, source: E::Status, target: E::Status, updates: &[AutoUpdate<E>]) -> Self {
        self.machine.auto.entry(source).or_default().push(AutoTarget {
            target,
            updates: updates.to_vec(),
        });
        self
    }

    pub fn basic(mut self, rule: Rule<E>) -> Self {
        self.machine.basic.push(rule);
        self
    }

    pub fn state(mut self, status: E::Status, check: Predicate<E>) -> Self {
        self.machine.state_rules.insert(status, check);
        self
    }

    pub fn rigid(mut self, status: E::Status, fields: RigidFields<E>) -> Self {
        self.machine.rigid.insert(status, fields);
        self
    }

    pub fn prepare(mut self, name: &'static str, kind: RejectionKind, run: PrepareFn<E>) -> Self {
        self.machine.prepare.push(PrepareStep { name, kind, run });
        self
    }

    pub fn error(mut self, token: &'static str, field: &'static str, message: &'static str) -> Self {
        self.machine.errors.insert(token, ErrorEntry { field, message });
        self
    }

    pub fn build(self) -> Machine<E> {
        self.machine
    }
}
