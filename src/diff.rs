//! Diff engine: turns two consecutive check sets into a state change
//!
//! Everything in here is pure. The watchers decide which part of a
//! [`StateChange`] ends up in the emitted [`Event`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::event::{CheckTransition, EntityKind, Event};
use crate::health::{HealthCheck, Status, status_of};

/// Identity of the entity a diff is computed for
#[derive(Debug, Clone, Copy)]
pub struct EntityContext<'a> {
    pub kind: EntityKind,
    pub name: &'a str,
    pub address: Option<&'a str>,
    pub datacenter: &'a str,
}

/// Result of comparing two snapshots of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub time: DateTime<Utc>,
    pub datacenter: String,
    pub kind: EntityKind,
    pub name: String,
    pub address: Option<String>,
    pub old_status: Status,
    pub new_status: Status,
    pub checks: Vec<CheckTransition>,
}

impl StateChange {
    /// True when the aggregated status changed
    pub fn status_changed(&self) -> bool {
        self.old_status != self.new_status
    }

    /// Drops the check-level detail, keeping only the aggregated pair
    pub fn without_checks(mut self) -> Self {
        self.checks.clear();
        self
    }

    pub fn into_event(self, event_id: u64) -> Event {
        Event {
            time: self.time,
            datacenter: self.datacenter,
            entity_kind: self.kind,
            entity_name: self.name,
            entity_address: self.address,
            old_status: self.old_status,
            new_status: self.new_status,
            check_transitions: self.checks,
            event_id,
        }
    }
}

/// Compares `old` and `new` for the entity described by `ctx`
///
/// A change is always produced, even when nothing differs; callers decide
/// whether an unchanged result is worth emitting.
pub fn diff(
    ctx: EntityContext<'_>,
    at: DateTime<Utc>,
    old: &[HealthCheck],
    new: &[HealthCheck],
) -> StateChange {
    StateChange {
        time: at,
        datacenter: ctx.datacenter.to_string(),
        kind: ctx.kind,
        name: ctx.name.to_string(),
        address: ctx.address.map(str::to_string),
        old_status: status_of(old),
        new_status: status_of(new),
        checks: compare_checks(old, new),
    }
}

/// Check-level transitions between two sets, keyed by (node, check id)
///
/// The result is ordered by node, then check id.
pub fn compare_checks(old: &[HealthCheck], new: &[HealthCheck]) -> Vec<CheckTransition> {
    let old_by_key = index(old);
    let new_by_key = index(new);

    let mut transitions = Vec::new();

    for (key, new_check) in &new_by_key {
        match old_by_key.get(key) {
            Some(old_check) if old_check.status == new_check.status => {}
            Some(old_check) => {
                transitions.push(transition(new_check, old_check.status.into(), new_check.status.into()));
            }
            None => {
                transitions.push(transition(new_check, Status::Missing, new_check.status.into()));
            }
        }
    }

    for (key, old_check) in &old_by_key {
        if !new_by_key.contains_key(key) {
            transitions.push(transition(old_check, old_check.status.into(), Status::Missing));
        }
    }

    transitions.sort_by(|a, b| (&a.node, &a.check_id).cmp(&(&b.node, &b.check_id)));
    transitions
}

fn index(checks: &[HealthCheck]) -> BTreeMap<(&str, &str), &HealthCheck> {
    checks
        .iter()
        .map(|c| ((c.node.as_str(), c.check_id.as_str()), c))
        .collect()
}

fn transition(check: &HealthCheck, old_status: Status, new_status: Status) -> CheckTransition {
    CheckTransition {
        node: check.node.clone(),
        check_id: check.check_id.clone(),
        check_name: check.name.clone(),
        service_name: check.service_name.clone(),
        old_status,
        new_status,
        output: check.output.clone(),
    }
}
