//! Events emitted by the watcher
//!
//! Every event describes the transition of one entity between two consecutive
//! snapshots. The serialized shape is what the timeline consumer reads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::Status;

/// Kind of watched entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Service,
    Node,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Service => f.write_str("service"),
            EntityKind::Node => f.write_str("node"),
        }
    }
}

/// Transition of a single check between two snapshots
///
/// Added checks have `old_status == Missing`, removed checks have
/// `new_status == Missing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckTransition {
    pub node: String,
    pub check_id: String,
    pub check_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,

    pub old_status: Status,
    pub new_status: Status,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

/// A state transition of one watched entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub time: DateTime<Utc>,
    pub datacenter: String,
    pub entity_kind: EntityKind,
    pub entity_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_address: Option<String>,

    pub old_status: Status,
    pub new_status: Status,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check_transitions: Vec<CheckTransition>,

    /// Process-wide, strictly increasing
    pub event_id: u64,
}

impl Event {
    /// True when neither the aggregated status nor any check changed
    pub fn is_unchanged(&self) -> bool {
        self.old_status == self.new_status && self.check_transitions.is_empty()
    }
}
