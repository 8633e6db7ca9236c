//! Health data model shared by the sources, the diff engine and the watchers
//!
//! The field names follow the Consul HTTP API so the same types deserialize
//! straight from a blocking query response.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status reported by a single health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

impl CheckStatus {
    /// Position in the total order critical > warning > passing
    fn severity(self) -> u8 {
        match self {
            CheckStatus::Passing => 0,
            CheckStatus::Warning => 1,
            CheckStatus::Critical => 2,
        }
    }
}

/// Aggregated status of an entity, or of a check in a transition
///
/// `Missing` is only ever used for an empty check set (the entity is unknown or
/// unreachable) or for the absent side of an added/removed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passing,
    Warning,
    Critical,
    Missing,
}

impl From<CheckStatus> for Status {
    fn from(status: CheckStatus) -> Self {
        match status {
            CheckStatus::Passing => Status::Passing,
            CheckStatus::Warning => Status::Warning,
            CheckStatus::Critical => Status::Critical,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Passing => "passing",
            Status::Warning => "warning",
            Status::Critical => "critical",
            Status::Missing => "missing",
        };
        f.write_str(s)
    }
}

/// A single health check as returned by the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "Node", default)]
    pub node: String,

    #[serde(rename = "CheckID")]
    pub check_id: String,

    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Status")]
    pub status: CheckStatus,

    /// Owning service; empty for node-level checks
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,

    #[serde(rename = "ServiceName", default)]
    pub service_name: String,

    #[serde(rename = "Output", default)]
    pub output: String,
}

impl HealthCheck {
    /// True when the check belongs to the node itself rather than to a service
    pub fn is_node_check(&self) -> bool {
        self.service_id.is_empty()
    }
}

/// A cluster node as listed by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "Node")]
    pub name: String,

    #[serde(rename = "Address", default)]
    pub address: String,
}

/// Service registration part of a service health entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Service")]
    pub service: String,

    #[serde(rename = "Tags", default)]
    pub tags: Option<Vec<String>>,
}

/// One instance of a service: the node it runs on plus all checks that apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    #[serde(rename = "Node")]
    pub node: Node,

    #[serde(rename = "Service")]
    pub service: ServiceInfo,

    #[serde(rename = "Checks", default)]
    pub checks: Vec<HealthCheck>,
}

/// Flattens the checks of every instance of a service into one set
pub fn instance_checks(instances: &[ServiceInstance]) -> Vec<HealthCheck> {
    instances
        .iter()
        .flat_map(|instance| instance.checks.iter().cloned())
        .collect()
}

/// Worst status present in `checks`
///
/// Returns `None` for an empty set; callers treat that as [`Status::Missing`].
pub fn aggregate(checks: &[HealthCheck]) -> Option<CheckStatus> {
    checks.iter().map(|c| c.status).max_by_key(|s| s.severity())
}

/// Aggregated status of a check set, `Missing` when the set is empty
pub fn status_of(checks: &[HealthCheck]) -> Status {
    aggregate(checks).map_or(Status::Missing, Status::from)
}
