//! Long-poll sources of cluster health data
//!
//! A source exposes blocking-query style fetches: each call blocks until the
//! data behind the given cursor changes (or a source-side timeout elapses) and
//! returns the data together with the cursor to resume from.
//!
//! ## Sources
//!
//! - **Consul** ([`crate::consul::ConsulSource`]): HTTP blocking queries
//! - **In-Memory** ([`memory::MemorySource`]): scriptable, for tests and embedding

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::health::{HealthCheck, Node, ServiceInstance};

pub mod error;
pub mod memory;

pub use error::{SourceError, SourceResult};

/// Opaque, monotonically non-decreasing version marker of a resource
pub type Cursor = u64;

/// Cursor value for a resource that has never been fetched
pub const INITIAL_CURSOR: Cursor = 0;

/// Data returned by a blocking query together with the cursor to resume from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indexed<T> {
    pub data: T,
    pub cursor: Cursor,
}

impl<T> Indexed<T> {
    pub fn new(data: T, cursor: Cursor) -> Self {
        Self { data, cursor }
    }
}

/// Trait for long-poll health sources
///
/// Implementations must be `Send + Sync` as one instance is shared by every
/// watcher task. A fetch must not return before its data changed past `cursor`
/// or a source-side timeout elapsed, and the returned cursor must never be
/// lower than the one passed in for the same resource.
#[async_trait]
pub trait HealthSource: Send + Sync + 'static {
    /// All services with their tags
    async fn list_services(
        &self,
        cursor: Cursor,
    ) -> SourceResult<Indexed<BTreeMap<String, Vec<String>>>>;

    /// Every instance of `name` with the checks that apply to it
    async fn fetch_service(
        &self,
        cursor: Cursor,
        name: &str,
    ) -> SourceResult<Indexed<Vec<ServiceInstance>>>;

    /// All nodes
    async fn list_nodes(&self, cursor: Cursor) -> SourceResult<Indexed<Vec<Node>>>;

    /// Every check registered on node `name`, service checks included
    async fn fetch_node(&self, cursor: Cursor, name: &str)
    -> SourceResult<Indexed<Vec<HealthCheck>>>;

    /// Datacenter attached to every event
    fn datacenter(&self) -> &str;
}
