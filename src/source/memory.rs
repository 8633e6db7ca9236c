//! In-memory long-poll source (no network)
//!
//! Holds a small cluster model (services, nodes, instances, checks) behind a
//! single global index. Every mutation bumps the index and wakes blocked
//! fetches. It's useful for:
//! - Testing the watcher without a Consul agent
//! - Embedding the watcher on top of a custom health feed
//!
//! ## Limitations
//!
//! - **Global index**: any mutation wakes every blocked fetch, which then
//!   returns possibly unchanged data with a newer cursor
//! - **No persistence**: the model lives as long as the source

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::trace;

use super::{Cursor, HealthSource, Indexed, SourceError, SourceResult};
use crate::health::{HealthCheck, Node, ServiceInfo, ServiceInstance};

/// Default time a fetch blocks when nothing changes
const DEFAULT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct State {
    index: u64,
    services: BTreeMap<String, Vec<String>>,
    nodes: BTreeMap<String, Node>,
    /// (service name, service id, node name)
    instances: Vec<(String, String, String)>,
    /// Keyed by (node, check id)
    checks: BTreeMap<(String, String), HealthCheck>,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn node_checks(&self, node: &str) -> Vec<HealthCheck> {
        self.checks
            .values()
            .filter(|c| c.node == node)
            .cloned()
            .collect()
    }
}

/// Scriptable long-poll source
pub struct MemorySource {
    datacenter: String,
    wait: Duration,
    state: Mutex<State>,
    index_tx: watch::Sender<u64>,
    pending_failures: AtomicUsize,
    fetches: AtomicUsize,
}

impl MemorySource {
    /// Create an empty source for `datacenter`
    pub fn new(datacenter: impl Into<String>) -> Self {
        let (index_tx, _) = watch::channel(1);
        Self {
            datacenter: datacenter.into(),
            wait: DEFAULT_WAIT,
            state: Mutex::new(State {
                index: 1,
                ..State::default()
            }),
            index_tx,
            pending_failures: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Set how long a fetch blocks when nothing changes
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Current global index
    pub fn index(&self) -> u64 {
        self.lock().index
    }

    /// Total number of fetch calls, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Make the next `n` fetches (of any kind) fail
    pub fn fail_next(&self, n: usize) {
        self.pending_failures.fetch_add(n, Ordering::SeqCst);
    }

    pub fn add_node(&self, name: &str, address: &str) {
        self.mutate(|state| {
            state.nodes.insert(
                name.to_string(),
                Node {
                    name: name.to_string(),
                    address: address.to_string(),
                },
            );
        });
    }

    /// Remove a node together with its checks and service instances
    pub fn remove_node(&self, name: &str) {
        self.mutate(|state| {
            state.nodes.remove(name);
            state.checks.retain(|(node, _), _| node != name);
            state.instances.retain(|(_, _, node)| node != name);
        });
    }

    pub fn add_service(&self, name: &str, tags: &[&str]) {
        self.mutate(|state| {
            state.services.insert(
                name.to_string(),
                tags.iter().map(|t| t.to_string()).collect(),
            );
        });
    }

    /// Remove a service together with its instances and their checks
    pub fn remove_service(&self, name: &str) {
        self.mutate(|state| {
            state.services.remove(name);
            state.instances.retain(|(service, _, _)| service != name);
            state.checks.retain(|_, c| c.service_name != name);
        });
    }

    /// Register an instance `service_id` of `service` on `node`
    pub fn register_instance(&self, service: &str, service_id: &str, node: &str) {
        self.mutate(|state| {
            state.instances.push((
                service.to_string(),
                service_id.to_string(),
                node.to_string(),
            ));
        });
    }

    /// Insert or replace a check, keyed by node and check id
    pub fn set_check(&self, check: HealthCheck) {
        self.mutate(|state| {
            state
                .checks
                .insert((check.node.clone(), check.check_id.clone()), check);
        });
    }

    pub fn remove_check(&self, node: &str, check_id: &str) {
        self.mutate(|state| {
            state
                .checks
                .remove(&(node.to_string(), check_id.to_string()));
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate(&self, f: impl FnOnce(&mut State)) {
        let index = {
            let mut state = self.lock();
            f(&mut state);
            state.bump()
        };
        trace!("memory source advanced to index {index}");
        self.index_tx.send_replace(index);
    }

    /// Blocks until the index moves past `cursor` or the wait elapses
    async fn block_on(&self, cursor: Cursor) -> SourceResult<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SourceError::Unavailable("injected failure".to_string()));
        }

        let mut index_rx = self.index_tx.subscribe();
        let _ = tokio::time::timeout(self.wait, index_rx.wait_for(|index| *index > cursor)).await;
        Ok(())
    }
}

#[async_trait]
impl HealthSource for MemorySource {
    async fn list_services(
        &self,
        cursor: Cursor,
    ) -> SourceResult<Indexed<BTreeMap<String, Vec<String>>>> {
        self.block_on(cursor).await?;
        let state = self.lock();
        Ok(Indexed::new(state.services.clone(), state.index))
    }

    async fn fetch_service(
        &self,
        cursor: Cursor,
        name: &str,
    ) -> SourceResult<Indexed<Vec<ServiceInstance>>> {
        self.block_on(cursor).await?;
        let state = self.lock();

        let instances = state
            .instances
            .iter()
            .filter(|(service, _, _)| service == name)
            .filter_map(|(service, service_id, node)| {
                let node = state.nodes.get(node)?;
                let checks = state
                    .node_checks(&node.name)
                    .into_iter()
                    .filter(|c| c.is_node_check() || c.service_id == *service_id)
                    .collect();
                Some(ServiceInstance {
                    node: node.clone(),
                    service: ServiceInfo {
                        id: service_id.clone(),
                        service: service.clone(),
                        tags: state.services.get(service).cloned(),
                    },
                    checks,
                })
            })
            .collect();

        Ok(Indexed::new(instances, state.index))
    }

    async fn list_nodes(&self, cursor: Cursor) -> SourceResult<Indexed<Vec<Node>>> {
        self.block_on(cursor).await?;
        let state = self.lock();
        Ok(Indexed::new(
            state.nodes.values().cloned().collect(),
            state.index,
        ))
    }

    async fn fetch_node(
        &self,
        cursor: Cursor,
        name: &str,
    ) -> SourceResult<Indexed<Vec<HealthCheck>>> {
        self.block_on(cursor).await?;
        let state = self.lock();
        Ok(Indexed::new(state.node_checks(name), state.index))
    }

    fn datacenter(&self) -> &str {
        &self.datacenter
    }
}
