//! Registry of watched entities
//!
//! One map per entity kind, guarded by a single mutex owned by the watcher.
//! Entries are inserted only by the list reconcilers and removed only by the
//! sub-watcher that owns them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;

use crate::event::EntityKind;

/// Cooperative stop request shared between a reconciler and one sub-watcher
///
/// Unlike a cancellation token the request can be withdrawn: an entity that
/// reappears before its watcher noticed the request simply keeps running.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// True when both flags belong to the same watcher
    pub fn same_as(&self, other: &StopFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Registry slot of one watched entity
#[derive(Debug)]
pub struct WatchedEntity {
    pub stop: StopFlag,
    pub task: JoinHandle<()>,
}

/// Name to watcher maps for services and nodes
#[derive(Debug, Default)]
pub struct Registry {
    services: HashMap<String, WatchedEntity>,
    nodes: HashMap<String, WatchedEntity>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: EntityKind) -> &HashMap<String, WatchedEntity> {
        match kind {
            EntityKind::Service => &self.services,
            EntityKind::Node => &self.nodes,
        }
    }

    fn map_mut(&mut self, kind: EntityKind) -> &mut HashMap<String, WatchedEntity> {
        match kind {
            EntityKind::Service => &mut self.services,
            EntityKind::Node => &mut self.nodes,
        }
    }

    pub fn get(&self, kind: EntityKind, name: &str) -> Option<&WatchedEntity> {
        self.map(kind).get(name)
    }

    #[cfg(test)]
    pub fn contains(&self, kind: EntityKind, name: &str) -> bool {
        self.map(kind).contains_key(name)
    }

    #[cfg(test)]
    pub fn len(&self, kind: EntityKind) -> usize {
        self.map(kind).len()
    }

    pub fn insert(&mut self, kind: EntityKind, name: String, entity: WatchedEntity) {
        self.map_mut(kind).insert(name, entity);
    }

    /// Registered entries of `kind`
    pub fn entries(&self, kind: EntityKind) -> impl Iterator<Item = (&String, &WatchedEntity)> {
        self.map(kind).iter()
    }

    /// Sorted union of service and node names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .keys()
            .chain(self.nodes.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Removes the entry of `name` if `stop` is set and the entry still belongs
    /// to the watcher owning `stop`
    ///
    /// Returns true when the caller must terminate.
    pub fn deregister_if_stopped(&mut self, kind: EntityKind, name: &str, stop: &StopFlag) -> bool {
        if !stop.is_stop_requested() {
            return false;
        }

        let map = self.map_mut(kind);
        if map.get(name).is_some_and(|entry| entry.stop.same_as(stop)) {
            map.remove(name);
        }
        true
    }
}
