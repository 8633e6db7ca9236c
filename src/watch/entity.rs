//! Sub-watcher: one long-poll loop per service or node
//!
//! ## Loop
//!
//! ```text
//! [wait barrier] → stop requested? → fetch(cursor) → diff vs. cache → emit → cache = fresh
//!                        │ yes                │ error
//!                        ▼                    └─── sleep backoff, retry same cursor
//!                  deregister + exit
//! ```
//!
//! The stop check runs once per cycle, so a removed entity is torn down at the
//! latest after its in-flight long poll returns.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, instrument, trace};

use crate::diff::{EntityContext, diff};
use crate::event::EntityKind;
use crate::health::{HealthCheck, instance_checks};
use crate::source::{INITIAL_CURSOR, Indexed, SourceResult};

use super::Shared;
use super::registry::{StopFlag, WatchedEntity};

/// An entity as listed by a reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntity {
    pub name: String,

    /// Only known for nodes
    pub address: Option<String>,
}

/// Watches the health of a single service or node
pub(crate) struct EntityWatcher {
    shared: Arc<Shared>,
    kind: EntityKind,
    name: String,
    address: Option<String>,
    stop: StopFlag,

    /// Spawned from the first list fetch; owns one slot of the readiness barrier
    startup: bool,

    /// Last accepted snapshot
    last: Vec<HealthCheck>,
}

impl EntityWatcher {
    /// Spawn a watcher for `entity` and return its registry slot
    ///
    /// Must be called with the registry lock held so that the returned slot is
    /// inserted before the task can look for it.
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        kind: EntityKind,
        entity: ListedEntity,
        startup: bool,
    ) -> WatchedEntity {
        let stop = StopFlag::new();

        let watcher = Self {
            shared,
            kind,
            name: entity.name,
            address: entity.address,
            stop: stop.clone(),
            startup,
            last: Vec::new(),
        };

        WatchedEntity {
            stop,
            task: tokio::spawn(watcher.run()),
        }
    }

    #[instrument(skip(self), fields(kind = %self.kind, name = %self.name))]
    async fn run(mut self) {
        debug!("watching {} {}", self.kind, self.name);

        let mut cursor = INITIAL_CURSOR;
        let mut first = true;

        loop {
            if !first {
                self.shared.barrier.wait().await;
            }

            if self
                .shared
                .lock_registry()
                .deregister_if_stopped(self.kind, &self.name, &self.stop)
            {
                debug!("stopped watching {} {}", self.kind, self.name);
                return;
            }

            let fetched = match self.fetch(cursor).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    error!("error getting {} {}: {}", self.kind, self.name, e);
                    tokio::time::sleep(self.shared.config.error_backoff()).await;
                    continue;
                }
            };

            if first && self.startup {
                debug!("{} {} ready", self.kind, self.name);
                self.shared.barrier.done();
            }

            if self.should_diff(first) {
                self.emit(&fetched.data).await;
            }

            self.last = fetched.data;
            cursor = fetched.cursor;
            first = false;
        }
    }

    /// Startup watchers only cache their first snapshot; watchers spawned
    /// later diff it against the empty cache so their appearance is reported.
    ///
    /// A re-added entity is therefore reported with an old status of missing.
    fn should_diff(&self, first: bool) -> bool {
        self.shared.barrier.is_ready() && !(first && self.startup)
    }

    async fn fetch(&self, cursor: u64) -> SourceResult<Indexed<Vec<HealthCheck>>> {
        let source = &self.shared.source;

        match self.kind {
            EntityKind::Service => {
                let res = source.fetch_service(cursor, &self.name).await?;
                Ok(Indexed::new(instance_checks(&res.data), res.cursor))
            }
            EntityKind::Node => {
                let res = source.fetch_node(cursor, &self.name).await?;
                let checks = res
                    .data
                    .into_iter()
                    .filter(HealthCheck::is_node_check)
                    .collect();
                Ok(Indexed::new(checks, res.cursor))
            }
        }
    }

    async fn emit(&self, fresh: &[HealthCheck]) {
        let ctx = EntityContext {
            kind: self.kind,
            name: &self.name,
            address: self.address.as_deref(),
            datacenter: self.shared.source.datacenter(),
        };

        let change = diff(ctx, Utc::now(), &self.last, fresh);

        // Service events carry only the aggregated pair.
        let change = match self.kind {
            EntityKind::Service => change.without_checks(),
            EntityKind::Node => change,
        };

        if !self.shared.config.emit_unchanged && !change.status_changed() && change.checks.is_empty()
        {
            trace!("no change for {} {}", self.kind, self.name);
            return;
        }

        trace!(
            "{} {}: {} -> {}",
            self.kind, self.name, change.old_status, change.new_status
        );
        self.shared.send_event(change).await;
    }
}
