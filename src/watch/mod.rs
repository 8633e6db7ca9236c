//! Task-per-entity health watcher
//!
//! ## Architecture Overview
//!
//! ```text
//!                      ┌──────────────────┐
//!                      │     Watcher      │ run() / watched_names()
//!                      └────────┬─────────┘
//!                               │ spawns
//!              ┌────────────────┴────────────────┐
//!      ┌───────▼────────┐               ┌────────▼───────┐
//!      │ service list   │               │   node list    │  (reconcilers)
//!      └───────┬────────┘               └────────┬───────┘
//!              │ spawn / flag stop               │
//!      ┌───────▼────────┐               ┌────────▼───────┐
//!      │ service "web"  │  ...          │   node "n1"    │  ... (sub-watchers)
//!      └───────┬────────┘               └────────┬───────┘
//!              └───────────────┬─────────────────┘
//!                      ┌───────▼────────┐
//!                      │ bounded mpsc   │ → timeline consumer
//!                      └────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! 1. Both reconcilers start; the readiness barrier waits for them (count 2)
//! 2. Each reconciler's first list arms the barrier with one slot per entity
//! 3. Every startup sub-watcher counts down after its first snapshot
//! 4. Once the barrier fires, `run()` returns and diffing is enabled
//! 5. Entities dropped from a list get their stop flag raised; the owning
//!    sub-watcher deregisters itself at the top of its next cycle
//!
//! ## Backpressure
//!
//! All sub-watchers share one bounded output channel and block when it is
//! full. A slow consumer therefore stalls every long-poll loop; there is no
//! drop policy.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::WatchConfig;
use crate::diff::StateChange;
use crate::event::{EntityKind, Event};
use crate::metrics;
use crate::source::HealthSource;

pub mod barrier;
pub mod entity;
pub mod reconciler;
pub mod registry;

use barrier::ReadinessBarrier;
use registry::Registry;

/// Errors returned by [`Watcher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// `run()` was already called on this watcher
    AlreadyStarted,
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::AlreadyStarted => write!(f, "watcher already started"),
        }
    }
}

impl std::error::Error for WatchError {}

/// State shared by the watcher, the reconcilers and every sub-watcher
pub(crate) struct Shared {
    pub(crate) source: Arc<dyn HealthSource>,
    pub(crate) config: WatchConfig,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) barrier: ReadinessBarrier,
    next_event_id: AtomicU64,
    out_tx: mpsc::Sender<Event>,
    reconcilers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_event_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Assign an id to `change` and push it to the output channel
    ///
    /// Blocks while the channel is full.
    pub(crate) async fn send_event(&self, change: StateChange) {
        let event = change.into_event(self.next_event_id());
        metrics::record_event();

        if self.out_tx.send(event).await.is_err() {
            debug!("event receiver dropped, discarding event");
        }
    }
}

/// Watches every service and node of a datacenter
///
/// Cloning is cheap; all clones share the same registries and output channel.
#[derive(Clone)]
pub struct Watcher {
    shared: Arc<Shared>,
    out_rx: Arc<Mutex<Option<mpsc::Receiver<Event>>>>,
}

impl Watcher {
    /// Create a watcher reading from `source`
    ///
    /// Nothing is polled until [`Watcher::run`] is called.
    pub fn new(source: Arc<dyn HealthSource>, config: WatchConfig) -> Self {
        let (out_tx, out_rx) = mpsc::channel(config.buffer_size.max(1));

        let shared = Shared {
            source,
            config,
            registry: Mutex::new(Registry::new()),
            // One slot per list reconciler, sized further on their first list.
            barrier: ReadinessBarrier::new(2),
            next_event_id: AtomicU64::new(0),
            out_tx,
            reconcilers: Mutex::new(Vec::new()),
        };

        Self {
            shared: Arc::new(shared),
            out_rx: Arc::new(Mutex::new(Some(out_rx))),
        }
    }

    /// Start watching and wait until every entity known at startup delivered
    /// its first snapshot
    ///
    /// Returns the receiving end of the event stream. Can only be called once.
    pub async fn run(&self) -> Result<mpsc::Receiver<Event>, WatchError> {
        let out_rx = self
            .out_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(WatchError::AlreadyStarted)?;

        info!("watch: starting");

        {
            let mut reconcilers = self
                .shared
                .reconcilers
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for kind in [EntityKind::Service, EntityKind::Node] {
                reconcilers.push(tokio::spawn(reconciler::run(self.shared.clone(), kind)));
            }
        }

        self.shared.barrier.wait().await;

        info!("watch: ready");
        Ok(out_rx)
    }

    /// Sorted names of all currently watched services and nodes
    ///
    /// A point-in-time snapshot taken under the registry lock.
    pub fn watched_names(&self) -> Vec<String> {
        self.shared.lock_registry().names()
    }

    /// True once every startup entity delivered its first snapshot
    pub fn is_ready(&self) -> bool {
        self.shared.barrier.is_ready()
    }

    /// Abort the reconcilers and every sub-watcher
    ///
    /// Meant for process teardown; entities removed at runtime stop
    /// cooperatively instead. The registry is emptied, so
    /// [`watched_names`](Self::watched_names) is empty afterwards.
    pub fn shutdown(&self) {
        let reconcilers = std::mem::take(
            &mut *self
                .shared
                .reconcilers
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        for handle in reconcilers {
            handle.abort();
        }

        let registry = std::mem::take(&mut *self.shared.lock_registry());
        for kind in [EntityKind::Service, EntityKind::Node] {
            for (_, entity) in registry.entries(kind) {
                entity.task.abort();
            }
        }
        info!("watch: shut down");
    }
}
