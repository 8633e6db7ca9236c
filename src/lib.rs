//! Continuous health change detection for Consul services and nodes
//!
//! A [`Watcher`] keeps one long-poll loop per service and per node, caches
//! the last snapshot of each and emits an [`Event`] for every transition.
//!
//! ```no_run
//! use std::sync::Arc;
//! use health_watch::{Watcher, config::WatchConfig, source::memory::MemorySource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = Arc::new(MemorySource::new("dc1"));
//!     let watcher = Watcher::new(source, WatchConfig::default());
//!     let mut events = watcher.run().await?;
//!     while let Some(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consul;
pub mod diff;
pub mod event;
pub mod health;
pub mod metrics;
pub mod source;
pub mod util;
pub mod watch;

pub use event::{CheckTransition, EntityKind, Event};
pub use health::{CheckStatus, HealthCheck, Status};
pub use watch::{WatchError, Watcher};
