//! List reconcilers: keep the registry in line with the service and node lists
//!
//! ## Message Flow
//!
//! ```text
//! list(cursor) → first list? arm barrier + count self down
//!              → under registry lock:
//!                  new name      → spawn sub-watcher
//!                  known name    → keep running (withdraw pending stop)
//!                  missing name  → raise stop flag
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, instrument, trace};

use crate::event::EntityKind;
use crate::source::{HealthSource, INITIAL_CURSOR, Indexed, SourceResult};

use super::Shared;
use super::entity::{EntityWatcher, ListedEntity};

/// Run the list loop for `kind` forever
#[instrument(skip_all, fields(kind = %kind))]
pub(crate) async fn run(shared: Arc<Shared>, kind: EntityKind) {
    debug!("starting {kind} list reconciler");

    let mut cursor = INITIAL_CURSOR;
    let mut first = true;

    loop {
        // Don't let the registry (and thus the barrier count) move while the
        // startup batch is still being collected.
        if !first {
            shared.barrier.wait().await;
        }

        let listed = match fetch_list(shared.source.as_ref(), kind, cursor).await {
            Ok(listed) => listed,
            Err(e) => {
                error!("error getting {kind} list: {e}");
                tokio::time::sleep(shared.config.error_backoff()).await;
                continue;
            }
        };

        trace!("{kind} list has {} entries at cursor {}", listed.data.len(), listed.cursor);

        if first {
            shared.barrier.add(listed.data.len());
            shared.barrier.done();
        }

        reconcile(&shared, kind, listed.data, first);

        cursor = listed.cursor;
        first = false;
    }
}

/// Fetch the list of `kind`, deduplicated by name
pub(crate) async fn fetch_list(
    source: &dyn HealthSource,
    kind: EntityKind,
    cursor: u64,
) -> SourceResult<Indexed<Vec<ListedEntity>>> {
    let (entities, next): (Vec<ListedEntity>, u64) = match kind {
        EntityKind::Service => {
            let res = source.list_services(cursor).await?;
            let entities = res
                .data
                .into_keys()
                .map(|name| ListedEntity {
                    name,
                    address: None,
                })
                .collect();
            (entities, res.cursor)
        }
        EntityKind::Node => {
            let res = source.list_nodes(cursor).await?;
            let mut seen = HashSet::new();
            let entities = res
                .data
                .into_iter()
                .filter(|node| seen.insert(node.name.clone()))
                .map(|node| ListedEntity {
                    name: node.name,
                    address: Some(node.address),
                })
                .collect();
            (entities, res.cursor)
        }
    };

    Ok(Indexed::new(entities, next))
}

/// Apply one list to the registry
///
/// `startup` marks the first list: watchers spawned from it own a slot of the
/// readiness barrier.
pub(crate) fn reconcile(
    shared: &Arc<Shared>,
    kind: EntityKind,
    entities: Vec<ListedEntity>,
    startup: bool,
) {
    let fresh: HashSet<String> = entities.iter().map(|e| e.name.clone()).collect();

    let mut registry = shared.lock_registry();

    for entity in entities {
        if let Some(existing) = registry.get(kind, &entity.name) {
            existing.stop.clear();
            continue;
        }

        let name = entity.name.clone();
        let watched = EntityWatcher::spawn(shared.clone(), kind, entity, startup);
        registry.insert(kind, name, watched);
    }

    for (name, entity) in registry.entries(kind) {
        if !fresh.contains(name) && !entity.stop.is_stop_requested() {
            debug!("{kind} {name} is gone, requesting stop");
            entity.stop.request_stop();
        }
    }
}
