//! Readiness barrier behaviour at startup
//!
//! `run()` must not return before every service and node present in the
//! first list fetches delivered its first snapshot.

use std::sync::Arc;
use std::time::Duration;

use health_watch::{CheckStatus, Status, Watcher};

use crate::helpers::*;

#[tokio::test]
async fn test_run_waits_for_every_startup_entity() {
    let inner = memory_source();
    add_healthy_node(&inner, "n1", "10.0.0.1");
    add_healthy_node(&inner, "n2", "10.0.0.2");
    inner.add_service("web", &[]);
    inner.register_instance("web", "web-1", "n1");

    let source = Arc::new(GatedSource::new(inner, "n2"));
    let watcher = Watcher::new(source.clone(), test_config());

    let run = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.run().await })
    };

    // Everything else is ready, only n2 is still fetching.
    wait_until(|| {
        let watcher = watcher.clone();
        async move { watcher.watched_names() == vec!["n1", "n2", "web"] }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!run.is_finished());
    assert!(!watcher.is_ready());

    source.release();

    let events = tokio::time::timeout(Duration::from_secs(3), run)
        .await
        .unwrap()
        .unwrap();
    assert!(events.is_ok());
    assert!(watcher.is_ready());

    watcher.shutdown();
}

#[tokio::test]
async fn test_ready_despite_transient_failures() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");
    source.add_service("web", &["v1"]);
    source.register_instance("web", "web-1", "n1");
    source.fail_next(5);

    let watcher = Watcher::new(source.clone(), test_config());

    tokio::time::timeout(Duration::from_secs(3), watcher.run())
        .await
        .unwrap()
        .unwrap();

    assert!(watcher.is_ready());
    assert_eq!(watcher.watched_names(), vec!["n1", "web"]);
    assert!(source.fetch_count() >= 4 + 5);

    watcher.shutdown();
}

#[tokio::test]
async fn test_first_snapshots_do_not_emit() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");
    source.set_check(node_check("n1", "disk", CheckStatus::Critical));

    let watcher = Watcher::new(source.clone(), test_config());
    let mut events = watcher.run().await.unwrap();

    // Nothing changed since the startup snapshot.
    assert!(drain(&mut events, Duration::from_millis(300)).await.is_empty());

    watcher.shutdown();
}

#[tokio::test]
async fn test_entities_added_after_ready_do_not_touch_barrier() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");

    let watcher = Watcher::new(source.clone(), test_config());
    let mut events = watcher.run().await.unwrap();

    add_healthy_node(&source, "n2", "10.0.0.2");

    let event = next_matching(&mut events, |e| e.entity_name == "n2").await;
    assert!(watcher.is_ready());
    assert_eq!(event.entity_address.as_deref(), Some("10.0.0.2"));

    watcher.shutdown();
}

#[tokio::test]
async fn test_list_changes_wait_for_readiness() {
    let inner = memory_source();
    add_healthy_node(&inner, "n1", "10.0.0.1");
    add_healthy_node(&inner, "n2", "10.0.0.2");

    let source = Arc::new(GatedSource::new(inner.clone(), "n2"));
    let watcher = Watcher::new(source.clone(), test_config());

    let run = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.run().await })
    };

    wait_until(|| {
        let watcher = watcher.clone();
        async move { watcher.watched_names() == vec!["n1", "n2"] }
    })
    .await;

    // Joins while the startup batch is still held back by n2.
    add_healthy_node(&inner, "n3", "10.0.0.3");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(watcher.watched_names(), vec!["n1", "n2"]);
    assert!(!watcher.is_ready());
    assert!(!run.is_finished());

    source.release();

    let mut events = tokio::time::timeout(Duration::from_secs(3), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // n3 is picked up after readiness, so its appearance is reported.
    let event = next_matching(&mut events, |e| e.entity_name == "n3").await;
    assert_eq!(event.old_status, Status::Missing);
    assert_eq!(event.new_status, Status::Passing);
    assert_eq!(watcher.watched_names(), vec!["n1", "n2", "n3"]);

    watcher.shutdown();
}
