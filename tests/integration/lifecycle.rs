//! Entity lifecycle: transitions, removal and re-discovery

use std::time::Duration;

use health_watch::{CheckStatus, EntityKind, Status, Watcher, config::WatchConfig};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_service_recovery_and_node_removal() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");
    add_healthy_node(&source, "n2", "10.0.0.2");
    source.add_service("web", &[]);
    source.register_instance("web", "web-1", "n1");
    source.register_instance("web", "web-2", "n2");
    source.set_check(service_check("n1", "web", "web-1", CheckStatus::Passing));
    source.set_check(service_check("n2", "web", "web-2", CheckStatus::Critical));

    let watcher = Watcher::new(source.clone(), test_config());
    let mut events = watcher.run().await.unwrap();
    assert_eq!(watcher.watched_names(), vec!["n1", "n2", "web"]);

    // t1: n2's instance recovers
    source.set_check(service_check("n2", "web", "web-2", CheckStatus::Passing));

    let event = next_matching(&mut events, |e| e.entity_kind == EntityKind::Service).await;
    assert_eq!(event.entity_name, "web");
    assert_eq!(event.datacenter, "dc1");
    assert_eq!(event.old_status, Status::Critical);
    assert_eq!(event.new_status, Status::Passing);
    assert!(event.check_transitions.is_empty());
    assert!(event.entity_address.is_none());

    // t2: n1 leaves the node list
    source.remove_node("n1");

    wait_until(|| {
        let watcher = watcher.clone();
        async move { !watcher.watched_names().contains(&"n1".to_string()) }
    })
    .await;
    assert_eq!(watcher.watched_names(), vec!["n2", "web"]);

    watcher.shutdown();
}

#[tokio::test]
async fn test_node_event_carries_check_transitions() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");
    source.set_check(node_check("n1", "disk", CheckStatus::Passing));

    let watcher = Watcher::new(source.clone(), test_config());
    let mut events = watcher.run().await.unwrap();

    source.set_check(node_check("n1", "disk", CheckStatus::Warning));

    let event = next_event(&mut events).await;
    assert_eq!(event.entity_kind, EntityKind::Node);
    assert_eq!(event.entity_name, "n1");
    assert_eq!(event.entity_address.as_deref(), Some("10.0.0.1"));
    assert_eq!(event.old_status, Status::Passing);
    assert_eq!(event.new_status, Status::Warning);
    assert_eq!(event.check_transitions.len(), 1);
    assert_eq!(event.check_transitions[0].check_id, "disk");
    assert_eq!(event.check_transitions[0].old_status, Status::Passing);
    assert_eq!(event.check_transitions[0].new_status, Status::Warning);

    // A new check changes nothing in the aggregate but is still reported.
    source.set_check(node_check("n1", "memory", CheckStatus::Passing));

    let event = next_event(&mut events).await;
    assert_eq!(event.old_status, Status::Warning);
    assert_eq!(event.new_status, Status::Warning);
    assert_eq!(event.check_transitions[0].check_id, "memory");
    assert_eq!(event.check_transitions[0].old_status, Status::Missing);

    watcher.shutdown();
}

#[tokio::test]
async fn test_node_watcher_ignores_service_checks() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");
    source.add_service("web", &[]);
    source.register_instance("web", "web-1", "n1");
    source.set_check(service_check("n1", "web", "web-1", CheckStatus::Passing));

    let watcher = Watcher::new(source.clone(), test_config());
    let mut events = watcher.run().await.unwrap();

    source.set_check(service_check("n1", "web", "web-1", CheckStatus::Critical));

    let drained = drain(&mut events, Duration::from_millis(400)).await;
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].entity_kind, EntityKind::Service);
    assert_eq!(drained[0].new_status, Status::Critical);

    watcher.shutdown();
}

#[tokio::test]
async fn test_unchanged_snapshots_are_idempotent() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");
    source.set_check(node_check("n1", "disk", CheckStatus::Warning));

    let config = WatchConfig {
        emit_unchanged: true,
        ..test_config()
    };
    let watcher = Watcher::new(source.clone(), config);
    let mut events = watcher.run().await.unwrap();

    // Wakes every long poll without touching n1.
    source.add_service("unrelated", &[]);

    let event = next_matching(&mut events, |e| e.entity_name == "n1").await;
    assert_eq!(event.old_status, Status::Warning);
    assert_eq!(event.new_status, Status::Warning);
    assert!(event.check_transitions.is_empty());
    assert!(event.is_unchanged());

    watcher.shutdown();
}

#[tokio::test]
async fn test_removed_entity_emits_nothing_after_deregistration() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");
    add_healthy_node(&source, "n2", "10.0.0.2");

    let watcher = Watcher::new(source.clone(), test_config());
    let mut events = watcher.run().await.unwrap();

    source.remove_node("n1");
    wait_until(|| {
        let watcher = watcher.clone();
        async move { watcher.watched_names() == vec!["n2"] }
    })
    .await;
    drain(&mut events, Duration::from_millis(200)).await;

    source.set_check(node_check("n2", "serfHealth", CheckStatus::Critical));
    source.set_check(node_check("n1", "serfHealth", CheckStatus::Critical));

    let drained = drain(&mut events, Duration::from_millis(400)).await;
    assert!(drained.iter().all(|e| e.entity_name != "n1"));
    assert!(drained.iter().any(|e| e.entity_name == "n2"));

    watcher.shutdown();
}

#[tokio::test]
async fn test_rediscovered_entity_starts_from_missing() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");
    add_healthy_node(&source, "n3", "10.0.0.3");

    let watcher = Watcher::new(source.clone(), test_config());
    let mut events = watcher.run().await.unwrap();

    source.remove_node("n3");
    wait_until(|| {
        let watcher = watcher.clone();
        async move { !watcher.watched_names().contains(&"n3".to_string()) }
    })
    .await;
    drain(&mut events, Duration::from_millis(200)).await;

    add_healthy_node(&source, "n3", "10.0.0.33");

    let event = next_matching(&mut events, |e| {
        e.entity_name == "n3" && e.new_status == Status::Passing
    })
    .await;
    assert_eq!(event.old_status, Status::Missing);
    assert_eq!(event.entity_address.as_deref(), Some("10.0.0.33"));
    assert!(watcher.watched_names().contains(&"n3".to_string()));

    watcher.shutdown();
}

#[tokio::test]
async fn test_removed_service_is_deregistered() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");
    source.add_service("web", &[]);
    source.add_service("db", &[]);
    source.register_instance("web", "web-1", "n1");
    source.register_instance("db", "db-1", "n1");

    let watcher = Watcher::new(source.clone(), test_config());
    let _events = watcher.run().await.unwrap();
    assert_eq!(watcher.watched_names(), vec!["db", "n1", "web"]);

    source.remove_service("db");

    wait_until(|| {
        let watcher = watcher.clone();
        async move { watcher.watched_names() == vec!["n1", "web"] }
    })
    .await;

    watcher.shutdown();
}

#[tokio::test]
async fn test_failed_fetches_retry_without_losing_changes() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");
    source.set_check(node_check("n1", "disk", CheckStatus::Passing));

    let watcher = Watcher::new(source.clone(), test_config());
    let mut events = watcher.run().await.unwrap();
    let fetched = source.fetch_count();

    source.fail_next(3);
    source.set_check(node_check("n1", "disk", CheckStatus::Critical));

    let event = next_matching(&mut events, |e| e.entity_name == "n1").await;
    assert_eq!(event.old_status, Status::Passing);
    assert_eq!(event.new_status, Status::Critical);
    assert_eq!(event.check_transitions.len(), 1);
    assert_eq!(event.check_transitions[0].check_id, "disk");

    // The change is reported once, not replayed by the retries.
    let drained = drain(&mut events, Duration::from_millis(400)).await;
    assert!(drained.iter().all(|e| e.entity_name != "n1"));
    assert!(source.fetch_count() >= fetched + 3);

    watcher.shutdown();
}
