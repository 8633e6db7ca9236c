//! Output channel behaviour under load
//!
//! The output channel is bounded and producers block when it is full. These
//! tests pin that behaviour down: nothing is dropped, and a stalled consumer
//! holds back every producer.

use std::time::Duration;

use health_watch::{CheckStatus, Status, Watcher, config::WatchConfig, metrics};

use crate::helpers::*;

#[tokio::test]
async fn test_full_channel_blocks_without_dropping() {
    let source = memory_source();
    for i in 0..5 {
        add_healthy_node(&source, &format!("n{i}"), "10.0.0.1");
    }

    let config = WatchConfig {
        buffer_size: 1,
        ..test_config()
    };
    let watcher = Watcher::new(source.clone(), config);
    let mut events = watcher.run().await.unwrap();

    for i in 0..5 {
        source.set_check(node_check(&format!("n{i}"), "serfHealth", CheckStatus::Critical));
    }

    // Producers are stuck on the single slot.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(events.len(), 1);

    let mut names = Vec::new();
    for _ in 0..5 {
        let event = next_event(&mut events).await;
        assert_eq!(event.new_status, Status::Critical);
        names.push(event.entity_name);
    }
    names.sort();
    assert_eq!(names, vec!["n0", "n1", "n2", "n3", "n4"]);

    watcher.shutdown();
}

#[tokio::test]
async fn test_concurrent_producers_get_distinct_ids() {
    let source = memory_source();
    for i in 0..10 {
        add_healthy_node(&source, &format!("n{i}"), "10.0.0.1");
    }

    let watcher = Watcher::new(source.clone(), test_config());
    let mut events = watcher.run().await.unwrap();
    let counted_before = metrics::events_emitted();

    for i in 0..10 {
        source.set_check(node_check(&format!("n{i}"), "serfHealth", CheckStatus::Warning));
    }

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(next_event(&mut events).await.event_id);
    }

    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 10);
    assert!(ids[0] >= 1);
    assert!(metrics::events_emitted() >= counted_before + 10);

    watcher.shutdown();
}

#[tokio::test]
async fn test_dropped_receiver_does_not_stop_polling() {
    let source = memory_source();
    add_healthy_node(&source, "n1", "10.0.0.1");

    let watcher = Watcher::new(source.clone(), test_config());
    let events = watcher.run().await.unwrap();
    drop(events);

    source.set_check(node_check("n1", "serfHealth", CheckStatus::Critical));

    let fetched = source.fetch_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(source.fetch_count() > fetched);
    assert_eq!(watcher.watched_names(), vec!["n1"]);

    watcher.shutdown();
}
