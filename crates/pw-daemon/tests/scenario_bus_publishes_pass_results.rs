//! Scenario: pass outcomes and tail activity reach the event bus that feeds
//! `/v1/stream`.

use std::sync::Arc;

use pw_config::ServiceConfig;
use pw_daemon::state::{AppState, BusMsg};
use pw_daemon::wiring;
use pw_queue::{FaultStage, MemoryTopic};
use pw_testkit::{race_message, telemetry_message, StaticStats, StaticStorage};

fn app(dir: &std::path::Path, storage: Arc<StaticStorage>) -> (MemoryTopic, Arc<AppState>) {
    let mut cfg = ServiceConfig::default();
    cfg.queue.replay_idle_timeout_ms = 40;
    cfg.datastore.consistency_file = dir.join("consistency.json");
    cfg.datastore.anomaly_file = dir.join("anomalies.json");
    let topic = MemoryTopic::new();
    let components = wiring::build_with_sources(
        &cfg,
        Arc::new(topic.clone()),
        Arc::new(StaticStats::default()),
        storage,
    );
    (topic, Arc::new(AppState::new(components, "h")))
}

#[tokio::test]
async fn successful_passes_are_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let (topic, st) = app(dir.path(), Arc::new(StaticStorage::new()));
    topic.push(race_message("r", "1", 99));
    let mut rx = st.bus.subscribe();

    st.run_reconcile().await.unwrap();
    st.run_anomaly_scan().await.unwrap();

    match rx.recv().await.unwrap() {
        BusMsg::ReconcileDone { missing_in_db, .. } => assert_eq!(missing_in_db, 1),
        other => panic!("unexpected {other:?}"),
    }
    match rx.recv().await.unwrap() {
        BusMsg::AnomaliesDone { count, .. } => assert_eq!(count, 1),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn failed_pass_is_logged_on_the_bus() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(StaticStorage::new());
    storage.set_failing(true);
    let (_topic, st) = app(dir.path(), storage);
    let mut rx = st.bus.subscribe();

    assert!(st.run_reconcile().await.is_err());
    match rx.recv().await.unwrap() {
        BusMsg::LogLine { level, msg } => {
            assert_eq!(level, "ERROR");
            assert!(msg.contains("storage"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn tail_counts_new_messages_per_kind() {
    let dir = tempfile::tempdir().unwrap();
    let (topic, st) = app(dir.path(), Arc::new(StaticStorage::new()));
    topic.push(race_message("old", "0", 1));
    let mut rx = st.bus.subscribe();

    // First call connects; the shared consumer starts at the tail.
    let first = st.follow_tail().await.unwrap();
    assert_eq!((first.race_events, first.telemetry), (0, 0));
    assert!(st.queue.is_connected());

    topic.push(race_message("r", "1", 3));
    topic.push(telemetry_message("t", "2", 120.0));
    topic.push(telemetry_message("u", "3", 121.0));
    let counts = st.follow_tail().await.unwrap();
    assert_eq!((counts.race_events, counts.telemetry), (1, 2));

    match rx.recv().await.unwrap() {
        BusMsg::QueueTail {
            race_events,
            telemetry,
        } => assert_eq!((race_events, telemetry), (1, 2)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn tail_rebuilds_connection_dropped_by_failed_send() {
    let dir = tempfile::tempdir().unwrap();
    let (topic, st) = app(dir.path(), Arc::new(StaticStorage::new()));
    st.queue.connect();
    topic.fail_next(FaultStage::Send, 1);

    assert!(st.queue.produce(b"lost").is_err());
    assert!(!st.queue.is_connected());

    st.follow_tail().await.unwrap();
    assert!(st.queue.is_connected());
    assert_eq!(topic.stats().handshakes, 2);
}
