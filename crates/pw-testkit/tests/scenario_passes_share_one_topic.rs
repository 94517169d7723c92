//! Scenario: a reconciliation pass and an anomaly scan run at the same time
//! over one shared connection.
//!
//! Each replay opens its own session, so neither pass waits on the other and
//! neither leaves a consumer behind.

use std::sync::Arc;

use pw_anomaly::{AnomalyDetector, AnomalyRules};
use pw_queue::MemoryTopic;
use pw_reconcile::ReconciliationEngine;
use pw_scan::ReplayIdentityScanner;
use pw_schemas::EventKind;
use pw_store::ReportStore;
use pw_testkit::{
    memory_connection, race_message, telemetry_message, StaticStats, StaticStorage, TEST_IDLE,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconcile_and_anomaly_scan_overlap() {
    let topic = MemoryTopic::new();
    topic.push(race_message("r1", "1", 80));
    topic.push(telemetry_message("t1", "2", -3.0));
    topic.push(race_message("r2", "3", 12));

    let conn = memory_connection(&topic);
    let dir = tempfile::tempdir().unwrap();

    let storage = Arc::new(StaticStorage::new());
    storage.set_traces(EventKind::RaceEvent, ["1", "3"]);
    let engine = ReconciliationEngine::new(
        Arc::new(StaticStats::default()),
        storage,
        Arc::new(ReplayIdentityScanner::new(Arc::clone(&conn), TEST_IDLE)),
        ReportStore::new(dir.path().join("consistency.json")),
    );
    let detector = Arc::new(AnomalyDetector::new(
        Arc::clone(&conn),
        AnomalyRules::default(),
        TEST_IDLE,
        ReportStore::new(dir.path().join("anomalies.json")),
    ));

    let (pass, scan) = tokio::join!(
        engine.reconcile(),
        Arc::clone(&detector).scan_on_blocking_pool()
    );

    let pass = pass.unwrap();
    assert_eq!(pass.missing_in_db, 1, "telemetry trace 2 is not stored");
    assert_eq!(pass.missing_in_queue, 0);

    let scan = scan.unwrap();
    assert_eq!(scan.scanned, 3);
    let ids: Vec<_> = scan.batch.anomalies.iter().map(|a| a.event_id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "t1"]);

    let stats = topic.stats();
    assert_eq!(stats.handshakes, 2, "one session per replay");
    assert_eq!(stats.consumers_live, 0);
    assert!(!conn.is_connected(), "replays never open the shared handles");
}
