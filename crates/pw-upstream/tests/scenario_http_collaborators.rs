//! Scenario: the reqwest collaborators against a mock server.
//!
//! # Invariants under test
//!
//! 1. Each endpoint is hit at its agreed path under the configured base URL.
//! 2. Non-2xx, non-JSON and wrong-shape bodies map to distinct errors that
//!    name the collaborator.
//! 3. A dead server is a transport error, not a hang.

use std::time::Duration;

use httpmock::prelude::*;
use pw_schemas::{EventIdentity, EventKind, KindCounts};
use pw_upstream::{HttpStats, HttpStorage, StatsSource, StorageSource, UpstreamError};
use serde_json::json;

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn stats_reads_native_processing_shape() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/processing/statistics");
            then.status(200)
                .json_body(json!({"stat_type_counts": {"race_events": 4, "telemetry": 11}}));
        })
        .await;

    let stats = HttpStats::new(server.url("/processing"), TIMEOUT).unwrap();
    assert_eq!(stats.aggregator_counts().await.unwrap(), KindCounts::new(4, 11));
    m.assert_async().await;
}

#[tokio::test]
async fn storage_reads_both_id_lists_and_counts() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/event_ids");
            then.status(200)
                .json_body(json!([{"event_id": "e1", "trace_id": "1"}]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/telemetry_ids");
            then.status(200).json_body(json!([
                {"telemetry_id": "t1", "trace_id": "2"},
                {"telemetry_id": "t2", "trace_id": "3"}
            ]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/record_count");
            then.status(200)
                .json_body(json!({"race_events": 1, "telemetry_data": 2}));
        })
        .await;

    let storage = HttpStorage::new(server.url("/storage"), TIMEOUT).unwrap();
    assert_eq!(
        storage.identities(EventKind::RaceEvent).await.unwrap(),
        vec![EventIdentity::new("e1", "1", EventKind::RaceEvent)]
    );
    assert_eq!(storage.identities(EventKind::Telemetry).await.unwrap().len(), 2);
    assert_eq!(storage.record_counts().await.unwrap(), KindCounts::new(1, 2));
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/statistics");
            then.status(503);
        })
        .await;

    let stats = HttpStats::new(server.base_url(), TIMEOUT).unwrap();
    let err = stats.aggregator_counts().await.unwrap_err();
    assert!(matches!(err, UpstreamError::Status { status: 503, .. }));
    assert_eq!(err.collaborator(), "stats");
}

#[tokio::test]
async fn html_body_is_a_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/record_count");
            then.status(200).body("<html>oops</html>");
        })
        .await;

    let storage = HttpStorage::new(server.base_url(), TIMEOUT).unwrap();
    let err = storage.record_counts().await.unwrap_err();
    assert!(matches!(err, UpstreamError::Decode { .. }));
}

#[tokio::test]
async fn entry_without_trace_id_is_a_contract_violation() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/event_ids");
            then.status(200).json_body(json!([{"event_id": "e1"}]));
        })
        .await;

    let storage = HttpStorage::new(server.base_url(), TIMEOUT).unwrap();
    let err = storage.identities(EventKind::RaceEvent).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Contract { .. }));
    assert!(err.to_string().starts_with("storage:"));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    // Port 9 (discard) is closed on any sane test host.
    let stats = HttpStats::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let err = stats.aggregator_counts().await.unwrap_err();
    assert!(matches!(err, UpstreamError::Transport { .. }));
}
