//! In-process scenario tests for pw-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Services run over a memory topic and in-memory collaborators; each test
//! drives the router via `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pw_config::ServiceConfig;
use pw_daemon::{routes, state, wiring};
use pw_queue::{FaultStage, MemoryTopic};
use pw_schemas::{EventKind, KindCounts};
use pw_testkit::{race_message, telemetry_message, StaticStats, StaticStorage};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Fixture {
    topic: MemoryTopic,
    storage: Arc<StaticStorage>,
    state: Arc<state::AppState>,
    dir: tempfile::TempDir,
}

impl Fixture {
    fn router(&self) -> axum::Router {
        routes::build_router(Arc::clone(&self.state))
    }
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = ServiceConfig::default();
    cfg.queue.replay_idle_timeout_ms = 40;
    cfg.queue.backoff_min_ms = 1;
    cfg.queue.backoff_max_ms = 3;
    cfg.datastore.consistency_file = dir.path().join("consistency.json");
    cfg.datastore.anomaly_file = dir.path().join("anomalies.json");

    let topic = MemoryTopic::new();
    let storage = Arc::new(StaticStorage::new());
    let components = wiring::build_with_sources(
        &cfg,
        Arc::new(topic.clone()),
        Arc::new(StaticStats::new(KindCounts::new(1, 1))),
        storage.clone(),
    );
    Fixture {
        topic,
        storage,
        state: Arc::new(state::AppState::new(components, "cfg-hash-test")),
        dir,
    }
}

/// Drive the router with a single request and return (status, body_bytes).
async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post(uri: &str, json: Option<serde_json::Value>) -> Request<axum::body::Body> {
    let builder = Request::builder().method("POST").uri(uri);
    match json {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    }
}

/// Parse body bytes as a `serde_json::Value`.
fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_queue_status_and_config_hash() {
    let fx = fixture();
    let (status, body) = call(fx.router(), get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "pw-daemon");
    assert_eq!(json["config_hash"], "cfg-hash-test");
    assert_eq!(json["queue"]["transport"], "memory");
    assert_eq!(json["queue"]["connected"], false);
}

// ---------------------------------------------------------------------------
// POST /v1/events/*
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ingest_produces_enveloped_event() {
    let fx = fixture();
    let req = post(
        "/v1/events/telemetry_data",
        Some(serde_json::json!({"car_number": 16, "lap_number": 3, "speed": 287.5})),
    );
    let (status, body) = call(fx.router(), req).await;
    assert_eq!(status, StatusCode::CREATED);
    let json = parse_json(body);
    assert_eq!(json["event_kind"], "telemetry_data");

    let msgs = fx.topic.messages();
    assert_eq!(msgs.len(), 1);
    let env: serde_json::Value = serde_json::from_slice(&msgs[0]).unwrap();
    assert_eq!(env["type"], "telemetry_data");
    assert_eq!(env["payload"]["trace_id"], json["trace_id"]);
    assert_eq!(env["payload"]["telemetry_id"], json["id"]);
    assert_eq!(env["payload"]["speed"], 287.5);
    assert_eq!(env["datetime"].as_str().unwrap().len(), "2025-01-01T00:00:00".len());
}

#[tokio::test]
async fn ingest_rejects_missing_required_field() {
    let fx = fixture();
    let req = post(
        "/v1/events/race_events",
        Some(serde_json::json!({"car_number": 16})),
    );
    let (status, _) = call(fx.router(), req).await;
    assert!(status.is_client_error());
    assert!(fx.topic.is_empty());
}

#[tokio::test]
async fn ingest_reports_failed_send_during_outage() {
    let fx = fixture();
    fx.state.queue.connect();
    fx.topic.fail_next(FaultStage::Send, 1);
    fx.topic.fail_next(FaultStage::Handshake, 10_000);

    let req = post(
        "/v1/events/race_events",
        Some(serde_json::json!({"car_number": 16, "lap_number": 3})),
    );
    let (status, _) = tokio::time::timeout(std::time::Duration::from_millis(500), call(fx.router(), req))
        .await
        .expect("ingest must not wait for the broker");
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!fx.state.queue.is_connected());
    assert!(fx.topic.is_empty());
}

// ---------------------------------------------------------------------------
// GET /v1/queue/*
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queue_endpoints_reflect_topic() {
    let fx = fixture();
    fx.topic.push(race_message("r1", "1", 4));
    fx.topic.push(telemetry_message("t1", "2", 10.0));
    fx.topic.push(race_message("r2", "3", 5));

    let (status, body) = call(fx.router(), get("/v1/queue/stats")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["race_events"], 2);
    assert_eq!(json["telemetry_data"], 1);

    let (status, body) = call(fx.router(), get("/v1/queue/race_events/trace_ids")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["count"], 2);
    assert_eq!(json["identities"][1]["trace_id"], "3");

    let (status, body) = call(fx.router(), get("/v1/queue/race_events/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["event_id"], "r2");

    let (status, _) = call(fx.router(), get("/v1/queue/telemetry_data/1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(fx.router(), get("/v1/queue/pit_stops/trace_ids")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// /v1/consistency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn consistency_is_404_until_first_pass() {
    let fx = fixture();
    let (status, _) = call(fx.router(), get("/v1/consistency")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    fx.topic.push(race_message("r1", "1", 4));
    fx.topic.push(race_message("r2", "2", 4));
    fx.storage.set_traces(EventKind::RaceEvent, ["2", "9"]);

    let (status, body) = call(fx.router(), post("/v1/consistency/update", None)).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["missing_in_db"], 1);
    assert_eq!(json["missing_in_queue"], 1);
    assert!(json["processing_time_ms"].is_u64());

    let (status, body) = call(fx.router(), get("/v1/consistency")).await;
    assert_eq!(status, StatusCode::OK);
    let report = parse_json(body);
    assert_eq!(report["missing_in_db"][0]["trace_id"], "1");
    assert_eq!(report["missing_in_queue"][0]["trace_id"], "9");
    assert_eq!(report["counts"]["aggregator"]["race_events"], 1);
}

#[tokio::test]
async fn failed_pass_is_500_naming_the_step() {
    let fx = fixture();
    fx.storage.set_failing(true);
    let (status, body) = call(fx.router(), post("/v1/consistency/update", None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(parse_json(body)["step"], "storage");

    let (status, _) = call(fx.router(), get("/v1/consistency")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn corrupt_report_is_500() {
    let fx = fixture();
    let path = fx.dir.path().join("consistency.json");
    std::fs::write(&path, b"{ truncated").unwrap();
    let (status, _) = call(fx.router(), get("/v1/consistency")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

// ---------------------------------------------------------------------------
// /v1/anomalies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anomalies_update_then_filter() {
    let fx = fixture();
    fx.topic.push(telemetry_message("t-bad", "1", -5.0));
    fx.topic.push(race_message("r-bad", "2", 79));
    fx.topic.push(race_message("r-ok", "3", 78));

    let (status, _) = call(fx.router(), get("/v1/anomalies")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(fx.router(), post("/v1/anomalies/update", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["anomalies_count"], 2);

    let (status, body) = call(fx.router(), get("/v1/anomalies?event_type=race_events")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["count"], 1);
    assert_eq!(json["anomalies"][0]["event_id"], "r-bad");
    assert_eq!(json["anomalies"][0]["anomaly_type"], "LapCountExceeded");

    let (status, _) = call(fx.router(), get("/v1/anomalies?event_type=pit_stop")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn clean_topic_yields_empty_batch() {
    let fx = fixture();
    fx.topic.push(telemetry_message("t", "1", 150.0));
    let (status, _) = call(fx.router(), post("/v1/anomalies/update", None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(fx.router(), get("/v1/anomalies")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["count"], 0);
}
