//! pw-testkit
//!
//! Deterministic stand-ins for the reconciliation inputs plus builders for
//! topic messages. Cross-crate scenario tests live under `tests/`.

mod fakes;

pub use fakes::{StaticStats, StaticStorage};

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use pw_queue::{Backoff, MemoryTopic, QueueConnection};
use pw_schemas::{EventKind, QueueEnvelope, RaceEventPayload, TelemetryPayload};

/// Replay inactivity window used by scenarios. Long enough for a memory
/// topic, short enough to keep suites fast.
pub const TEST_IDLE: Duration = Duration::from_millis(40);

/// Connection over `topic` with a near-zero reconnect backoff.
pub fn memory_connection(topic: &MemoryTopic) -> Arc<QueueConnection> {
    Arc::new(QueueConnection::new(
        Arc::new(topic.clone()),
        Backoff::from_millis(1, 3),
    ))
}

fn fixed_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 14, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Encoded race event as the receiver produces it.
pub fn race_message(event_id: &str, trace_id: &str, lap_number: i64) -> Vec<u8> {
    let payload = RaceEventPayload {
        event_id: event_id.to_string(),
        car_number: 44,
        lap_number,
        event_type: Some("lap_completed".to_string()),
        timestamp: fixed_at().timestamp(),
        trace_id: trace_id.to_string(),
    };
    encode(EventKind::RaceEvent, &payload)
}

/// Encoded telemetry sample as the receiver produces it.
pub fn telemetry_message(telemetry_id: &str, trace_id: &str, speed: f64) -> Vec<u8> {
    let payload = TelemetryPayload {
        telemetry_id: telemetry_id.to_string(),
        car_number: 44,
        lap_number: 12,
        speed: Some(speed),
        fuel_level: Some(41.5),
        rpm: Some(11_800),
        timestamp: fixed_at().timestamp(),
        trace_id: trace_id.to_string(),
    };
    encode(EventKind::Telemetry, &payload)
}

fn encode<P: serde::Serialize>(kind: EventKind, payload: &P) -> Vec<u8> {
    QueueEnvelope::new(kind, fixed_at(), payload)
        .to_bytes()
        .unwrap_or_default()
}

/// Race events `r<trace>` for each trace id, in order.
pub fn race_messages<'a>(trace_ids: impl IntoIterator<Item = &'a str>) -> Vec<Vec<u8>> {
    trace_ids
        .into_iter()
        .map(|t| race_message(&format!("r{t}"), t, 10))
        .collect()
}

/// Telemetry samples `t<trace>` for each trace id, in order.
pub fn telemetry_messages<'a>(trace_ids: impl IntoIterator<Item = &'a str>) -> Vec<Vec<u8>> {
    trace_ids
        .into_iter()
        .map(|t| telemetry_message(&format!("t{t}"), t, 212.0))
        .collect()
}
