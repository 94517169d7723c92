//! Request and response types for all pw-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use pw_schemas::{EventIdentity, EventKind};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// Hash of the canonical merged config the daemon booted with.
    pub config_hash: String,
    pub queue: QueueHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueHealth {
    pub transport: String,
    pub connected: bool,
    pub last_error: Option<String>,
    pub connect_attempts: u64,
}

// ---------------------------------------------------------------------------
// Errors (4xx / 5xx bodies)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Failed step of a pass ("stats" | "queue" | "storage" | "persist" | "task"), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            step: None,
        }
    }
}

// ---------------------------------------------------------------------------
// /v1/events/*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceEventRequest {
    pub car_number: i64,
    pub lap_number: i64,
    #[serde(default)]
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRequest {
    pub car_number: i64,
    pub lap_number: i64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub fuel_level: Option<f64>,
    #[serde(default)]
    pub rpm: Option<i64>,
}

/// 201 body for an accepted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub event_kind: EventKind,
    pub id: String,
    pub trace_id: String,
}

// ---------------------------------------------------------------------------
// /v1/queue/*
// ---------------------------------------------------------------------------

/// Messages per kind currently on the topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatsResponse {
    pub race_events: i64,
    pub telemetry_data: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceIdsResponse {
    pub event_kind: EventKind,
    pub count: usize,
    pub identities: Vec<EventIdentity>,
}

// ---------------------------------------------------------------------------
// /v1/consistency  /v1/anomalies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyUpdateResponse {
    pub processing_time_ms: u64,
    pub missing_in_db: usize,
    pub missing_in_queue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyUpdateResponse {
    pub anomalies_count: usize,
    pub scanned: u64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomaliesQuery {
    /// `race_events` | `telemetry_data`; absent = both.
    pub event_type: Option<String>,
}
