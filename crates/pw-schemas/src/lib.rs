//! pw-schemas
//!
//! Wire and report types shared by every pitwall crate: the queue envelope,
//! event identities, the divergence report and the anomaly batch.
//!
//! No IO lives here. Everything is `Serialize + Deserialize` so the same
//! types are used on the topic, in the persisted report files and in HTTP
//! responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `datetime` format carried on every envelope.
pub const ENVELOPE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// The two event kinds that share the topic.
///
/// The serialized form is the envelope `type` string, so a kind read from a
/// report file compares equal to the kind parsed from a queue message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "race_events")]
    RaceEvent,
    #[serde(rename = "telemetry_data")]
    Telemetry,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::RaceEvent, EventKind::Telemetry];

    /// Envelope `type` string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RaceEvent => "race_events",
            EventKind::Telemetry => "telemetry_data",
        }
    }

    /// Payload field holding the kind-specific id.
    pub fn id_field(&self) -> &'static str {
        match self {
            EventKind::RaceEvent => "event_id",
            EventKind::Telemetry => "telemetry_id",
        }
    }

    /// Strict parse of an envelope `type` string. Unknown strings are `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "race_events" => Some(EventKind::RaceEvent),
            "telemetry_data" => Some(EventKind::Telemetry),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EventIdentity
// ---------------------------------------------------------------------------

/// Identity of one produced event.
///
/// `trace_id` is the only join key across stores. `id` is carried for
/// operators reading the report and is never compared.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventIdentity {
    pub id: String,
    pub trace_id: String,
    pub event_kind: EventKind,
}

impl EventIdentity {
    pub fn new(id: impl Into<String>, trace_id: impl Into<String>, event_kind: EventKind) -> Self {
        Self {
            id: id.into(),
            trace_id: trace_id.into(),
            event_kind,
        }
    }

    /// Extract an identity of `kind` from a payload object.
    ///
    /// Both the kind-specific id field and `trace_id` must be present as
    /// strings or integers (rendered in decimal); anything else is `None`.
    pub fn from_payload(kind: EventKind, payload: &Value) -> Option<Self> {
        let id = id_text(payload.get(kind.id_field())?)?;
        let trace_id = id_text(payload.get("trace_id")?)?;
        Some(Self::new(id, trace_id, kind))
    }
}

/// Id or trace id as text. Strings pass through and integers are rendered in
/// decimal. Anything else, floats included, is not an id.
pub fn id_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Queue envelope
// ---------------------------------------------------------------------------

/// JSON envelope carried by every message on the shared topic.
///
/// Decoding uses the default `Value` payload so unknown or partial payloads
/// survive parsing and are filtered by the consumer, not by serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEnvelope<P = Value> {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub datetime: Option<String>,
    pub payload: P,
}

impl<P: Serialize> QueueEnvelope<P> {
    pub fn new(kind: EventKind, at: DateTime<Utc>, payload: P) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            datetime: Some(at.format(ENVELOPE_DATETIME_FORMAT).to_string()),
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl QueueEnvelope<Value> {
    /// Decode raw message bytes. Malformed input is `None`, never an error:
    /// a shared topic is expected to carry noise.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    pub fn event_kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.kind)
    }

    /// Identity of this message if it is of `kind` and well-formed.
    pub fn identity_of(&self, kind: EventKind) -> Option<EventIdentity> {
        if self.event_kind()? != kind {
            return None;
        }
        EventIdentity::from_payload(kind, &self.payload)
    }

    /// Identity of this message for whichever kind it declares.
    pub fn identity(&self) -> Option<EventIdentity> {
        let kind = self.event_kind()?;
        EventIdentity::from_payload(kind, &self.payload)
    }
}

// ---------------------------------------------------------------------------
// Ingestion payloads
// ---------------------------------------------------------------------------

/// Race event payload as produced onto the topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceEventPayload {
    pub event_id: String,
    pub car_number: i64,
    pub lap_number: i64,
    pub event_type: Option<String>,
    /// Unix seconds.
    pub timestamp: i64,
    pub trace_id: String,
}

/// Telemetry payload as produced onto the topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub telemetry_id: String,
    pub car_number: i64,
    pub lap_number: i64,
    pub speed: Option<f64>,
    pub fuel_level: Option<f64>,
    pub rpm: Option<i64>,
    /// Unix seconds.
    pub timestamp: i64,
    pub trace_id: String,
}

/// Fresh kind-specific event id.
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Trace id derived from the ingestion instant (nanoseconds since epoch).
pub fn trace_id_at(at: DateTime<Utc>) -> String {
    match at.timestamp_nanos_opt() {
        Some(ns) => ns.to_string(),
        None => format!("{}{:09}", at.timestamp(), at.timestamp_subsec_nanos()),
    }
}

// ---------------------------------------------------------------------------
// Divergence report
// ---------------------------------------------------------------------------

/// Per-kind counters as they appear in the report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub race_events: i64,
    pub telemetry: i64,
}

impl KindCounts {
    pub fn new(race_events: i64, telemetry: i64) -> Self {
        Self {
            race_events,
            telemetry,
        }
    }

    pub fn get(&self, kind: EventKind) -> i64 {
        match kind {
            EventKind::RaceEvent => self.race_events,
            EventKind::Telemetry => self.telemetry,
        }
    }

    pub fn set(&mut self, kind: EventKind, value: i64) {
        match kind {
            EventKind::RaceEvent => self.race_events = value,
            EventKind::Telemetry => self.telemetry = value,
        }
    }
}

/// Three independently sourced views of "how many events exist".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounts {
    pub db: KindCounts,
    pub queue: KindCounts,
    pub aggregator: KindCounts,
}

/// Point-in-time snapshot produced by one reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceReport {
    pub generated_at: DateTime<Utc>,
    /// Wall time of the pass that produced this report.
    pub duration_ms: u64,
    pub counts: ReportCounts,
    pub missing_in_db: Vec<EventIdentity>,
    pub missing_in_queue: Vec<EventIdentity>,
}

impl DivergenceReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_in_db.is_empty() && self.missing_in_queue.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnomalyType {
    NegativeSpeed,
    LapCountExceeded,
}

/// One event that violated a static threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub event_id: String,
    pub trace_id: String,
    pub event_kind: EventKind,
    pub anomaly_type: AnomalyType,
    pub description: String,
}

/// Every anomaly seen in one pass. Replaced wholesale by the next pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnomalyBatch {
    pub generated_at: DateTime<Utc>,
    pub count: usize,
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyBatch {
    pub fn new(anomalies: Vec<Anomaly>, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            count: anomalies.len(),
            anomalies,
        }
    }

    /// Same snapshot restricted to one event kind.
    pub fn for_kind(&self, kind: EventKind) -> Self {
        let anomalies: Vec<Anomaly> = self
            .anomalies
            .iter()
            .filter(|a| a.event_kind == kind)
            .cloned()
            .collect();
        Self::new(anomalies, self.generated_at)
    }
}
