//! Axum router and all HTTP handlers for pw-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Tests compose the bare router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use pw_anomaly::AnomalyError;
use pw_reconcile::ReconcileError;
use pw_scan::ScanError;
use pw_schemas::{
    new_event_id, trace_id_at, EventKind, QueueEnvelope, RaceEventPayload, TelemetryPayload,
};
use pw_store::{StoreError, Stored};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{
        AnomaliesQuery, AnomalyUpdateResponse, ConsistencyUpdateResponse, ErrorResponse,
        HealthResponse, IngestResponse, QueueHealth, QueueStatsResponse, RaceEventRequest,
        TelemetryRequest, TraceIdsResponse,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/events/race_events", post(ingest_race_event))
        .route("/v1/events/telemetry_data", post(ingest_telemetry))
        .route("/v1/queue/stats", get(queue_stats))
        .route("/v1/queue/:kind/trace_ids", get(queue_trace_ids))
        .route("/v1/queue/:kind/:index", get(queue_message_at))
        .route("/v1/consistency", get(consistency_get))
        .route("/v1/consistency/update", post(consistency_update))
        .route("/v1/anomalies", get(anomalies_get))
        .route("/v1/anomalies/update", post(anomalies_update))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn error(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(msg))).into_response()
}

fn parse_kind(raw: &str) -> Result<EventKind, Response> {
    EventKind::parse(raw).ok_or_else(|| {
        error(
            StatusCode::BAD_REQUEST,
            format!("unknown event kind {raw:?}; expected race_events or telemetry_data"),
        )
    })
}

fn scan_failed(err: ScanError) -> Response {
    warn!(error = %err, "queue scan failed");
    error(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
}

fn store_failed(err: StoreError) -> Response {
    warn!(error = %err, "report read failed");
    error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Run a blocking scanner call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ScanError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(err)) => Err(scan_failed(err)),
        Err(join) => Err(error(StatusCode::INTERNAL_SERVER_ERROR, join.to_string())),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            config_hash: st.config_hash.clone(),
            queue: QueueHealth {
                transport: st.queue.transport_name().to_string(),
                connected: st.queue.is_connected(),
                last_error: st.queue.last_error(),
                connect_attempts: st.queue.connect_attempts(),
            },
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/events/{race_events,telemetry_data}
// ---------------------------------------------------------------------------

pub(crate) async fn ingest_race_event(
    State(st): State<Arc<AppState>>,
    Json(req): Json<RaceEventRequest>,
) -> Response {
    let at = Utc::now();
    let payload = RaceEventPayload {
        event_id: new_event_id(),
        car_number: req.car_number,
        lap_number: req.lap_number,
        event_type: req.event_type,
        timestamp: at.timestamp(),
        trace_id: trace_id_at(at),
    };
    let id = payload.event_id.clone();
    let trace_id = payload.trace_id.clone();
    let envelope = QueueEnvelope::new(EventKind::RaceEvent, at, payload);
    produce(&st, EventKind::RaceEvent, envelope, id, trace_id).await
}

pub(crate) async fn ingest_telemetry(
    State(st): State<Arc<AppState>>,
    Json(req): Json<TelemetryRequest>,
) -> Response {
    let at = Utc::now();
    let payload = TelemetryPayload {
        telemetry_id: new_event_id(),
        car_number: req.car_number,
        lap_number: req.lap_number,
        speed: req.speed,
        fuel_level: req.fuel_level,
        rpm: req.rpm,
        timestamp: at.timestamp(),
        trace_id: trace_id_at(at),
    };
    let id = payload.telemetry_id.clone();
    let trace_id = payload.trace_id.clone();
    let envelope = QueueEnvelope::new(EventKind::Telemetry, at, payload);
    produce(&st, EventKind::Telemetry, envelope, id, trace_id).await
}

async fn produce<P: Serialize>(
    st: &AppState,
    kind: EventKind,
    envelope: QueueEnvelope<P>,
    id: String,
    trace_id: String,
) -> Response {
    let bytes = match envelope.to_bytes() {
        Ok(b) => b,
        Err(err) => return error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    };

    // `produce` blocks while a connect is in progress.
    let queue = Arc::clone(&st.queue);
    let sent = tokio::task::spawn_blocking(move || queue.produce(&bytes)).await;
    match sent {
        Ok(Ok(())) => {
            info!(kind = %kind, %trace_id, "event produced");
            (
                StatusCode::CREATED,
                Json(IngestResponse {
                    event_kind: kind,
                    id,
                    trace_id,
                }),
            )
                .into_response()
        }
        Ok(Err(err)) => {
            warn!(kind = %kind, %trace_id, error = %err, "produce failed");
            error(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        Err(join) => error(StatusCode::INTERNAL_SERVER_ERROR, join.to_string()),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/queue/*
// ---------------------------------------------------------------------------

pub(crate) async fn queue_stats(State(st): State<Arc<AppState>>) -> Response {
    let scanner = Arc::clone(&st.scanner);
    match blocking(move || scanner.count_by_kind()).await {
        Ok(c) => (
            StatusCode::OK,
            Json(QueueStatsResponse {
                race_events: c.race_events,
                telemetry_data: c.telemetry,
            }),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub(crate) async fn queue_trace_ids(
    State(st): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let scanner = Arc::clone(&st.scanner);
    match blocking(move || scanner.scan(kind)).await {
        Ok(set) => {
            let identities = set.into_identities();
            (
                StatusCode::OK,
                Json(TraceIdsResponse {
                    event_kind: kind,
                    count: identities.len(),
                    identities,
                }),
            )
                .into_response()
        }
        Err(resp) => resp,
    }
}

pub(crate) async fn queue_message_at(
    State(st): State<Arc<AppState>>,
    Path((kind, index)): Path<(String, usize)>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let scanner = Arc::clone(&st.scanner);
    match blocking(move || scanner.find_at_index(kind, index)).await {
        Ok(Some(payload)) => (StatusCode::OK, Json(payload)).into_response(),
        Ok(None) => error(
            StatusCode::NOT_FOUND,
            format!("no {kind} message at index {index}"),
        ),
        Err(resp) => resp,
    }
}

// ---------------------------------------------------------------------------
// /v1/consistency
// ---------------------------------------------------------------------------

pub(crate) async fn consistency_get(State(st): State<Arc<AppState>>) -> Response {
    match st.reconciler.latest() {
        Ok(Stored::Available(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Stored::NotYet) => error(StatusCode::NOT_FOUND, "no consistency report yet"),
        Err(err) => store_failed(err),
    }
}

pub(crate) async fn consistency_update(State(st): State<Arc<AppState>>) -> Response {
    match st.run_reconcile().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(ConsistencyUpdateResponse {
                processing_time_ms: summary.duration.as_millis() as u64,
                missing_in_db: summary.missing_in_db,
                missing_in_queue: summary.missing_in_queue,
            }),
        )
            .into_response(),
        Err(ReconcileError::PassInProgress) => {
            error(StatusCode::CONFLICT, "reconciliation pass already in progress")
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: err.to_string(),
                step: Some(err.step().to_string()),
            }),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// /v1/anomalies
// ---------------------------------------------------------------------------

pub(crate) async fn anomalies_get(
    State(st): State<Arc<AppState>>,
    Query(q): Query<AnomaliesQuery>,
) -> Response {
    let kind = match q.event_type.as_deref() {
        None => None,
        Some(raw) => match parse_kind(raw) {
            Ok(k) => Some(k),
            Err(resp) => return resp,
        },
    };
    match st.detector.latest(kind) {
        Ok(Stored::Available(batch)) => (StatusCode::OK, Json(batch)).into_response(),
        Ok(Stored::NotYet) => error(StatusCode::NOT_FOUND, "no anomaly scan yet"),
        Err(err) => store_failed(err),
    }
}

pub(crate) async fn anomalies_update(State(st): State<Arc<AppState>>) -> Response {
    match st.run_anomaly_scan().await {
        Ok(run) => (
            StatusCode::OK,
            Json(AnomalyUpdateResponse {
                anomalies_count: run.batch.count,
                scanned: run.scanned,
                processing_time_ms: run.duration.as_millis() as u64,
            }),
        )
            .into_response(),
        Err(AnomalyError::PassInProgress) => {
            error(StatusCode::CONFLICT, "anomaly scan already in progress")
        }
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::ReconcileDone { .. } => "reconcile",
                    BusMsg::AnomaliesDone { .. } => "anomalies",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
