//! Shared runtime state for pw-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The background jobs
//! (queue connect and tail, heartbeat, reconcile and anomaly ticks) are
//! spawned from here and report through the same broadcast bus the SSE
//! stream reads.

use std::sync::Arc;
use std::time::Duration;

use pw_anomaly::{AnomalyDetector, AnomalyError};
use pw_queue::{QueueConnection, QueueError};
use pw_reconcile::{ReconcileError, ReconciliationEngine};
use pw_scan::IdentityScanner;
use pw_schemas::{KindCounts, QueueEnvelope};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    ReconcileDone {
        duration_ms: u64,
        missing_in_db: usize,
        missing_in_queue: usize,
    },
    AnomaliesDone {
        duration_ms: u64,
        count: usize,
    },
    /// Messages that reached the topic tail since the previous poll.
    QueueTail {
        race_events: i64,
        telemetry: i64,
    },
    LogLine {
        level: String,
        msg: String,
    },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Long-lived services the handlers and jobs share.
#[derive(Clone)]
pub struct Components {
    pub queue: Arc<QueueConnection>,
    pub scanner: Arc<dyn IdentityScanner>,
    pub reconciler: Arc<ReconciliationEngine>,
    pub detector: Arc<AnomalyDetector>,
}

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// Canonical config hash, reported on /v1/health.
    pub config_hash: String,
    pub queue: Arc<QueueConnection>,
    pub scanner: Arc<dyn IdentityScanner>,
    pub reconciler: Arc<ReconciliationEngine>,
    pub detector: Arc<AnomalyDetector>,
}

impl AppState {
    pub fn new(components: Components, config_hash: impl Into<String>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "pw-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash: config_hash.into(),
            queue: components.queue,
            scanner: components.scanner,
            reconciler: components.reconciler,
            detector: components.detector,
        }
    }

    fn log_line(&self, level: &str, msg: String) {
        let _ = self.bus.send(BusMsg::LogLine {
            level: level.to_string(),
            msg,
        });
    }

    /// Run one reconciliation pass and publish the outcome on the bus.
    pub async fn run_reconcile(&self) -> Result<pw_reconcile::PassSummary, ReconcileError> {
        let result = self.reconciler.reconcile().await;
        match &result {
            Ok(s) => {
                let _ = self.bus.send(BusMsg::ReconcileDone {
                    duration_ms: s.duration.as_millis() as u64,
                    missing_in_db: s.missing_in_db,
                    missing_in_queue: s.missing_in_queue,
                });
            }
            Err(ReconcileError::PassInProgress) => {}
            Err(err) => self.log_line("ERROR", format!("reconciliation failed: {err}")),
        }
        result
    }

    /// Drain the shared consumer on the blocking pool and publish per-kind
    /// counts of what arrived. A connection dropped by a failed send or poll
    /// is rebuilt here first, off the request path.
    pub async fn follow_tail(&self) -> Result<KindCounts, QueueError> {
        let queue = Arc::clone(&self.queue);
        let batch = tokio::task::spawn_blocking(move || {
            if !queue.is_connected() {
                queue.connect();
            }
            queue.poll_tail()
        })
        .await
        .map_err(|e| QueueError::Poll(format!("tail task failed: {e}")))??;

        let mut counts = KindCounts::default();
        for msg in &batch {
            if let Some(kind) = QueueEnvelope::decode(msg).and_then(|e| e.event_kind()) {
                counts.set(kind, counts.get(kind) + 1);
            }
        }
        if !batch.is_empty() {
            let _ = self.bus.send(BusMsg::QueueTail {
                race_events: counts.race_events,
                telemetry: counts.telemetry,
            });
        }
        Ok(counts)
    }

    /// Run one anomaly scan on the blocking pool and publish the outcome.
    pub async fn run_anomaly_scan(&self) -> Result<pw_anomaly::AnomalyRun, AnomalyError> {
        let result = Arc::clone(&self.detector).scan_on_blocking_pool().await;
        match &result {
            Ok(run) => {
                let _ = self.bus.send(BusMsg::AnomaliesDone {
                    duration_ms: run.duration.as_millis() as u64,
                    count: run.batch.count,
                });
            }
            Err(AnomalyError::PassInProgress) => {}
            Err(err) => {
                warn!(error = %err, "anomaly scan failed");
                self.log_line("ERROR", format!("anomaly scan failed: {err}"));
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Background jobs
// ---------------------------------------------------------------------------

/// Start the queue connect loop on the blocking pool. It retries until the
/// broker accepts; the HTTP server does not wait for it.
pub fn spawn_queue_connect(queue: Arc<QueueConnection>) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        queue.connect();
        info!(transport = queue.transport_name(), "queue connection ready");
    })
}

/// Spawn a background task that follows the topic tail every `interval`.
pub fn spawn_queue_tail(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(err) = state.follow_tail().await {
                debug!(error = %err, "tail poll failed");
            }
        }
    });
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Spawn a background task that runs a reconciliation pass every
/// `interval`. A tick that finds a pass still running is skipped.
pub fn spawn_reconcile_tick(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(ReconcileError::PassInProgress) = state.run_reconcile().await {
                debug!("reconcile tick skipped; pass in progress");
            }
        }
    });
}

/// Spawn a background task that runs an anomaly scan every `interval`.
pub fn spawn_anomaly_tick(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(AnomalyError::PassInProgress) = state.run_anomaly_scan().await {
                debug!("anomaly tick skipped; scan in progress");
            }
        }
    });
}
