use std::fmt;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use chrono::Utc;
use pw_queue::{QueueConnection, QueueError};
use pw_schemas::{AnomalyBatch, EventKind};
use pw_store::{ReportStore, StoreError, Stored};
use tracing::{info, warn};

use crate::rules::{scan_messages, AnomalyRules};

#[derive(Debug)]
pub enum AnomalyError {
    /// Another scan holds the guard.
    PassInProgress,
    Replay(QueueError),
    Persist(StoreError),
    /// The blocking scan task panicked or was cancelled.
    Task(String),
}

impl fmt::Display for AnomalyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyError::PassInProgress => f.write_str("anomaly scan already in progress"),
            AnomalyError::Replay(err) => write!(f, "anomaly scan replay failed: {err}"),
            AnomalyError::Persist(err) => write!(f, "anomaly batch not persisted: {err}"),
            AnomalyError::Task(msg) => write!(f, "anomaly scan task failed: {msg}"),
        }
    }
}

impl std::error::Error for AnomalyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnomalyError::PassInProgress | AnomalyError::Task(_) => None,
            AnomalyError::Replay(err) => Some(err),
            AnomalyError::Persist(err) => Some(err),
        }
    }
}

/// Result of one successful scan.
#[derive(Debug, Clone)]
pub struct AnomalyRun {
    pub batch: AnomalyBatch,
    /// Messages read from the topic, including skipped ones.
    pub scanned: u64,
    pub duration: Duration,
}

pub struct AnomalyDetector {
    conn: Arc<QueueConnection>,
    rules: AnomalyRules,
    idle_timeout: Duration,
    store: ReportStore<AnomalyBatch>,
    guard: Mutex<()>,
}

impl AnomalyDetector {
    pub fn new(
        conn: Arc<QueueConnection>,
        rules: AnomalyRules,
        idle_timeout: Duration,
        store: ReportStore<AnomalyBatch>,
    ) -> Self {
        Self {
            conn,
            rules,
            idle_timeout,
            store,
            guard: Mutex::new(()),
        }
    }

    pub fn rules(&self) -> AnomalyRules {
        self.rules
    }

    /// Replay the topic and replace the persisted batch.
    ///
    /// Blocking. A second call while one is running is refused with
    /// [`AnomalyError::PassInProgress`]. On any error the previous batch is
    /// left as it was.
    pub fn scan_anomalies(&self) -> Result<AnomalyRun, AnomalyError> {
        let _guard = match self.guard.try_lock() {
            Ok(g) => g,
            // A panicked scan left nothing behind worth protecting.
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(AnomalyError::PassInProgress),
        };

        let started = Instant::now();
        let mut scanned = 0u64;
        let mut failure = None;
        let replay = self
            .conn
            .replay_from_earliest(self.idle_timeout)
            .map_err(AnomalyError::Replay)?;
        let payloads = replay.map_while(|msg| match msg {
            Ok(bytes) => {
                scanned += 1;
                Some(bytes)
            }
            Err(err) => {
                failure = Some(err);
                None
            }
        });
        let anomalies = scan_messages(&self.rules, payloads);
        if let Some(err) = failure {
            return Err(AnomalyError::Replay(err));
        }

        let batch = AnomalyBatch::new(anomalies, Utc::now());
        if let Err(err) = self.store.write(&batch) {
            warn!(error = %err, "anomaly batch write failed; previous batch kept");
            return Err(AnomalyError::Persist(err));
        }

        let duration = started.elapsed();
        info!(
            scanned,
            anomalies = batch.count,
            duration_ms = duration.as_millis() as u64,
            "anomaly scan complete"
        );
        Ok(AnomalyRun {
            batch,
            scanned,
            duration,
        })
    }

    /// [`scan_anomalies`](Self::scan_anomalies) on the tokio blocking pool.
    pub async fn scan_on_blocking_pool(self: Arc<Self>) -> Result<AnomalyRun, AnomalyError> {
        tokio::task::spawn_blocking(move || self.scan_anomalies())
            .await
            .map_err(|e| AnomalyError::Task(e.to_string()))?
    }

    /// Last persisted batch, optionally restricted to one kind.
    pub fn latest(&self, kind: Option<EventKind>) -> Result<Stored<AnomalyBatch>, StoreError> {
        Ok(match self.store.read()? {
            Stored::Available(batch) => Stored::Available(match kind {
                Some(k) => batch.for_kind(k),
                None => batch,
            }),
            Stored::NotYet => Stored::NotYet,
        })
    }
}
