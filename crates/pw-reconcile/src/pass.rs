use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pw_scan::{IdentityScanner, IdentitySet, KindSets, ScanError};
use pw_schemas::{DivergenceReport, EventKind, KindCounts, ReportCounts};
use pw_store::{ReportStore, StoreError, Stored};
use pw_upstream::{StatsSource, StorageSource, UpstreamError};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::engine::build_report;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a pass failed. Each variant names the input that could not be
/// obtained; in every case the previous report is untouched.
#[derive(Debug)]
pub enum ReconcileError {
    /// Another pass holds the guard.
    PassInProgress,
    Stats(UpstreamError),
    QueueScan(ScanError),
    Storage(UpstreamError),
    Persist(StoreError),
    /// A task running part of the pass panicked.
    Task(String),
}

impl ReconcileError {
    /// Short stable name of the failed step, for logs and API bodies.
    pub fn step(&self) -> &'static str {
        match self {
            ReconcileError::PassInProgress => "guard",
            ReconcileError::Stats(_) => "stats",
            ReconcileError::QueueScan(_) => "queue",
            ReconcileError::Task(_) => "task",
            ReconcileError::Storage(_) => "storage",
            ReconcileError::Persist(_) => "persist",
        }
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::PassInProgress => f.write_str("reconciliation pass already in progress"),
            ReconcileError::Stats(err) => write!(f, "aggregator counters unavailable: {err}"),
            ReconcileError::QueueScan(err) => write!(f, "queue identities unavailable: {err}"),
            ReconcileError::Storage(err) => write!(f, "storage view unavailable: {err}"),
            ReconcileError::Persist(err) => write!(f, "report not persisted: {err}"),
            ReconcileError::Task(msg) => write!(f, "pass task failed: {msg}"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Stats(err) | ReconcileError::Storage(err) => Some(err),
            ReconcileError::QueueScan(err) => Some(err),
            ReconcileError::Persist(err) => Some(err),
            ReconcileError::PassInProgress | ReconcileError::Task(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pass summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub generated_at: DateTime<Utc>,
    pub duration: Duration,
    pub missing_in_db: usize,
    pub missing_in_queue: usize,
}

impl PassSummary {
    pub fn is_consistent(&self) -> bool {
        self.missing_in_db == 0 && self.missing_in_queue == 0
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ReconciliationEngine {
    inputs: PassInputs,
    guard: Arc<Mutex<()>>,
}

/// Everything a pass reads from or writes to. Cheap to clone so the pass can
/// run in its own task.
#[derive(Clone)]
struct PassInputs {
    stats: Arc<dyn StatsSource>,
    storage: Arc<dyn StorageSource>,
    scanner: Arc<dyn IdentityScanner>,
    store: ReportStore<DivergenceReport>,
}

impl ReconciliationEngine {
    pub fn new(
        stats: Arc<dyn StatsSource>,
        storage: Arc<dyn StorageSource>,
        scanner: Arc<dyn IdentityScanner>,
        store: ReportStore<DivergenceReport>,
    ) -> Self {
        Self {
            inputs: PassInputs {
                stats,
                storage,
                scanner,
                store,
            },
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Run one pass and replace the persisted report.
    ///
    /// Refused with [`ReconcileError::PassInProgress`] while another pass
    /// runs. Any failure aborts before the write.
    ///
    /// The pass runs in a detached task that owns the guard. Dropping the
    /// returned future stops the wait, not the pass, and the guard stays held
    /// until the pass really ends.
    pub async fn reconcile(&self) -> Result<PassSummary, ReconcileError> {
        let guard = Arc::clone(&self.guard)
            .try_lock_owned()
            .map_err(|_| ReconcileError::PassInProgress)?;

        let inputs = self.inputs.clone();
        let pass = tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();
            let result = inputs.run(started).await;
            match &result {
                Ok(summary) => info!(
                    duration_ms = summary.duration.as_millis() as u64,
                    missing_in_db = summary.missing_in_db,
                    missing_in_queue = summary.missing_in_queue,
                    "reconciliation pass complete"
                ),
                Err(err) => warn!(
                    step = err.step(),
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "reconciliation pass failed; previous report kept"
                ),
            }
            result
        });
        pass.await.map_err(|e| ReconcileError::Task(e.to_string()))?
    }

    /// Last persisted report.
    pub fn latest(&self) -> Result<Stored<DivergenceReport>, StoreError> {
        self.inputs.store.read()
    }
}

impl PassInputs {
    async fn run(&self, started: Instant) -> Result<PassSummary, ReconcileError> {
        // 1. Aggregator.
        let aggregator = self
            .stats
            .aggregator_counts()
            .await
            .map_err(ReconcileError::Stats)?;

        // 2. Queue: one replay classifies both kinds.
        let scanner = Arc::clone(&self.scanner);
        let queue = tokio::task::spawn_blocking(move || scanner.scan_all())
            .await
            .map_err(|e| ReconcileError::Task(e.to_string()))?
            .map_err(ReconcileError::QueueScan)?;

        // 3. Durable store.
        let mut db = KindSets::default();
        for kind in EventKind::ALL {
            let ids = self
                .storage
                .identities(kind)
                .await
                .map_err(ReconcileError::Storage)?;
            let set: IdentitySet = ids.into_iter().collect();
            match kind {
                EventKind::RaceEvent => db.race_events = set,
                EventKind::Telemetry => db.telemetry = set,
            }
        }
        let db_counts = self
            .storage
            .record_counts()
            .await
            .map_err(ReconcileError::Storage)?;

        // 4-5. Diff and counts.
        let counts = ReportCounts {
            db: db_counts,
            queue: KindCounts::new(
                queue.race_events.messages() as i64,
                queue.telemetry.messages() as i64,
            ),
            aggregator,
        };
        let generated_at = Utc::now();
        let duration = started.elapsed();
        let report = build_report(
            &queue,
            &db,
            counts,
            generated_at,
            duration.as_millis() as u64,
        );
        let summary = PassSummary {
            generated_at,
            duration,
            missing_in_db: report.missing_in_db.len(),
            missing_in_queue: report.missing_in_queue.len(),
        };

        // 6. Persist. fsync and rename block.
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.write(&report))
            .await
            .map_err(|e| ReconcileError::Task(e.to_string()))?
            .map_err(ReconcileError::Persist)?;

        Ok(summary)
    }
}
