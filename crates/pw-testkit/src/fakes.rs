//! In-memory collaborators with scriptable failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use pw_schemas::{EventIdentity, EventKind, KindCounts};
use pw_upstream::{StatsSource, StorageSource, UpstreamError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unavailable(collaborator: &'static str) -> UpstreamError {
    UpstreamError::Status {
        collaborator,
        url: format!("memory://{collaborator}"),
        status: 503,
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticStats {
    counts: Mutex<KindCounts>,
    failing: Mutex<bool>,
    calls: AtomicU64,
}

impl StaticStats {
    pub fn new(counts: KindCounts) -> Self {
        Self {
            counts: Mutex::new(counts),
            ..Self::default()
        }
    }

    pub fn set_counts(&self, counts: KindCounts) {
        *lock(&self.counts) = counts;
    }

    /// Every call fails with 503 until reset.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StatsSource for StaticStats {
    fn name(&self) -> &'static str {
        "stats"
    }

    async fn aggregator_counts(&self) -> Result<KindCounts, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.failing) {
            return Err(unavailable("stats"));
        }
        Ok(*lock(&self.counts))
    }
}

// ---------------------------------------------------------------------------
// Durable store
// ---------------------------------------------------------------------------

/// Record counts follow the identity lists unless overridden.
#[derive(Default)]
pub struct StaticStorage {
    race_events: Mutex<Vec<EventIdentity>>,
    telemetry: Mutex<Vec<EventIdentity>>,
    counts_override: Mutex<Option<KindCounts>>,
    failing: Mutex<bool>,
}

impl StaticStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored identities of `kind` with one per trace id
    /// (id = `<prefix><trace>`).
    pub fn set_traces<'a>(&self, kind: EventKind, trace_ids: impl IntoIterator<Item = &'a str>) {
        let prefix = match kind {
            EventKind::RaceEvent => "r",
            EventKind::Telemetry => "t",
        };
        let ids = trace_ids
            .into_iter()
            .map(|t| EventIdentity::new(format!("{prefix}{t}"), t, kind))
            .collect();
        *self.slot(kind) = ids;
    }

    pub fn set_counts(&self, counts: Option<KindCounts>) {
        *lock(&self.counts_override) = counts;
    }

    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    fn slot(&self, kind: EventKind) -> MutexGuard<'_, Vec<EventIdentity>> {
        match kind {
            EventKind::RaceEvent => lock(&self.race_events),
            EventKind::Telemetry => lock(&self.telemetry),
        }
    }
}

#[async_trait::async_trait]
impl StorageSource for StaticStorage {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn identities(&self, kind: EventKind) -> Result<Vec<EventIdentity>, UpstreamError> {
        if *lock(&self.failing) {
            return Err(unavailable("storage"));
        }
        Ok(self.slot(kind).clone())
    }

    async fn record_counts(&self) -> Result<KindCounts, UpstreamError> {
        if *lock(&self.failing) {
            return Err(unavailable("storage"));
        }
        if let Some(c) = *lock(&self.counts_override) {
            return Ok(c);
        }
        Ok(KindCounts::new(
            self.slot(EventKind::RaceEvent).len() as i64,
            self.slot(EventKind::Telemetry).len() as i64,
        ))
    }
}
