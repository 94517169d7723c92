//! Set difference keyed by `trace_id`.
//!
//! Output order is fixed (race events before telemetry, ascending trace id
//! within a kind) so two passes over unchanged inputs produce byte-identical
//! lists.

use chrono::{DateTime, Utc};
use pw_scan::{IdentitySet, KindSets};
use pw_schemas::{DivergenceReport, EventIdentity, EventKind, ReportCounts};

/// Result of comparing one kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KindDiff {
    /// On the topic, not in the durable store.
    pub missing_in_db: Vec<EventIdentity>,
    /// In the durable store, not on the topic.
    pub missing_in_queue: Vec<EventIdentity>,
}

/// Compare one kind. Only trace ids are compared; the kind-specific `id` is
/// carried through for the report and never used as a key.
pub fn diff_kind(queue: &IdentitySet, db: &IdentitySet) -> KindDiff {
    let missing_in_db = queue
        .iter()
        .filter(|i| !db.contains(&i.trace_id))
        .cloned()
        .collect();
    let missing_in_queue = db
        .iter()
        .filter(|i| !queue.contains(&i.trace_id))
        .cloned()
        .collect();
    KindDiff {
        missing_in_db,
        missing_in_queue,
    }
}

/// Assemble a full report from both sides' sets and the independently
/// sourced counts.
pub fn build_report(
    queue: &KindSets,
    db: &KindSets,
    counts: ReportCounts,
    generated_at: DateTime<Utc>,
    duration_ms: u64,
) -> DivergenceReport {
    let mut missing_in_db = Vec::new();
    let mut missing_in_queue = Vec::new();

    for kind in EventKind::ALL {
        let d = diff_kind(queue.get(kind), db.get(kind));
        missing_in_db.extend(d.missing_in_db);
        missing_in_queue.extend(d.missing_in_queue);
    }

    DivergenceReport {
        generated_at,
        duration_ms,
        counts,
        missing_in_db,
        missing_in_queue,
    }
}
