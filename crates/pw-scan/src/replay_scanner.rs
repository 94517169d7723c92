use std::sync::Arc;
use std::time::{Duration, Instant};

use pw_queue::{QueueConnection, Replay};
use pw_schemas::{EventKind, KindCounts, QueueEnvelope};
use serde_json::Value;
use tracing::{debug, info};

use crate::identity::{classify, identities, IdentitySet, KindSets};
use crate::{IdentityScanner, ScanError};

/// [`IdentityScanner`] backed by a fresh replay from the earliest offset on
/// every call.
pub struct ReplayIdentityScanner {
    conn: Arc<QueueConnection>,
    idle_timeout: Duration,
}

impl ReplayIdentityScanner {
    pub fn new(conn: Arc<QueueConnection>, idle_timeout: Duration) -> Self {
        Self { conn, idle_timeout }
    }

    fn replay(&self) -> Result<Replay, ScanError> {
        Ok(self.conn.replay_from_earliest(self.idle_timeout)?)
    }
}

impl IdentityScanner for ReplayIdentityScanner {
    fn scan(&self, kind: EventKind) -> Result<IdentitySet, ScanError> {
        let started = Instant::now();
        let mut seen = 0u64;
        let mut failure = None;
        // The replay yields at most one error and ends there.
        let payloads = self.replay()?.map_while(|msg| match msg {
            Ok(bytes) => {
                seen += 1;
                Some(bytes)
            }
            Err(err) => {
                failure = Some(err);
                None
            }
        });
        let set: IdentitySet = identities(payloads, kind).collect();
        if let Some(err) = failure {
            return Err(err.into());
        }
        info!(
            kind = %kind,
            seen,
            matched = set.messages(),
            unique = set.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "queue scan complete"
        );
        Ok(set)
    }

    fn scan_all(&self) -> Result<KindSets, ScanError> {
        let started = Instant::now();
        let mut sets = KindSets::default();
        let mut seen = 0u64;
        for msg in self.replay()? {
            let msg = msg?;
            seen += 1;
            if let Some(identity) = classify(&msg) {
                sets.insert(identity);
            }
        }
        info!(
            seen,
            race_events = sets.race_events.messages(),
            telemetry = sets.telemetry.messages(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "queue scan complete"
        );
        Ok(sets)
    }

    fn find_at_index(&self, kind: EventKind, index: usize) -> Result<Option<Value>, ScanError> {
        let mut counter = 0usize;
        // Dropping the replay on early return releases the consumer.
        for msg in self.replay()? {
            let Some(env) = QueueEnvelope::decode(&msg?) else {
                continue;
            };
            if env.event_kind() != Some(kind) {
                continue;
            }
            if counter == index {
                debug!(kind = %kind, index, "queue message found");
                return Ok(Some(env.payload));
            }
            counter += 1;
        }
        debug!(kind = %kind, index, available = counter, "queue message not found");
        Ok(None)
    }

    fn count_by_kind(&self) -> Result<KindCounts, ScanError> {
        let mut counts = KindCounts::default();
        for msg in self.replay()? {
            let Some(kind) = QueueEnvelope::decode(&msg?).and_then(|e| e.event_kind()) else {
                continue;
            };
            counts.set(kind, counts.get(kind) + 1);
        }
        Ok(counts)
    }
}
