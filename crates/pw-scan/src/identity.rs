//! Pure classification of raw messages. No IO.

use std::collections::BTreeMap;

use pw_schemas::{EventIdentity, EventKind, QueueEnvelope};

/// Identities of one kind keyed by `trace_id`.
///
/// A repeated `trace_id` keeps the last identity seen (at-least-once
/// producers may resend). `messages` still counts every well-formed message,
/// so it can exceed `len()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentitySet {
    by_trace: BTreeMap<String, EventIdentity>,
    messages: u64,
}

impl IdentitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: EventIdentity) {
        self.messages += 1;
        self.by_trace.insert(identity.trace_id.clone(), identity);
    }

    pub fn len(&self) -> usize {
        self.by_trace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_trace.is_empty()
    }

    /// Well-formed messages that contributed to this set.
    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn contains(&self, trace_id: &str) -> bool {
        self.by_trace.contains_key(trace_id)
    }

    pub fn get(&self, trace_id: &str) -> Option<&EventIdentity> {
        self.by_trace.get(trace_id)
    }

    /// Identities ordered by `trace_id`.
    pub fn iter(&self) -> impl Iterator<Item = &EventIdentity> {
        self.by_trace.values()
    }

    pub fn into_identities(self) -> Vec<EventIdentity> {
        self.by_trace.into_values().collect()
    }
}

impl FromIterator<EventIdentity> for IdentitySet {
    fn from_iter<I: IntoIterator<Item = EventIdentity>>(iter: I) -> Self {
        let mut set = IdentitySet::new();
        for identity in iter {
            set.insert(identity);
        }
        set
    }
}

impl Extend<EventIdentity> for IdentitySet {
    fn extend<I: IntoIterator<Item = EventIdentity>>(&mut self, iter: I) {
        for identity in iter {
            self.insert(identity);
        }
    }
}

/// One set per kind, filled by a single replay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KindSets {
    pub race_events: IdentitySet,
    pub telemetry: IdentitySet,
}

impl KindSets {
    pub fn get(&self, kind: EventKind) -> &IdentitySet {
        match kind {
            EventKind::RaceEvent => &self.race_events,
            EventKind::Telemetry => &self.telemetry,
        }
    }

    fn get_mut(&mut self, kind: EventKind) -> &mut IdentitySet {
        match kind {
            EventKind::RaceEvent => &mut self.race_events,
            EventKind::Telemetry => &mut self.telemetry,
        }
    }

    pub fn insert(&mut self, identity: EventIdentity) {
        self.get_mut(identity.event_kind).insert(identity);
    }
}

/// Lazily map raw payloads to identities of `kind`, skipping anything that
/// is not a well-formed message of that kind.
pub fn identities<I>(messages: I, kind: EventKind) -> impl Iterator<Item = EventIdentity>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    messages
        .into_iter()
        .filter_map(move |bytes| QueueEnvelope::decode(&bytes)?.identity_of(kind))
}

/// Identity of a single raw message for whatever kind it declares.
pub fn classify(bytes: &[u8]) -> Option<EventIdentity> {
    QueueEnvelope::decode(bytes)?.identity()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race(event_id: &str, trace_id: &str) -> Vec<u8> {
        format!(
            r#"{{"type":"race_events","datetime":"2025-01-01T00:00:00","payload":{{"event_id":"{event_id}","trace_id":"{trace_id}","lap_number":1}}}}"#
        )
        .into_bytes()
    }

    fn telemetry(telemetry_id: &str, trace_id: &str) -> Vec<u8> {
        format!(
            r#"{{"type":"telemetry_data","payload":{{"telemetry_id":"{telemetry_id}","trace_id":"{trace_id}"}}}}"#
        )
        .into_bytes()
    }

    #[test]
    fn only_requested_kind_is_emitted() {
        let msgs = vec![race("r1", "1"), telemetry("t1", "2"), race("r2", "3")];
        let got: Vec<_> = identities(msgs, EventKind::RaceEvent).collect();
        assert_eq!(
            got,
            vec![
                EventIdentity::new("r1", "1", EventKind::RaceEvent),
                EventIdentity::new("r2", "3", EventKind::RaceEvent),
            ]
        );
    }

    #[test]
    fn malformed_messages_are_skipped() {
        let msgs = vec![
            b"{not json".to_vec(),
            br#"{"type":"race_events","payload":{"event_id":"r1"}}"#.to_vec(),
            br#"{"type":"race_events","payload":{"trace_id":"9"}}"#.to_vec(),
            br#"{"type":"pit_stop","payload":{"event_id":"x","trace_id":"8"}}"#.to_vec(),
            br#"{"type":"race_events","payload":{"event_id":true,"trace_id":"7"}}"#.to_vec(),
            race("r2", "2"),
        ];
        let set: IdentitySet = identities(msgs, EventKind::RaceEvent).collect();
        assert_eq!(set.len(), 1);
        assert!(set.contains("2"));
    }

    #[test]
    fn duplicate_trace_id_keeps_last_but_counts_both() {
        let set: IdentitySet =
            identities(vec![race("first", "1"), race("second", "1")], EventKind::RaceEvent)
                .collect();
        assert_eq!(set.len(), 1);
        assert_eq!(set.messages(), 2);
        assert_eq!(set.get("1").map(|i| i.id.as_str()), Some("second"));
    }

    #[test]
    fn kind_sets_route_by_declared_kind() {
        let mut sets = KindSets::default();
        for bytes in [race("r1", "1"), telemetry("t1", "2"), b"junk".to_vec()] {
            if let Some(identity) = classify(&bytes) {
                sets.insert(identity);
            }
        }
        assert_eq!(sets.get(EventKind::RaceEvent).len(), 1);
        assert_eq!(sets.get(EventKind::Telemetry).len(), 1);
    }

    #[test]
    fn iteration_is_ordered_by_trace_id() {
        let set: IdentitySet = identities(
            vec![race("c", "30"), race("a", "10"), race("b", "20")],
            EventKind::RaceEvent,
        )
        .collect();
        let order: Vec<&str> = set.iter().map(|i| i.trace_id.as_str()).collect();
        assert_eq!(order, vec!["10", "20", "30"]);
    }
}
