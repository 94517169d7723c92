use pw_schemas::{Anomaly, AnomalyType, EventIdentity, EventKind, QueueEnvelope};

/// Static thresholds. Both comparisons are strict: a value equal to the
/// threshold is not an anomaly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnomalyRules {
    pub min_speed: f64,
    pub max_lap_count: i64,
}

impl Default for AnomalyRules {
    fn default() -> Self {
        Self {
            min_speed: 0.0,
            max_lap_count: 78,
        }
    }
}

impl AnomalyRules {
    pub fn new(min_speed: f64, max_lap_count: i64) -> Self {
        Self {
            min_speed,
            max_lap_count,
        }
    }

    /// Evaluate one decoded message.
    ///
    /// Messages of an unknown kind, without an identity, or without the
    /// compared field (or with a non-numeric one) yield `None`.
    pub fn evaluate(&self, envelope: &QueueEnvelope) -> Option<Anomaly> {
        let identity = envelope.identity()?;
        match identity.event_kind {
            EventKind::Telemetry => {
                let speed = envelope.payload.get("speed")?.as_f64()?;
                (speed < self.min_speed).then(|| {
                    anomaly(
                        identity,
                        AnomalyType::NegativeSpeed,
                        format!("speed {speed} is below the minimum of {}", self.min_speed),
                    )
                })
            }
            EventKind::RaceEvent => {
                let lap = envelope.payload.get("lap_number")?.as_i64()?;
                (lap > self.max_lap_count).then(|| {
                    anomaly(
                        identity,
                        AnomalyType::LapCountExceeded,
                        format!(
                            "lap number {lap} exceeds the maximum of {}",
                            self.max_lap_count
                        ),
                    )
                })
            }
        }
    }

    /// Decode and evaluate raw message bytes.
    pub fn evaluate_bytes(&self, bytes: &[u8]) -> Option<Anomaly> {
        self.evaluate(&QueueEnvelope::decode(bytes)?)
    }
}

fn anomaly(identity: EventIdentity, anomaly_type: AnomalyType, description: String) -> Anomaly {
    Anomaly {
        event_id: identity.id,
        trace_id: identity.trace_id,
        event_kind: identity.event_kind,
        anomaly_type,
        description,
    }
}

/// Every anomaly in `messages`, in topic order.
pub fn scan_messages<I>(rules: &AnomalyRules, messages: I) -> Vec<Anomaly>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    messages
        .into_iter()
        .filter_map(|bytes| rules.evaluate_bytes(&bytes))
        .collect()
}
