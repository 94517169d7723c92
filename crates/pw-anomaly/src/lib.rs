//! pw-anomaly
//!
//! Flags individual events that violate static numeric thresholds.
//!
//! - [`rules`] is pure: one envelope in, at most one anomaly out.
//! - [`AnomalyDetector`] replays the topic, applies the rules and replaces
//!   the persisted [`AnomalyBatch`](pw_schemas::AnomalyBatch).

mod detector;
pub mod rules;

pub use detector::{AnomalyDetector, AnomalyError, AnomalyRun};
pub use rules::{scan_messages, AnomalyRules};
