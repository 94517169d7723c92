//! pw-reconcile
//!
//! One reconciliation pass compares three independently sourced views of
//! which events exist: the topic (replayed), the durable store and the
//! aggregator.
//!
//! - [`engine`] is the deterministic diff. Pure logic, no IO.
//! - [`ReconciliationEngine`] gathers the inputs, runs the diff and replaces
//!   the persisted [`DivergenceReport`](pw_schemas::DivergenceReport).

pub mod engine;
mod pass;

pub use engine::{build_report, diff_kind, KindDiff};
pub use pass::{PassSummary, ReconcileError, ReconciliationEngine};
