//! pw-upstream
//!
//! Boundary to the two HTTP collaborators a reconciliation pass reads:
//! the aggregator (rolling counters) and the durable store (identity lists
//! and record counts).
//!
//! The traits are the seam; [`HttpStats`] and [`HttpStorage`] are the
//! reqwest-backed implementations. Response decoding lives in [`contract`]
//! so it can be tested without a server.

pub mod contract;
mod http;

pub use http::{HttpStats, HttpStorage};

use std::fmt;

use pw_schemas::{EventIdentity, EventKind, KindCounts};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Every variant names the collaborator (`"stats"` or `"storage"`) so a
/// failed pass says which side broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Connect, timeout or other transport failure.
    Transport {
        collaborator: &'static str,
        message: String,
    },
    /// Non-2xx response.
    Status {
        collaborator: &'static str,
        url: String,
        status: u16,
    },
    /// Body was not JSON.
    Decode {
        collaborator: &'static str,
        message: String,
    },
    /// JSON did not have the agreed shape.
    Contract {
        collaborator: &'static str,
        message: String,
    },
}

impl UpstreamError {
    pub fn collaborator(&self) -> &'static str {
        match self {
            UpstreamError::Transport { collaborator, .. }
            | UpstreamError::Status { collaborator, .. }
            | UpstreamError::Decode { collaborator, .. }
            | UpstreamError::Contract { collaborator, .. } => collaborator,
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Transport {
                collaborator,
                message,
            } => write!(f, "{collaborator}: transport error: {message}"),
            UpstreamError::Status {
                collaborator,
                url,
                status,
            } => write!(f, "{collaborator}: http status={status} url={url}"),
            UpstreamError::Decode {
                collaborator,
                message,
            } => write!(f, "{collaborator}: decode error: {message}"),
            UpstreamError::Contract {
                collaborator,
                message,
            } => write!(f, "{collaborator}: contract violation: {message}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Aggregator counters.
#[async_trait::async_trait]
pub trait StatsSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Self-reported per-kind counters (single request).
    async fn aggregator_counts(&self) -> Result<KindCounts, UpstreamError>;
}

/// Durable store views.
#[async_trait::async_trait]
pub trait StorageSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every persisted identity of `kind`.
    async fn identities(&self, kind: EventKind) -> Result<Vec<EventIdentity>, UpstreamError>;

    /// Row counts per kind.
    async fn record_counts(&self) -> Result<KindCounts, UpstreamError>;
}
