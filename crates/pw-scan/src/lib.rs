//! pw-scan
//!
//! Reconstructs which events are currently visible on the topic by
//! replaying it end to end.
//!
//! Callers only see the [`IdentityScanner`] trait. The replay-backed
//! implementation is a full linear rescan per call; an indexed cache can
//! replace it without touching the reconciliation engine.

mod identity;
mod replay_scanner;

pub use identity::{classify, identities, IdentitySet, KindSets};
pub use replay_scanner::ReplayIdentityScanner;

use std::fmt;

use pw_queue::QueueError;
use pw_schemas::{EventKind, KindCounts};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The replay could not be opened or broke off part way.
    Queue(QueueError),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Queue(err) => write!(f, "queue replay failed: {err}"),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Queue(err) => Some(err),
        }
    }
}

impl From<QueueError> for ScanError {
    fn from(err: QueueError) -> Self {
        ScanError::Queue(err)
    }
}

// ---------------------------------------------------------------------------
// Scanner trait
// ---------------------------------------------------------------------------

/// Read-side view of the topic used by reconciliation and the queue
/// analyzer endpoints.
///
/// Every method is blocking and bounded by the replay inactivity timeout.
/// A result is only returned once the whole replay completed; a partial
/// scan is an error, never a short set.
pub trait IdentityScanner: Send + Sync {
    /// Identities of one kind.
    fn scan(&self, kind: EventKind) -> Result<IdentitySet, ScanError>;

    /// Both kinds from a single replay.
    fn scan_all(&self) -> Result<KindSets, ScanError>;

    /// Payload of the `index`-th message (zero based) of `kind`.
    ///
    /// Stops reading as soon as it is found. `Ok(None)` means the topic holds
    /// fewer messages of that kind.
    fn find_at_index(&self, kind: EventKind, index: usize) -> Result<Option<Value>, ScanError>;

    /// Messages per declared kind, well-formed or not.
    fn count_by_kind(&self) -> Result<KindCounts, ScanError>;
}
