use std::time::Duration;

use rand::Rng;

/// Uniform random delay between reconnect attempts.
///
/// Jitter spreads reconnects from several services restarted with the
/// broker. There is no cap on attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    min_ms: u64,
    max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_millis(500, 1_500)
    }
}

impl Backoff {
    /// An inverted window is normalised rather than rejected.
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: min_ms.max(max_ms),
        }
    }

    pub fn next_delay(&self) -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(self.min_ms..=self.max_ms))
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.min_ms),
            Duration::from_millis(self.max_ms),
        )
    }
}
