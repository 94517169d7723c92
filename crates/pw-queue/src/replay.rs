//! Bounded replay of the topic from its earliest retained offset.
//!
//! There is no end-of-topic signal, so "everything currently on the topic"
//! means "everything delivered before `idle_timeout` passed without a new
//! message". The session and consumer are released the moment the replay
//! ends, errors, or is dropped early.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::transport::{QueueConsumer, QueueError, QueueSession};

struct ReplayHandles {
    // Dropped after the consumer (field order) so the consumer closes first.
    consumer: Box<dyn QueueConsumer>,
    _session: Box<dyn QueueSession>,
}

/// Iterator over raw message payloads.
///
/// Yields `Ok(bytes)` per message, at most one `Err` (after which it is
/// exhausted), and `None` once the inactivity window elapses.
pub struct Replay {
    handles: Option<ReplayHandles>,
    buffered: VecDeque<Vec<u8>>,
    idle_timeout: Duration,
    last_activity: Instant,
    delivered: u64,
}

impl Replay {
    pub(crate) fn new(
        session: Box<dyn QueueSession>,
        consumer: Box<dyn QueueConsumer>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            handles: Some(ReplayHandles {
                consumer,
                _session: session,
            }),
            buffered: VecDeque::new(),
            idle_timeout,
            last_activity: Instant::now(),
            delivered: 0,
        }
    }

    /// Messages handed to the caller so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// `true` once the broker handles have been released.
    pub fn is_released(&self) -> bool {
        self.handles.is_none()
    }

    fn release(&mut self) {
        if self.handles.take().is_some() {
            debug!(delivered = self.delivered, "replay released");
        }
    }
}

impl Iterator for Replay {
    type Item = Result<Vec<u8>, QueueError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(msg) = self.buffered.pop_front() {
                self.delivered += 1;
                return Some(Ok(msg));
            }

            let handles = self.handles.as_mut()?;
            match handles.consumer.poll() {
                Ok(batch) if batch.is_empty() => {
                    if self.last_activity.elapsed() >= self.idle_timeout {
                        self.release();
                        return None;
                    }
                }
                Ok(batch) => {
                    self.last_activity = Instant::now();
                    self.buffered.extend(batch);
                }
                Err(err) => {
                    self.release();
                    return Some(Err(err));
                }
            }
        }
    }
}

impl Drop for Replay {
    fn drop(&mut self) {
        self.release();
    }
}
