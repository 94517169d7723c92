//! In-process topic.
//!
//! Behaves like a single-partition log: messages get monotonically increasing
//! offsets, consumers track their own position, and `expire_front` drops the
//! oldest messages the way broker retention would. Faults can be injected per
//! stage to exercise reconnect paths.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::transport::{QueueConsumer, QueueError, QueueProducer, QueueSession, QueueTransport, StartOffset};

/// Stage at which [`MemoryTopic::fail_next`] injects a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultStage {
    Handshake,
    Consumer,
    Producer,
    Poll,
    Send,
}

/// Counters for assertions in tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub handshakes: u64,
    pub consumers_opened: u64,
    pub producers_opened: u64,
    /// Consumers opened and not yet dropped.
    pub consumers_live: u64,
}

#[derive(Default)]
struct Faults {
    handshake: u32,
    consumer: u32,
    producer: u32,
    poll: u32,
    send: u32,
}

impl Faults {
    fn slot(&mut self, stage: FaultStage) -> &mut u32 {
        match stage {
            FaultStage::Handshake => &mut self.handshake,
            FaultStage::Consumer => &mut self.consumer,
            FaultStage::Producer => &mut self.producer,
            FaultStage::Poll => &mut self.poll,
            FaultStage::Send => &mut self.send,
        }
    }

    fn trip(&mut self, stage: FaultStage) -> bool {
        let n = self.slot(stage);
        if *n > 0 {
            *n -= 1;
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
struct TopicState {
    /// Offset of `log[0]`.
    base_offset: u64,
    log: Vec<Vec<u8>>,
    faults: Faults,
    stats: MemoryStats,
}

impl TopicState {
    fn end_offset(&self) -> u64 {
        self.base_offset + self.log.len() as u64
    }
}

/// Cloneable handle to one in-memory topic. Clones share the same log.
#[derive(Clone)]
pub struct MemoryTopic {
    state: Arc<Mutex<TopicState>>,
    poll_wait: Duration,
}

impl Default for MemoryTopic {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTopic {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TopicState::default())),
            poll_wait: Duration::from_millis(5),
        }
    }

    /// How long an empty poll blocks, standing in for a broker fetch wait.
    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    pub fn push(&self, payload: Vec<u8>) {
        self.lock().log.push(payload);
    }

    pub fn extend<I: IntoIterator<Item = Vec<u8>>>(&self, payloads: I) {
        self.lock().log.extend(payloads);
    }

    /// Retained messages, oldest first.
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.lock().log.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the `n` oldest messages, as retention would.
    pub fn expire_front(&self, n: usize) {
        let mut st = self.lock();
        let n = n.min(st.log.len());
        st.log.drain(..n);
        st.base_offset += n as u64;
    }

    /// Make the next `times` operations at `stage` fail.
    pub fn fail_next(&self, stage: FaultStage, times: u32) {
        *self.lock().faults.slot(stage) = times;
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, TopicState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<TopicState>) -> MutexGuard<'_, TopicState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueueTransport for MemoryTopic {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn handshake(&self) -> Result<Box<dyn QueueSession>, QueueError> {
        let mut st = self.lock();
        st.stats.handshakes += 1;
        if st.faults.trip(FaultStage::Handshake) {
            return Err(QueueError::Handshake("injected handshake fault".to_string()));
        }
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            poll_wait: self.poll_wait,
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<TopicState>>,
    poll_wait: Duration,
}

impl QueueSession for MemorySession {
    fn open_consumer(&self, start: StartOffset) -> Result<Box<dyn QueueConsumer>, QueueError> {
        let mut st = lock_state(&self.state);
        if st.faults.trip(FaultStage::Consumer) {
            return Err(QueueError::Consumer("injected consumer fault".to_string()));
        }
        st.stats.consumers_opened += 1;
        st.stats.consumers_live += 1;
        let position = match start {
            StartOffset::Earliest => st.base_offset,
            StartOffset::Latest => st.end_offset(),
        };
        Ok(Box::new(MemoryConsumer {
            state: Arc::clone(&self.state),
            position,
            poll_wait: self.poll_wait,
        }))
    }

    fn open_producer(&self) -> Result<Box<dyn QueueProducer>, QueueError> {
        let mut st = lock_state(&self.state);
        if st.faults.trip(FaultStage::Producer) {
            return Err(QueueError::Producer("injected producer fault".to_string()));
        }
        st.stats.producers_opened += 1;
        Ok(Box::new(MemoryProducer {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryConsumer {
    state: Arc<Mutex<TopicState>>,
    position: u64,
    poll_wait: Duration,
}

impl QueueConsumer for MemoryConsumer {
    fn poll(&mut self) -> Result<Vec<Vec<u8>>, QueueError> {
        {
            let mut st = lock_state(&self.state);
            if st.faults.trip(FaultStage::Poll) {
                return Err(QueueError::Poll("injected poll fault".to_string()));
            }
            // Expired messages are skipped, as a broker would on an
            // out-of-range fetch.
            let from = self.position.max(st.base_offset);
            let end = st.end_offset();
            if from < end {
                let start_idx = (from - st.base_offset) as usize;
                let batch = st.log[start_idx..].to_vec();
                self.position = end;
                return Ok(batch);
            }
        }
        std::thread::sleep(self.poll_wait);
        Ok(Vec::new())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let mut st = lock_state(&self.state);
        st.stats.consumers_live = st.stats.consumers_live.saturating_sub(1);
    }
}

struct MemoryProducer {
    state: Arc<Mutex<TopicState>>,
}

impl QueueProducer for MemoryProducer {
    fn send(&mut self, payload: &[u8]) -> Result<(), QueueError> {
        let mut st = lock_state(&self.state);
        if st.faults.trip(FaultStage::Send) {
            return Err(QueueError::Send("injected send fault".to_string()));
        }
        st.log.push(payload.to_vec());
        Ok(())
    }
}
