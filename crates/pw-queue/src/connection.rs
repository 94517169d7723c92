//! Long-lived connection to the shared topic.
//!
//! # Invariants
//!
//! - **All or nothing**: the session, consumer and producer are installed
//!   together or not at all. A failure at any stage drops whatever was built
//!   in that attempt; a consumer or producer is never reused across sessions.
//! - **Unbounded retry**: `connect` only returns once connected. The service
//!   has no useful degraded mode without the queue.
//! - **No silent drop**: `produce` connects first when disconnected. A send
//!   that fails drops the handles and is reported at once; the rebuild
//!   happens on the next `produce` or `connect`, never inside the failed call.
//! - **Replays are independent**: `replay_from_earliest` never touches the
//!   shared handles, so replays may run concurrently with each other and with
//!   `produce`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::replay::Replay;
use crate::transport::{QueueConsumer, QueueError, QueueProducer, QueueSession, QueueTransport, StartOffset};

struct Handles {
    // Held for its lifetime only; dropping it closes the client.
    _session: Box<dyn QueueSession>,
    consumer: Box<dyn QueueConsumer>,
    producer: Box<dyn QueueProducer>,
}

/// Observable connection status. Updated by the connect loop without holding
/// the handle lock across sleeps, so health checks never wait on a reconnect.
#[derive(Debug, Default)]
struct Status {
    connected: bool,
    last_error: Option<String>,
    attempts: u64,
}

pub struct QueueConnection {
    transport: Arc<dyn QueueTransport>,
    backoff: Backoff,
    handles: Mutex<Option<Handles>>,
    status: Mutex<Status>,
}

impl QueueConnection {
    /// Build a disconnected connection. Nothing touches the broker until
    /// [`connect`](Self::connect) or the first [`produce`](Self::produce).
    pub fn new(transport: Arc<dyn QueueTransport>, backoff: Backoff) -> Self {
        Self {
            transport,
            backoff,
            handles: Mutex::new(None),
            status: Mutex::new(Status::default()),
        }
    }

    /// Block until the client, shared consumer and producer are all up.
    pub fn connect(&self) {
        let mut slot = self.lock_handles();
        if slot.is_none() {
            *slot = Some(self.connect_blocking());
        }
    }

    /// Append one message to the tail of the topic.
    pub fn produce(&self, payload: &[u8]) -> Result<(), QueueError> {
        let mut slot = self.lock_handles();
        let result = slot
            .get_or_insert_with(|| self.connect_blocking())
            .producer
            .send(payload);

        if let Err(err) = &result {
            warn!(transport = self.transport.name(), error = %err, "send failed; connection dropped");
            self.discard(&mut slot, err);
        }
        result
    }

    /// Drain whatever arrived on the shared consumer since the last call.
    ///
    /// Never connects: while the handles are down this is
    /// [`QueueError::Disconnected`]. A poll error drops the handles.
    pub fn poll_tail(&self) -> Result<Vec<Vec<u8>>, QueueError> {
        let mut slot = self.lock_handles();
        let handles = slot.as_mut().ok_or(QueueError::Disconnected)?;
        let result = handles.consumer.poll();

        if let Err(err) = &result {
            warn!(transport = self.transport.name(), error = %err, "tail poll failed; connection dropped");
            self.discard(&mut slot, err);
        }
        result
    }

    /// Open a fresh session and consumer at the earliest retained offset.
    ///
    /// The returned [`Replay`] ends after `idle_timeout` without a new
    /// message. It does not retry: a broker outage fails the replay and the
    /// caller's next scheduled run is the retry.
    pub fn replay_from_earliest(&self, idle_timeout: Duration) -> Result<Replay, QueueError> {
        let session = self.transport.handshake()?;
        let consumer = session.open_consumer(StartOffset::Earliest)?;
        debug!(transport = self.transport.name(), ?idle_timeout, "replay opened");
        Ok(Replay::new(session, consumer, idle_timeout))
    }

    pub fn is_connected(&self) -> bool {
        self.lock_status().connected
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock_status().last_error.clone()
    }

    /// Total connect attempts (successful or not) since construction.
    pub fn connect_attempts(&self) -> u64 {
        self.lock_status().attempts
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn connect_blocking(&self) -> Handles {
        loop {
            let attempt = {
                let mut st = self.lock_status();
                st.attempts += 1;
                st.attempts
            };
            debug!(transport = self.transport.name(), attempt, "connecting to queue");

            match self.establish() {
                Ok(handles) => {
                    let mut st = self.lock_status();
                    st.connected = true;
                    st.last_error = None;
                    info!(transport = self.transport.name(), attempt, "queue connected");
                    return handles;
                }
                Err(err) => {
                    {
                        let mut st = self.lock_status();
                        st.connected = false;
                        st.last_error = Some(err.to_string());
                    }
                    let delay = self.backoff.next_delay();
                    warn!(
                        transport = self.transport.name(),
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "queue connect failed; retrying"
                    );
                    std::thread::sleep(delay);
                }
            }
        }
    }

    /// One attempt. On `Err` every handle built so far is dropped here.
    fn establish(&self) -> Result<Handles, QueueError> {
        let session = self.transport.handshake()?;
        let consumer = session.open_consumer(StartOffset::Latest)?;
        let producer = session.open_producer()?;
        Ok(Handles {
            _session: session,
            consumer,
            producer,
        })
    }

    fn discard(&self, slot: &mut Option<Handles>, err: &QueueError) {
        *slot = None;
        let mut st = self.lock_status();
        st.connected = false;
        st.last_error = Some(err.to_string());
    }

    fn lock_handles(&self) -> MutexGuard<'_, Option<Handles>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FaultStage, MemoryTopic};

    fn fast() -> Backoff {
        Backoff::from_millis(1, 2)
    }

    #[test]
    fn starts_disconnected_without_touching_broker() {
        let topic = MemoryTopic::new();
        let conn = QueueConnection::new(Arc::new(topic.clone()), fast());
        assert!(!conn.is_connected());
        assert_eq!(topic.stats().handshakes, 0);
    }

    #[test]
    fn produce_connects_on_demand() {
        let topic = MemoryTopic::new();
        let conn = QueueConnection::new(Arc::new(topic.clone()), fast());
        conn.produce(b"hello").unwrap();
        assert!(conn.is_connected());
        assert_eq!(topic.messages(), vec![b"hello".to_vec()]);
    }

    #[test]
    fn connect_retries_until_broker_accepts() {
        let topic = MemoryTopic::new();
        topic.fail_next(FaultStage::Handshake, 3);
        let conn = QueueConnection::new(Arc::new(topic.clone()), fast());
        conn.connect();
        assert!(conn.is_connected());
        assert_eq!(conn.connect_attempts(), 4);
        assert_eq!(conn.last_error(), None);
    }

    #[test]
    fn failed_send_is_reported_without_waiting_for_broker() {
        let topic = MemoryTopic::new();
        let conn = Arc::new(QueueConnection::new(
            Arc::new(topic.clone()),
            Backoff::from_millis(10, 10),
        ));
        conn.connect();
        topic.fail_next(FaultStage::Send, 1);
        // Broker stays unreachable for seconds worth of retries.
        topic.fail_next(FaultStage::Handshake, 200);

        let (tx, rx) = std::sync::mpsc::channel();
        {
            let conn = Arc::clone(&conn);
            std::thread::spawn(move || {
                let _ = tx.send(conn.produce(b"lost"));
            });
        }
        let result = rx
            .recv_timeout(Duration::from_millis(500))
            .expect("failed send must return promptly");
        assert!(matches!(result, Err(QueueError::Send(_))));
        assert!(!conn.is_connected());
        assert_eq!(topic.stats().handshakes, 1, "no reconnect inside the failed call");
        assert!(topic.messages().is_empty());
    }

    #[test]
    fn next_produce_rebuilds_after_failed_send() {
        let topic = MemoryTopic::new();
        let conn = QueueConnection::new(Arc::new(topic.clone()), fast());
        conn.connect();
        topic.fail_next(FaultStage::Send, 1);

        assert!(conn.produce(b"lost").is_err());
        conn.produce(b"kept").unwrap();
        assert!(conn.is_connected());
        assert_eq!(topic.stats().handshakes, 2);
        assert_eq!(topic.messages(), vec![b"kept".to_vec()]);
    }

    #[test]
    fn tail_does_not_connect() {
        let topic = MemoryTopic::new();
        let conn = QueueConnection::new(Arc::new(topic.clone()), fast());
        assert!(matches!(conn.poll_tail(), Err(QueueError::Disconnected)));
        assert_eq!(topic.stats().handshakes, 0);
    }

    #[test]
    fn tail_sees_only_messages_after_connect() {
        let topic = MemoryTopic::new();
        topic.push(b"before".to_vec());
        let conn = QueueConnection::new(Arc::new(topic.clone()), fast());
        conn.connect();
        topic.push(b"after".to_vec());
        assert_eq!(conn.poll_tail().unwrap(), vec![b"after".to_vec()]);
    }
}
