//! Broker boundary.
//!
//! A transport hands out sessions; a session hands out consumers and
//! producers bound to one topic. Handles are owned boxes so dropping one
//! releases whatever the broker client holds for it.

use std::fmt;

/// Where a new consumer starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOffset {
    /// Earliest retained offset (replay).
    Earliest,
    /// Tail of the topic at open time (continuous draining).
    Latest,
}

/// Errors surfaced by a [`QueueTransport`] and its handles.
///
/// The variant names the stage that failed so a reconnect log line says
/// exactly where the broker refused us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Client creation / metadata handshake failed.
    Handshake(String),
    /// Consumer could not be created.
    Consumer(String),
    /// Producer could not be created.
    Producer(String),
    /// Fetch from an open consumer failed.
    Poll(String),
    /// Send through an open producer failed.
    Send(String),
    /// The shared handles are down and this call does not reconnect.
    Disconnected,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Handshake(msg) => write!(f, "queue handshake failed: {msg}"),
            QueueError::Consumer(msg) => write!(f, "queue consumer creation failed: {msg}"),
            QueueError::Producer(msg) => write!(f, "queue producer creation failed: {msg}"),
            QueueError::Poll(msg) => write!(f, "queue poll failed: {msg}"),
            QueueError::Send(msg) => write!(f, "queue send failed: {msg}"),
            QueueError::Disconnected => f.write_str("queue not connected"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Broker client factory.
///
/// Implementations must be `Send + Sync`: one transport is shared by the
/// long-lived connection and every concurrent replay.
pub trait QueueTransport: Send + Sync {
    /// Short name for logs (e.g. `"kafka"`).
    fn name(&self) -> &'static str;

    /// Create a client and verify the topic is reachable.
    fn handshake(&self) -> Result<Box<dyn QueueSession>, QueueError>;
}

/// A connected client for one topic.
pub trait QueueSession: Send {
    fn open_consumer(&self, start: StartOffset) -> Result<Box<dyn QueueConsumer>, QueueError>;

    fn open_producer(&self) -> Result<Box<dyn QueueProducer>, QueueError>;
}

pub trait QueueConsumer: Send {
    /// One fetch round. An empty batch means nothing arrived within the
    /// transport's fetch wait; it is not end-of-topic by itself.
    fn poll(&mut self) -> Result<Vec<Vec<u8>>, QueueError>;
}

pub trait QueueProducer: Send {
    fn send(&mut self, payload: &[u8]) -> Result<(), QueueError>;
}
