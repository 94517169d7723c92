//! pw-queue
//!
//! Resilient access to the single shared event topic.
//!
//! - [`QueueConnection`] owns the long-lived client/consumer/producer triple
//!   and rebuilds all three together whenever any of them fails.
//! - [`Replay`] is an independent, self-closing read of the topic from the
//!   earliest retained offset.
//! - [`QueueTransport`] is the broker seam: [`KafkaTransport`] in production,
//!   [`MemoryTopic`] in tests and local runs.
//!
//! All calls are blocking. Async callers run them on the blocking pool.

mod backoff;
mod connection;
mod kafka_transport;
mod memory;
mod replay;
mod transport;

pub use backoff::Backoff;
pub use connection::QueueConnection;
pub use kafka_transport::{KafkaSettings, KafkaTransport};
pub use memory::{FaultStage, MemoryStats, MemoryTopic};
pub use replay::Replay;
pub use transport::{QueueConsumer, QueueError, QueueProducer, QueueSession, QueueTransport, StartOffset};
