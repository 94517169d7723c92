//! Scenario: a connect that fails part-way never leaves a usable
//! half-initialised connection.
//!
//! # Invariants under test
//!
//! 1. A fault after the client handshake but before the producer exists
//!    leaves the connection disconnected; the retry performs a full new
//!    handshake instead of reusing the earlier client.
//! 2. A consumer built in the failed attempt is released, not kept.
//! 3. `produce` on a disconnected connection reconnects from scratch before
//!    sending; the message is not dropped.

use std::sync::Arc;

use pw_queue::{Backoff, FaultStage, MemoryTopic, QueueConnection};

fn fast() -> Backoff {
    Backoff::from_millis(1, 3)
}

#[test]
fn producer_fault_forces_full_reconnect() {
    let topic = MemoryTopic::new();
    topic.fail_next(FaultStage::Producer, 1);

    let conn = QueueConnection::new(Arc::new(topic.clone()), fast());
    conn.connect();

    let stats = topic.stats();
    assert!(conn.is_connected());
    assert_eq!(conn.connect_attempts(), 2);
    assert_eq!(stats.handshakes, 2, "retry must redo the client handshake");
    assert_eq!(stats.consumers_opened, 2, "consumer is rebuilt, not reused");
    assert_eq!(stats.producers_opened, 1);
    assert_eq!(
        stats.consumers_live, 1,
        "consumer from the failed attempt must be released"
    );
}

#[test]
fn consumer_fault_never_reaches_producer_stage() {
    let topic = MemoryTopic::new();
    topic.fail_next(FaultStage::Consumer, 2);

    let conn = QueueConnection::new(Arc::new(topic.clone()), fast());
    conn.connect();

    let stats = topic.stats();
    assert_eq!(stats.handshakes, 3);
    assert_eq!(stats.producers_opened, 1);
}

#[test]
fn produce_while_disconnected_connects_then_sends() {
    let topic = MemoryTopic::new();
    topic.fail_next(FaultStage::Producer, 1);

    let conn = QueueConnection::new(Arc::new(topic.clone()), fast());
    conn.produce(br#"{"type":"race_events"}"#).unwrap();

    assert_eq!(topic.len(), 1);
    assert_eq!(topic.stats().handshakes, 2);
}

#[test]
fn last_error_names_failed_stage_until_success() {
    let topic = MemoryTopic::new();
    let conn = Arc::new(QueueConnection::new(Arc::new(topic.clone()), fast()));
    conn.connect();
    assert_eq!(conn.last_error(), None);

    topic.fail_next(FaultStage::Poll, 1);
    let err = conn.poll_tail().unwrap_err();
    assert!(err.to_string().contains("poll"));
    assert!(!conn.is_connected());
    assert!(conn.last_error().unwrap().contains("poll"));
    assert_eq!(topic.stats().handshakes, 1);

    conn.connect();
    assert!(conn.is_connected());
    assert_eq!(conn.last_error(), None);
    assert_eq!(topic.stats().handshakes, 2);
}
