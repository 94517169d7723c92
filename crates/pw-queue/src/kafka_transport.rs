//! Kafka-backed transport.
//!
//! The handshake loads cluster metadata and checks the topic exists; it is
//! the "client" stage of a connect. Consumers run without a consumer group:
//! nothing is committed, so every replay starts from the fallback offset and
//! replays never disturb each other.

use std::time::Duration;

use kafka::client::{FetchOffset, KafkaClient};
use kafka::consumer::Consumer;
use kafka::producer::{Producer, Record, RequiredAcks};

use crate::transport::{QueueConsumer, QueueError, QueueProducer, QueueSession, QueueTransport, StartOffset};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KafkaSettings {
    pub hosts: Vec<String>,
    pub topic: String,
    pub client_id: String,
    /// Upper bound a single fetch waits for new data.
    pub fetch_max_wait: Duration,
    pub ack_timeout: Duration,
}

impl KafkaSettings {
    pub fn new(hosts: Vec<String>, topic: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            hosts,
            topic: topic.into(),
            client_id: client_id.into(),
            fetch_max_wait: Duration::from_millis(100),
            ack_timeout: Duration::from_secs(1),
        }
    }
}

pub struct KafkaTransport {
    settings: KafkaSettings,
}

impl KafkaTransport {
    pub fn new(settings: KafkaSettings) -> Self {
        Self { settings }
    }
}

impl QueueTransport for KafkaTransport {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn handshake(&self) -> Result<Box<dyn QueueSession>, QueueError> {
        let mut client = KafkaClient::new(self.settings.hosts.clone());
        client
            .load_metadata_all()
            .map_err(|e| QueueError::Handshake(e.to_string()))?;
        if !client.topics().contains(&self.settings.topic) {
            return Err(QueueError::Handshake(format!(
                "topic {:?} not found on {:?}",
                self.settings.topic, self.settings.hosts
            )));
        }
        Ok(Box::new(KafkaSession {
            settings: self.settings.clone(),
            _metadata: client,
        }))
    }
}

struct KafkaSession {
    settings: KafkaSettings,
    _metadata: KafkaClient,
}

impl QueueSession for KafkaSession {
    fn open_consumer(&self, start: StartOffset) -> Result<Box<dyn QueueConsumer>, QueueError> {
        let fallback = match start {
            StartOffset::Earliest => FetchOffset::Earliest,
            StartOffset::Latest => FetchOffset::Latest,
        };
        let inner = Consumer::from_hosts(self.settings.hosts.clone())
            .with_topic(self.settings.topic.clone())
            .with_fallback_offset(fallback)
            .with_fetch_max_wait_time(self.settings.fetch_max_wait)
            .with_client_id(self.settings.client_id.clone())
            .create()
            .map_err(|e| QueueError::Consumer(e.to_string()))?;
        Ok(Box::new(KafkaConsumer { inner }))
    }

    fn open_producer(&self) -> Result<Box<dyn QueueProducer>, QueueError> {
        let inner = Producer::from_hosts(self.settings.hosts.clone())
            .with_ack_timeout(self.settings.ack_timeout)
            .with_required_acks(RequiredAcks::One)
            .with_client_id(self.settings.client_id.clone())
            .create()
            .map_err(|e| QueueError::Producer(e.to_string()))?;
        Ok(Box::new(KafkaProducer {
            inner,
            topic: self.settings.topic.clone(),
        }))
    }
}

struct KafkaConsumer {
    inner: Consumer,
}

impl QueueConsumer for KafkaConsumer {
    fn poll(&mut self) -> Result<Vec<Vec<u8>>, QueueError> {
        let sets = self
            .inner
            .poll()
            .map_err(|e| QueueError::Poll(e.to_string()))?;
        let mut out = Vec::new();
        for set in sets.iter() {
            out.extend(set.messages().iter().map(|m| m.value.to_vec()));
        }
        Ok(out)
    }
}

struct KafkaProducer {
    inner: Producer,
    topic: String,
}

impl QueueProducer for KafkaProducer {
    fn send(&mut self, payload: &[u8]) -> Result<(), QueueError> {
        self.inner
            .send(&Record::from_value(&self.topic, payload))
            .map_err(|e| QueueError::Send(e.to_string()))
    }
}
