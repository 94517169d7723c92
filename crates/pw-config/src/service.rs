//! Typed view of the merged configuration document.
//!
//! Every key has a default so an empty document yields a runnable local
//! config. `validate` rejects values that would make a job misbehave rather
//! than fail loudly (inverted backoff window, zero intervals).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::LoadedConfig;

/// Environment variables that override anomaly thresholds.
pub const ENV_MIN_SPEED: &str = "MIN_SPEED";
pub const ENV_MAX_LAP_COUNT: &str = "MAX_LAP_COUNT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub queue: QueueSection,
    pub endpoints: EndpointsSection,
    pub datastore: DatastoreSection,
    pub scheduler: SchedulerSection,
    pub anomaly: AnomalySection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Bootstrap brokers as `host:port`.
    pub hosts: Vec<String>,
    pub topic: String,
    pub client_id: String,
    /// Replay stops after this long without a new message.
    pub replay_idle_timeout_ms: u64,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost:9092".to_string()],
            topic: "events".to_string(),
            client_id: "pitwall".to_string(),
            replay_idle_timeout_ms: 1_000,
            backoff_min_ms: 500,
            backoff_max_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsSection {
    /// Base URL of the aggregator (processing) service.
    pub stats: String,
    /// Base URL of the storage service.
    pub storage: String,
    /// Per-request timeout for both collaborators.
    pub timeout_ms: u64,
}

impl Default for EndpointsSection {
    fn default() -> Self {
        Self {
            stats: "http://localhost:8091/processing".to_string(),
            storage: "http://localhost:8090/storage".to_string(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreSection {
    pub consistency_file: PathBuf,
    pub anomaly_file: PathBuf,
}

impl Default for DatastoreSection {
    fn default() -> Self {
        Self {
            consistency_file: PathBuf::from("data/consistency.json"),
            anomaly_file: PathBuf::from("data/anomalies.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub reconcile_interval_secs: u64,
    pub anomaly_interval_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 60,
            anomaly_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalySection {
    /// Telemetry with `speed` strictly below this is flagged.
    pub min_speed: f64,
    /// Race events with `lap_number` strictly above this are flagged.
    pub max_lap_count: i64,
}

impl Default for AnomalySection {
    fn default() -> Self {
        Self {
            min_speed: 0.0,
            max_lap_count: 78,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8110".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Decode and validate a merged document.
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        let cfg: ServiceConfig = serde_json::from_value(loaded.config_json.clone())
            .context("config does not match the service schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.hosts.is_empty() {
            bail!("CONFIG_INVALID: queue.hosts must name at least one broker");
        }
        if self.queue.topic.trim().is_empty() {
            bail!("CONFIG_INVALID: queue.topic must not be empty");
        }
        if self.queue.backoff_min_ms > self.queue.backoff_max_ms {
            bail!(
                "CONFIG_INVALID: queue.backoff_min_ms ({}) exceeds queue.backoff_max_ms ({})",
                self.queue.backoff_min_ms,
                self.queue.backoff_max_ms
            );
        }
        if self.queue.replay_idle_timeout_ms == 0 {
            bail!("CONFIG_INVALID: queue.replay_idle_timeout_ms must be > 0");
        }
        if self.scheduler.reconcile_interval_secs == 0 || self.scheduler.anomaly_interval_secs == 0
        {
            bail!("CONFIG_INVALID: scheduler intervals must be > 0");
        }
        if !self.anomaly.min_speed.is_finite() {
            bail!("CONFIG_INVALID: anomaly.min_speed must be finite");
        }
        Ok(())
    }

    /// Apply `MIN_SPEED` / `MAX_LAP_COUNT` overrides.
    ///
    /// `lookup` is injected so tests do not touch the process environment;
    /// production passes `|k| std::env::var(k).ok()`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MIN_SPEED) {
            self.anomaly.min_speed = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MIN_SPEED}={raw:?} is not a number"))?;
        }
        if let Some(raw) = lookup(ENV_MAX_LAP_COUNT) {
            self.anomaly.max_lap_count = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_LAP_COUNT}={raw:?} is not an integer"))?;
        }
        self.validate()
    }

    pub fn replay_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.queue.replay_idle_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.endpoints.timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.reconcile_interval_secs)
    }

    pub fn anomaly_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.anomaly_interval_secs)
    }
}
