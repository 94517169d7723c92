use std::time::Duration;

use pw_schemas::{EventIdentity, EventKind, KindCounts};
use serde_json::Value;
use tracing::debug;

use crate::contract;
use crate::{StatsSource, StorageSource, UpstreamError};

const STATS: &str = "stats";
const STORAGE: &str = "storage";

fn client(collaborator: &'static str, timeout: Duration) -> Result<reqwest::Client, UpstreamError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| UpstreamError::Transport {
            collaborator,
            message: e.to_string(),
        })
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

async fn get_json(
    http: &reqwest::Client,
    collaborator: &'static str,
    url: String,
) -> Result<Value, UpstreamError> {
    debug!(collaborator, %url, "upstream request");
    let resp = http
        .get(&url)
        .send()
        .await
        .map_err(|e| UpstreamError::Transport {
            collaborator,
            message: e.to_string(),
        })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(UpstreamError::Status {
            collaborator,
            url,
            status: status.as_u16(),
        });
    }

    resp.json::<Value>()
        .await
        .map_err(|e| UpstreamError::Decode {
            collaborator,
            message: e.to_string(),
        })
}

fn contract_err(collaborator: &'static str) -> impl FnOnce(String) -> UpstreamError {
    move |message| UpstreamError::Contract {
        collaborator,
        message,
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpStats {
    http: reqwest::Client,
    base_url: String,
}

impl HttpStats {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        Ok(Self {
            http: client(STATS, timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait::async_trait]
impl StatsSource for HttpStats {
    fn name(&self) -> &'static str {
        STATS
    }

    async fn aggregator_counts(&self) -> Result<KindCounts, UpstreamError> {
        let body = get_json(&self.http, STATS, join(&self.base_url, "statistics")).await?;
        contract::parse_stats(&body).map_err(contract_err(STATS))
    }
}

// ---------------------------------------------------------------------------
// Durable store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpStorage {
    http: reqwest::Client,
    base_url: String,
}

impl HttpStorage {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        Ok(Self {
            http: client(STORAGE, timeout)?,
            base_url: base_url.into(),
        })
    }

    fn ids_path(kind: EventKind) -> &'static str {
        match kind {
            EventKind::RaceEvent => "event_ids",
            EventKind::Telemetry => "telemetry_ids",
        }
    }
}

#[async_trait::async_trait]
impl StorageSource for HttpStorage {
    fn name(&self) -> &'static str {
        STORAGE
    }

    async fn identities(&self, kind: EventKind) -> Result<Vec<EventIdentity>, UpstreamError> {
        let url = join(&self.base_url, Self::ids_path(kind));
        let body = get_json(&self.http, STORAGE, url).await?;
        contract::parse_identities(kind, &body).map_err(contract_err(STORAGE))
    }

    async fn record_counts(&self) -> Result<KindCounts, UpstreamError> {
        let body = get_json(&self.http, STORAGE, join(&self.base_url, "record_count")).await?;
        contract::parse_record_counts(&body).map_err(contract_err(STORAGE))
    }
}
