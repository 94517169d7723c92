//! Build the daemon's services from a validated [`ServiceConfig`].

use std::sync::Arc;

use anyhow::{Context, Result};
use pw_anomaly::{AnomalyDetector, AnomalyRules};
use pw_config::ServiceConfig;
use pw_queue::{Backoff, KafkaSettings, KafkaTransport, QueueConnection, QueueTransport};
use pw_reconcile::ReconciliationEngine;
use pw_scan::{IdentityScanner, ReplayIdentityScanner};
use pw_store::ReportStore;
use pw_upstream::{HttpStats, HttpStorage, StatsSource, StorageSource};

use crate::state::Components;

/// Kafka transport for the configured brokers and topic.
pub fn kafka_transport(cfg: &ServiceConfig) -> Arc<dyn QueueTransport> {
    Arc::new(KafkaTransport::new(KafkaSettings::new(
        cfg.queue.hosts.clone(),
        cfg.queue.topic.clone(),
        cfg.queue.client_id.clone(),
    )))
}

/// Wire everything over the given transport and the HTTP collaborators
/// named in `cfg.endpoints`.
pub fn build_components(
    cfg: &ServiceConfig,
    transport: Arc<dyn QueueTransport>,
) -> Result<Components> {
    let stats: Arc<dyn StatsSource> = Arc::new(
        HttpStats::new(cfg.endpoints.stats.clone(), cfg.http_timeout())
            .context("stats client")?,
    );
    let storage: Arc<dyn StorageSource> = Arc::new(
        HttpStorage::new(cfg.endpoints.storage.clone(), cfg.http_timeout())
            .context("storage client")?,
    );
    Ok(build_with_sources(cfg, transport, stats, storage))
}

/// Same as [`build_components`] with the collaborators supplied by the
/// caller.
pub fn build_with_sources(
    cfg: &ServiceConfig,
    transport: Arc<dyn QueueTransport>,
    stats: Arc<dyn StatsSource>,
    storage: Arc<dyn StorageSource>,
) -> Components {
    let backoff = Backoff::from_millis(cfg.queue.backoff_min_ms, cfg.queue.backoff_max_ms);
    let queue = Arc::new(QueueConnection::new(transport, backoff));

    let scanner: Arc<dyn IdentityScanner> = Arc::new(ReplayIdentityScanner::new(
        Arc::clone(&queue),
        cfg.replay_idle_timeout(),
    ));

    let reconciler = Arc::new(ReconciliationEngine::new(
        stats,
        storage,
        Arc::clone(&scanner),
        ReportStore::new(cfg.datastore.consistency_file.clone()),
    ));

    let detector = Arc::new(AnomalyDetector::new(
        Arc::clone(&queue),
        AnomalyRules::new(cfg.anomaly.min_speed, cfg.anomaly.max_lap_count),
        cfg.replay_idle_timeout(),
        ReportStore::new(cfg.datastore.anomaly_file.clone()),
    ));

    Components {
        queue,
        scanner,
        reconciler,
        detector,
    }
}
