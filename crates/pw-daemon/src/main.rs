//! pw-daemon entry point.
//!
//! Loads config, sets up tracing, wires the services, starts the background
//! jobs and serves HTTP. Route handlers live in `routes.rs`; shared state and
//! jobs in `state.rs`; service construction in `wiring.rs`.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use pw_config::{
    load_layered_yaml, load_layered_yaml_from_strings, report_unused_keys, ServiceConfig,
    UnusedKeyPolicy,
};
use pw_daemon::{routes, state, wiring};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "pw-daemon", about = "Queue/store reconciliation and anomaly service")]
struct Args {
    /// YAML config layers, merged in order (later overrides earlier).
    #[arg(long = "config", env = "PITWALL_CONFIG", value_delimiter = ',')]
    config: Vec<PathBuf>,

    /// Listen address; overrides `server.bind`.
    #[arg(long, env = "PITWALL_BIND")]
    bind: Option<SocketAddr>,

    /// Refuse to start when the config carries keys the service never reads.
    #[arg(long)]
    strict_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();
    let args = Args::parse();

    let loaded = if args.config.is_empty() {
        load_layered_yaml_from_strings(&["{}"])?
    } else {
        load_layered_yaml(&args.config)?
    };
    let policy = if args.strict_config {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let unused = report_unused_keys(&loaded.config_json, policy)?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "config carries unused keys");
    }

    let mut cfg = ServiceConfig::from_loaded(&loaded)?;
    cfg.apply_env_overrides(|k| std::env::var(k).ok())?;
    info!(
        config_hash = %loaded.config_hash,
        topic = %cfg.queue.topic,
        min_speed = cfg.anomaly.min_speed,
        max_lap_count = cfg.anomaly.max_lap_count,
        "config loaded"
    );

    let components = wiring::build_components(&cfg, wiring::kafka_transport(&cfg))?;
    let shared = Arc::new(state::AppState::new(components, loaded.config_hash.clone()));

    // The connect loop blocks until the broker answers; the server and the
    // jobs start regardless and fail their passes until it does.
    state::spawn_queue_connect(Arc::clone(&shared.queue));
    state::spawn_queue_tail(Arc::clone(&shared), Duration::from_secs(1));
    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_reconcile_tick(Arc::clone(&shared), cfg.reconcile_interval());
    state::spawn_anomaly_tick(Arc::clone(&shared), cfg.anomaly_interval());

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = match args.bind {
        Some(a) => a,
        None => cfg
            .server
            .bind
            .parse()
            .with_context(|| format!("server.bind {:?} is not host:port", cfg.server.bind))?,
    };
    info!("pw-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
