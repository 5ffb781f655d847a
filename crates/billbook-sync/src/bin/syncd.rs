//! # billbook-syncd
//!
//! Headless sync daemon. Opens the local store, watches connectivity and
//! drains the sync queue until interrupted.
//!
//! ```text
//! engine.toml + BILLBOOK_* env
//!        │
//!        ▼
//! Database ──► PaymentEngine ──► SyncAgent (interval + backoff)
//!                   ▲
//! ConnectivityMonitor (GET /health)
//! ```
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=billbook=trace` - Show trace for billbook crates only
//! - Default: INFO level

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use billbook_db::{Database, DbConfig};
use billbook_sync::{
    ConnectivityMonitor, ConnectivityOracle, EngineConfig, HttpRemoteStore, MemoryRemoteStore,
    PaymentEngine, RemoteStore, SyncAgent, TracingEmitter,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,billbook=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = EngineConfig::load(None)?;
    info!(
        device_id = %config.device_id(),
        remote = config.remote_url().unwrap_or("<none>"),
        offline = !config.is_sync_enabled(),
        "Configuration loaded"
    );

    let db_path = config.database_path();
    let db = Database::new(DbConfig::new(db_path.clone())).await?;
    info!(path = %db_path.display(), "Local store open");

    let remote: Arc<dyn RemoteStore> = match config.remote_url() {
        Some(_) => Arc::new(HttpRemoteStore::from_config(&config)?),
        None => {
            warn!("No remote store configured, running offline");
            Arc::new(MemoryRemoteStore::new())
        }
    };

    let oracle = if config.is_sync_enabled() {
        ConnectivityOracle::new(false)
    } else {
        ConnectivityOracle::forced_offline()
    };

    let (monitor, monitor_handle) =
        ConnectivityMonitor::new(oracle.clone(), remote.clone(), config.probe_interval());
    if config.is_sync_enabled() {
        monitor.probe().await;
    }
    tokio::spawn(monitor.run());

    let emitter = Arc::new(TracingEmitter);
    let engine = PaymentEngine::builder(db.clone(), remote)
        .with_config(&config)
        .with_connectivity(oracle)
        .with_emitter(emitter.clone())
        .build();

    let review = engine.payments_needing_review().await?;
    if !review.is_empty() {
        warn!(count = review.len(), "Payments refused by the remote store need review");
    }

    let mut agent = SyncAgent::with_emitter(engine, &config, emitter);
    agent.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    agent.shutdown().await?;
    if let Err(e) = monitor_handle.shutdown().await {
        error!(error = %e, "Failed to stop connectivity monitor");
    }
    db.close().await;

    Ok(())
}
