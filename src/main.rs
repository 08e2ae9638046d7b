//! campusd - real-time chat room engine for a student chat backend.

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use campusd::auth::HmacTokenValidator;
use campusd::commands::CommandRegistry;
use campusd::config::{Config, HistoryBackend};
use campusd::dispatch::Dispatcher;
use campusd::history::{BlobStore, HistoryStore, MemoryBlobStore, RedbBlobStore};
use campusd::maintenance;
use campusd::network::{Gateway, Shared};
use campusd::security::RateLimitManager;
use campusd::state::RoomRegistry;
use campusd::{http, metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "failed to load config");
        e
    })?;

    info!(server = %config.server.name, "starting campusd");

    // Durable history backend
    let blob_store: Arc<dyn BlobStore> = match config.history.backend {
        HistoryBackend::Redb => {
            info!(path = %config.history.path, "initializing redb history backend");
            Arc::new(RedbBlobStore::new(&config.history.path)?)
        }
        HistoryBackend::Memory => {
            info!("history backend is in-memory only");
            Arc::new(MemoryBlobStore::new())
        }
    };
    let history = Arc::new(HistoryStore::new(
        blob_store,
        config.limits.history_cache_entries,
        config.limits.history_page_size,
    ));

    let rate_limiter = Arc::new(RateLimitManager::new(config.limits.rate.clone()));
    let rooms = Arc::new(RoomRegistry::new(Arc::clone(&history), rate_limiter));

    // Prometheus metrics are optional; no port means no endpoint.
    if let Some(metrics_port) = config.server.metrics_port {
        metrics::init();
        tokio::spawn(async move {
            http::run_http_server(metrics_port).await;
        });
        info!(port = metrics_port, "prometheus http server started");
    }

    // Background jobs
    maintenance::spawn_flush_task(Arc::clone(&rooms), config.maintenance.flush_interval_secs);
    maintenance::spawn_zombie_sweep(Arc::clone(&rooms), config.maintenance.sweep_interval_secs);

    let shared = Arc::new(Shared {
        rooms: Arc::clone(&rooms),
        dispatcher: Dispatcher::new(),
        commands: CommandRegistry::new(),
        validator: Arc::new(HmacTokenValidator::new(&config.auth.token_secret)),
        server_name: config.server.name.clone(),
    });

    let gateway = Gateway::bind(config.listen.address, shared).await?;

    tokio::select! {
        result = gateway.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Flush everything we still hold before exiting.
    let (rooms_flushed, entries, failed) = history.flush_all().await;
    info!(rooms_flushed, entries, failed, "final history flush");
    Ok(())
}
