//! Scrape endpoint for the chat engine's metrics.
//!
//! A small axum app on its own task: `GET /metrics` renders the room,
//! broadcast, mention, and rate-limit counters in Prometheus text format.

use axum::{Router, routing::get};
use std::net::SocketAddr;
use tracing::{error, info};

async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Serve `/metrics` on `0.0.0.0:port` until the process exits.
///
/// Spawn it in the background. A bind failure is logged and the endpoint
/// stays off; the chat engine keeps running either way.
pub async fn run_http_server(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "metrics endpoint failed to bind; scraping disabled");
            return;
        }
    };
    info!(%addr, "metrics endpoint listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "metrics endpoint terminated");
    }
}
