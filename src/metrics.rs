//! Prometheus metrics for the chat engine.
//!
//! Exposed on the HTTP `/metrics` endpoint. Accessors lazily create and
//! register their metric, so recording works in tests without an explicit
//! `init()`; the binary calls `init()` once at startup to have every family
//! present from the first scrape.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

macro_rules! counter {
    ($fn_name:ident, $name:literal, $help:literal) => {
        pub fn $fn_name() -> &'static IntCounter {
            static METRIC: OnceLock<IntCounter> = OnceLock::new();
            METRIC.get_or_init(|| {
                let c = IntCounter::new($name, $help).expect("metric creation failed");
                let _ = registry().register(Box::new(c.clone()));
                c
            })
        }
    };
}

macro_rules! gauge {
    ($fn_name:ident, $name:literal, $help:literal) => {
        pub fn $fn_name() -> &'static IntGauge {
            static METRIC: OnceLock<IntGauge> = OnceLock::new();
            METRIC.get_or_init(|| {
                let g = IntGauge::new($name, $help).expect("metric creation failed");
                let _ = registry().register(Box::new(g.clone()));
                g
            })
        }
    };
}

counter!(messages_broadcast, "chat_messages_broadcast_total", "Messages broadcast to rooms");
counter!(broadcast_failures, "chat_broadcast_failures_total", "Per-member delivery failures during broadcast");
counter!(mentions, "chat_mentions_total", "Mentions detected in parseable messages");
counter!(rate_limited, "chat_rate_limited_total", "Rate limit hits");
counter!(history_flushes, "chat_history_flushes_total", "History flush passes that persisted entries");
counter!(zombies_swept, "chat_zombies_swept_total", "Closed connections removed by the sweep");
counter!(protocol_errors, "chat_protocol_errors_total", "Malformed or unknown-type frames");

gauge!(active_rooms, "chat_active_rooms", "Rooms with at least one member");
gauge!(connected_clients, "chat_connected_clients", "Currently connected clients");

/// Commands run by name.
pub fn commands() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        let c = IntCounterVec::new(
            Opts::new("chat_commands_total", "Chat commands run by name"),
            &["command"],
        )
        .expect("metric creation failed");
        let _ = registry().register(Box::new(c.clone()));
        c
    })
}

/// Force-create every metric family so the first scrape is complete.
pub fn init() {
    messages_broadcast();
    broadcast_failures();
    mentions();
    rate_limited();
    history_flushes();
    zombies_swept();
    protocol_errors();
    active_rooms();
    connected_clients();
    commands();
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
