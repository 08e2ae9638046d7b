//! Periodic background jobs.
//!
//! Two independent schedules run against the registry: a history flush to
//! bound data loss on crash, and a zombie sweep for members whose leave
//! notification was lost. Each iterates all rooms and tolerates rooms
//! disappearing mid-pass.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::RoomRegistry;

/// Flush every room's history log to durable storage on a fixed interval.
pub fn spawn_flush_task(rooms: Arc<RoomRegistry>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            let (rooms_flushed, entries, failed) = rooms.history.flush_all().await;
            crate::metrics::history_flushes().inc();
            if failed > 0 {
                // Caches are retained on failure; the next tick retries.
                warn!(rooms_flushed, entries, failed, "history flush completed with failures");
            } else {
                debug!(rooms_flushed, entries, "history flush completed");
            }
        }
    })
}

/// Sweep closed connections out of every room, and let the rate limiter
/// shed stale entries while we're at it.
pub fn spawn_zombie_sweep(rooms: Arc<RoomRegistry>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let swept = rooms.sweep_zombies().await;
            if swept > 0 {
                info!(swept, "zombie sweep removed stale members");
            }
            rooms.rate_limiter.cleanup();
        }
    })
}
