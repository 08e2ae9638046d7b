//! Per-identity rate limiting.
//!
//! Governor token buckets gate message floods and join storms, keyed by
//! lowercase username. Kick strikes are tracked alongside: an identity
//! kicked repeatedly is cooled down before it can rejoin.
//!
//! Entries are removed when the identity leaves its room; `cleanup()` bounds
//! growth for anything that slipped past that (lost leave notifications).

use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::debug;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Identity key (lowercase username).
type IdKey = String;

/// Rate limit configuration, loaded from the `[limits.rate]` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Messages per second per identity.
    #[serde(default = "default_message_rate")]
    pub message_rate_per_second: u32,
    /// Join burst per identity (sustained rate is 1/sec).
    #[serde(default = "default_join_burst")]
    pub join_burst_per_client: u32,
    /// Kick strikes before rejoin is gated.
    #[serde(default = "default_strike_limit")]
    pub kick_strike_limit: u32,
    /// Cooldown after hitting the strike limit, in seconds.
    #[serde(default = "default_strike_cooldown")]
    pub strike_cooldown_secs: u64,
}

fn default_message_rate() -> u32 {
    5
}
fn default_join_burst() -> u32 {
    3
}
fn default_strike_limit() -> u32 {
    3
}
fn default_strike_cooldown() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            message_rate_per_second: default_message_rate(),
            join_burst_per_client: default_join_burst(),
            kick_strike_limit: default_strike_limit(),
            strike_cooldown_secs: default_strike_cooldown(),
        }
    }
}

/// Per-identity strike state.
struct StrikeEntry {
    count: u32,
    last: Instant,
}

/// Thread-safe rate limit manager.
#[derive(Default)]
pub struct RateLimitManager {
    message_limiters: DashMap<IdKey, DirectRateLimiter>,
    join_limiters: DashMap<IdKey, DirectRateLimiter>,
    strikes: DashMap<IdKey, StrikeEntry>,
    config: RateLimitConfig,
}

impl RateLimitManager {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            message_limiters: DashMap::new(),
            join_limiters: DashMap::new(),
            strikes: DashMap::new(),
            config,
        }
    }

    /// Check whether an identity may send a message. Returns `false` when
    /// rate limited.
    pub fn check_message_rate(&self, key: &str) -> bool {
        let limiter = self.message_limiters.entry(key.to_string()).or_insert_with(|| {
            let rate =
                NonZeroU32::new(self.config.message_rate_per_second).unwrap_or(nonzero!(2u32));
            GovRateLimiter::direct(Quota::per_second(rate))
        });

        let allowed = limiter.check().is_ok();
        if !allowed {
            debug!(user = %key, "message rate limit exceeded");
            crate::metrics::rate_limited().inc();
        }
        allowed
    }

    /// Check whether an identity may join a room. Covers both the join-rate
    /// bucket and any active kick-strike cooldown.
    pub fn check_join(&self, key: &str) -> bool {
        if self.in_cooldown(key) {
            debug!(user = %key, "join blocked by kick-strike cooldown");
            crate::metrics::rate_limited().inc();
            return false;
        }

        let limiter = self.join_limiters.entry(key.to_string()).or_insert_with(|| {
            let burst = NonZeroU32::new(self.config.join_burst_per_client).unwrap_or(nonzero!(3u32));
            GovRateLimiter::direct(Quota::per_second(nonzero!(1u32)).allow_burst(burst))
        });

        let allowed = limiter.check().is_ok();
        if !allowed {
            debug!(user = %key, "join rate limit exceeded");
            crate::metrics::rate_limited().inc();
        }
        allowed
    }

    /// Record a kick strike against an identity.
    pub fn record_strike(&self, key: &str) {
        let mut entry = self.strikes.entry(key.to_string()).or_insert_with(|| StrikeEntry {
            count: 0,
            last: Instant::now(),
        });
        entry.count += 1;
        entry.last = Instant::now();
        debug!(user = %key, strikes = entry.count, "kick strike recorded");
    }

    fn in_cooldown(&self, key: &str) -> bool {
        let Some(entry) = self.strikes.get(key) else {
            return false;
        };
        if entry.count < self.config.kick_strike_limit {
            return false;
        }
        entry.last.elapsed() < Duration::from_secs(self.config.strike_cooldown_secs)
    }

    /// Drop all tracked state for an identity (called on leave).
    ///
    /// Strikes survive the leave: a kicked user leaving and rejoining is
    /// exactly the case the cooldown exists for.
    pub fn remove_entry(&self, key: &str) {
        self.message_limiters.remove(key);
        self.join_limiters.remove(key);
    }

    /// Bound memory growth from identities that never got a clean leave.
    pub fn cleanup(&self) {
        const MAX_ENTRIES: usize = 10_000;

        if self.message_limiters.len() > MAX_ENTRIES {
            self.message_limiters.clear();
            debug!("cleared message rate limiters (exceeded {} entries)", MAX_ENTRIES);
        }
        if self.join_limiters.len() > MAX_ENTRIES {
            self.join_limiters.clear();
            debug!("cleared join rate limiters (exceeded {} entries)", MAX_ENTRIES);
        }
        let cooldown = Duration::from_secs(self.config.strike_cooldown_secs);
        self.strikes.retain(|_, e| e.last.elapsed() < cooldown);
    }

    /// Tracked-entry counts, for tests and introspection.
    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            message_limiters: self.message_limiters.len(),
            join_limiters: self.join_limiters.len(),
            strikes: self.strikes.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitStats {
    pub message_limiters: usize,
    pub join_limiters: usize,
    pub strikes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            message_rate_per_second: 2,
            join_burst_per_client: 3,
            kick_strike_limit: 2,
            strike_cooldown_secs: 60,
        }
    }

    #[test]
    fn test_message_rate_limiting() {
        let manager = RateLimitManager::new(test_config());

        assert!(manager.check_message_rate("alice"));
        assert!(manager.check_message_rate("alice"));
        assert!(!manager.check_message_rate("alice"));
    }

    #[test]
    fn test_join_burst() {
        let manager = RateLimitManager::new(test_config());

        for _ in 0..3 {
            assert!(manager.check_join("alice"));
        }
        assert!(!manager.check_join("alice"));
    }

    #[test]
    fn test_strike_cooldown_gates_join() {
        let manager = RateLimitManager::new(test_config());

        manager.record_strike("mallory");
        assert!(manager.check_join("mallory"));
        manager.record_strike("mallory");
        assert!(!manager.check_join("mallory"));
    }

    #[test]
    fn test_remove_entry_keeps_strikes() {
        let manager = RateLimitManager::new(test_config());

        manager.check_message_rate("alice");
        manager.check_join("alice");
        manager.record_strike("alice");
        manager.remove_entry("alice");

        let stats = manager.stats();
        assert_eq!(stats.message_limiters, 0);
        assert_eq!(stats.join_limiters, 0);
        assert_eq!(stats.strikes, 1);
    }

    #[test]
    fn test_identities_independent() {
        let manager = RateLimitManager::new(test_config());

        manager.check_message_rate("alice");
        manager.check_message_rate("alice");
        assert!(!manager.check_message_rate("alice"));
        assert!(manager.check_message_rate("bob"));
    }
}
