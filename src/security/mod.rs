//! Abuse defense for the chat engine.
//!
//! Rate limiting gates runaway clients (message floods, join storms) and
//! tracks kick strikes used to cool down disruptive identities.

pub mod rate_limit;

pub use rate_limit::{RateLimitConfig, RateLimitManager};
