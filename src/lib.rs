//! campusd - real-time chat room engine for a student chat backend.
//!
//! Clients connect over WebSocket, bind an identity from a signed token,
//! and exchange typed JSON envelopes within rooms: broadcast relay,
//! in-band `/commands` with role tiers, mention notices, and paginated
//! history served from a cached append-only per-room log.

pub mod auth;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod history;
pub mod http;
pub mod maintenance;
pub mod metrics;
pub mod network;
pub mod security;
pub mod state;
pub mod transport;
