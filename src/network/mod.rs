//! Network module.
//!
//! Contains the Gateway (WebSocket listener) and the per-connection task.

mod connection;
mod gateway;

pub use connection::handle_connection;
pub use gateway::Gateway;

use std::sync::Arc;

use crate::auth::TokenValidator;
use crate::commands::CommandRegistry;
use crate::dispatch::Dispatcher;
use crate::state::RoomRegistry;

/// Everything a connection task needs, bundled once at startup.
pub struct Shared {
    pub rooms: Arc<RoomRegistry>,
    pub dispatcher: Dispatcher,
    pub commands: CommandRegistry,
    pub validator: Arc<dyn TokenValidator>,
    pub server_name: String,
}
