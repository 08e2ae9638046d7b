//! Typed message dispatch.
//!
//! The dispatcher owns a static mapping from envelope type tag to handler,
//! built once at startup. Dispatch never panics on bad input: a malformed
//! envelope or unrecognized tag degrades to an ERROR_MESSAGE sent only to
//! the originating connection.

mod query;
mod relay;
mod session;

pub use query::{ActiveUsersHandler, GetHistoryHandler, PingHandler};
pub use relay::{ParseableHandler, RelayHandler};
pub use session::{JoinHandler, LeaveHandler};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::Role;
use crate::commands::CommandRegistry;
use crate::envelope::{MessageEnvelope, MessageType};
use crate::error::{DispatchError, DispatchResult};
use crate::state::{ClientIdentity, RoomRegistry};
use crate::transport::ConnectionHandle;

/// Per-message handling context: who sent it, over what, into which state.
pub struct Context<'a> {
    /// The sending client, bound at connection time.
    pub identity: &'a ClientIdentity,
    /// Role from the validated token, never from message content.
    pub role: Role,
    /// The sender's connection, for private replies.
    pub conn: &'a Arc<dyn ConnectionHandle>,
    /// Shared engine state.
    pub rooms: &'a Arc<RoomRegistry>,
    /// Command registry for parseable bodies.
    pub commands: &'a CommandRegistry,
    /// Server name stamped on server-originated messages.
    pub server_name: &'a str,
}

/// Trait implemented by all message-type handlers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &Context<'_>, envelope: &MessageEnvelope) -> DispatchResult;
}

/// Registry of message handlers, keyed by envelope type tag.
pub struct Dispatcher {
    handlers: HashMap<MessageType, Box<dyn MessageHandler>>,
}

impl Dispatcher {
    /// Create a new dispatcher with all inbound types registered.
    ///
    /// RESTART, MAINTENANCE and ERROR_MESSAGE are server-originated only;
    /// leaving them unregistered makes a client sending one an unknown-type
    /// protocol error.
    pub fn new() -> Self {
        let mut handlers: HashMap<MessageType, Box<dyn MessageHandler>> = HashMap::new();

        handlers.insert(MessageType::UserJoined, Box::new(JoinHandler));
        handlers.insert(MessageType::UserLeft, Box::new(LeaveHandler));

        // Generic relayed media share one behavior.
        for t in [
            MessageType::TextMessage,
            MessageType::ImageMessage,
            MessageType::AudioMessage,
            MessageType::VideoMessage,
            MessageType::PdfMessage,
            MessageType::TextDocMessage,
            MessageType::UserTyping,
            MessageType::UserStoppedTyping,
        ] {
            handlers.insert(t, Box::new(RelayHandler));
        }
        handlers.insert(MessageType::ParseableMessage, Box::new(ParseableHandler));

        handlers.insert(MessageType::GetHistory, Box::new(GetHistoryHandler));
        handlers.insert(MessageType::Ping, Box::new(PingHandler));
        handlers.insert(MessageType::Pong, Box::new(PingHandler));
        handlers.insert(MessageType::ActiveUsers, Box::new(ActiveUsersHandler));

        Self { handlers }
    }

    /// Handle one raw inbound frame end to end.
    ///
    /// All errors terminate here: they are logged, counted, and turned into
    /// a private error reply where one is warranted. Nothing propagates to
    /// the connection loop.
    pub async fn dispatch(&self, ctx: &Context<'_>, raw: &str) {
        let room_id = ctx.identity.room_id.clone();
        if let Err(e) = self.dispatch_inner(ctx, raw).await {
            debug!(
                user = %ctx.identity.username,
                room = %room_id,
                code = e.error_code(),
                error = %e,
                "dispatch failed"
            );
            if matches!(e, DispatchError::Protocol(_) | DispatchError::UnknownType(_)) {
                crate::metrics::protocol_errors().inc();
            }
            if let Some(reply) = e.to_error_reply(&room_id) {
                if let Err(send_err) = ctx.conn.send(&reply.to_json()).await {
                    warn!(user = %ctx.identity.username, error = %send_err, "error reply undeliverable");
                }
            }
        }
    }

    async fn dispatch_inner(&self, ctx: &Context<'_>, raw: &str) -> DispatchResult {
        let envelope = MessageEnvelope::parse(raw)?;
        let tag = envelope.headers.message_type;
        let handler = self
            .handlers
            .get(&tag)
            .ok_or_else(|| DispatchError::UnknownType(format!("{tag:?}")))?;
        handler.handle(ctx, &envelope).await
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
