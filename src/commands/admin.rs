//! Admin-tier commands: /announce and /restart.

use async_trait::async_trait;

use super::{CommandContext, CommandError, CommandHandler, CommandResult};
use crate::envelope::{MessageEnvelope, MessageType};

/// `/announce <message...>` - maintenance announcement to every room.
pub struct AnnounceHandler;

#[async_trait]
impl CommandHandler for AnnounceHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> CommandResult {
        let text = ctx.param(0).ok_or(CommandError::InvalidArgument {
            param: "message",
            reason: "required".to_string(),
        })?;
        let envelope = MessageEnvelope::server(
            MessageType::Maintenance,
            "",
            ctx.server_name,
            text.to_string(),
        );
        ctx.rooms.total_broadcast(&envelope).await;
        Ok(())
    }
}

/// `/restart` - tell every room the server is about to restart. The actual
/// restart is the supervisor's job; clients use this to reconnect politely.
pub struct RestartHandler;

#[async_trait]
impl CommandHandler for RestartHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> CommandResult {
        let envelope = MessageEnvelope::server(
            MessageType::Restart,
            "",
            ctx.server_name,
            "server restarting shortly".to_string(),
        );
        ctx.rooms.total_broadcast(&envelope).await;
        Ok(())
    }
}
