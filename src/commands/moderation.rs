//! `/kick <username>` - remove a member from the room (TEACHER tier).

use async_trait::async_trait;
use tracing::info;

use super::{CommandContext, CommandError, CommandHandler, CommandResult};
use crate::envelope::{MessageEnvelope, MessageType};

pub struct KickHandler;

#[async_trait]
impl CommandHandler for KickHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> CommandResult {
        let target_name = ctx.param(0).ok_or(CommandError::InvalidArgument {
            param: "username",
            reason: "required".to_string(),
        })?;
        if target_name.eq_ignore_ascii_case(&ctx.invoker.username) {
            return Err(CommandError::InvalidArgument {
                param: "username",
                reason: "cannot kick yourself".to_string(),
            });
        }

        let room_id = &ctx.invoker.room_id;
        let target = ctx
            .rooms
            .member_identity(room_id, target_name)
            .await
            .ok_or_else(|| CommandError::InvalidArgument {
                param: "username",
                reason: format!("{target_name} is not in this room"),
            })?;
        let target_conn = ctx.rooms.member_connection(room_id, target_name).await;

        info!(room = %room_id, target = %target.username, by = %ctx.invoker.username, "kick");

        // Announce first so the target also sees it. The announcement is
        // ephemeral, like join/leave.
        let announce = MessageEnvelope::server(
            MessageType::TextMessage,
            room_id,
            ctx.server_name,
            format!(
                "{} was removed from the room by {}",
                target.username, ctx.invoker.username
            ),
        );
        ctx.rooms.broadcast(room_id, &announce, false, None).await;

        ctx.rooms.leave(&target).await;
        if let Some(conn) = target_conn {
            conn.close();
        }
        // Strikes accumulate; enough of them put the rejoin on cooldown.
        ctx.rooms.rate_limiter.record_strike(&target.key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_registry;
    use super::*;
    use crate::auth::Role;
    use crate::commands::CommandRegistry;
    use crate::state::ClientIdentity;
    use crate::transport::{ConnectionHandle, MpscHandle};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_kick_announces_removes_and_strikes() {
        let rooms = test_registry();
        let registry = CommandRegistry::new();
        let (a_conn, _a_rx) = MpscHandle::pair();
        let (b_conn, mut b_rx) = MpscHandle::pair();
        let alice = ClientIdentity::new("alice", "R1", 1);
        let bob = ClientIdentity::new("bob", "R1", 2);
        rooms.join(alice.clone(), a_conn.clone()).await;
        rooms.join(bob, b_conn.clone()).await;

        let conn: Arc<dyn ConnectionHandle> = a_conn;
        registry
            .invoke("kick", &["bob"], &alice, Role::Teacher, &conn, &rooms, "srv")
            .await
            .unwrap();

        let frame = b_rx.try_recv().unwrap();
        assert!(frame.contains("bob was removed from the room by alice"));
        assert!(!rooms.is_present("bob", "R1").await);
        assert!(!b_conn.is_open());
        assert_eq!(rooms.rate_limiter.stats().strikes, 1);
    }

    #[tokio::test]
    async fn test_self_kick_rejected() {
        let rooms = test_registry();
        let registry = CommandRegistry::new();
        let (a_conn, _a_rx) = MpscHandle::pair();
        let alice = ClientIdentity::new("alice", "R1", 1);
        rooms.join(alice.clone(), a_conn.clone()).await;

        let conn: Arc<dyn ConnectionHandle> = a_conn;
        let err = registry
            .invoke("kick", &["alice"], &alice, Role::Teacher, &conn, &rooms, "srv")
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument { .. }));
        assert!(rooms.is_present("alice", "R1").await);
    }
}
