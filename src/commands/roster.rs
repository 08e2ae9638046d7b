//! Presence commands: /away, /back, /mode, /active.

use async_trait::async_trait;
use tracing::warn;

use super::{CommandContext, CommandError, CommandHandler, CommandResult};
use crate::envelope::{MessageEnvelope, MessageType};
use crate::state::Presence;

/// Build the ACTIVE_USERS envelope for a room. Content is a JSON array of
/// usernames, case-insensitively sorted.
pub(super) async fn active_users_envelope(
    ctx: &CommandContext<'_>,
    room_id: &str,
) -> MessageEnvelope {
    let names = ctx.rooms.list_active_usernames(room_id).await;
    let content = serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string());
    MessageEnvelope::server(MessageType::ActiveUsers, room_id, ctx.server_name, content)
}

/// Send a private envelope back to the invoker. Transport failures are
/// logged, never propagated; a dead socket is the sweep's problem.
pub(super) async fn private_reply(ctx: &CommandContext<'_>, envelope: &MessageEnvelope) {
    if let Err(e) = ctx.conn.send(&envelope.to_json()).await {
        warn!(user = %ctx.invoker.username, error = %e, "private reply failed");
    }
}

async fn set_presence_and_announce(ctx: &CommandContext<'_>, state: Presence) -> CommandResult {
    ctx.rooms.set_presence(ctx.invoker, state).await;
    let announce = active_users_envelope(ctx, &ctx.invoker.room_id).await;
    ctx.rooms
        .broadcast(&ctx.invoker.room_id, &announce, false, None)
        .await;
    Ok(())
}

/// `/away` - mark the invoker away and re-announce the active-user list.
pub struct AwayHandler;

#[async_trait]
impl CommandHandler for AwayHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> CommandResult {
        set_presence_and_announce(ctx, Presence::Away).await
    }
}

/// `/back` - return from away.
pub struct BackHandler;

#[async_trait]
impl CommandHandler for BackHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> CommandResult {
        set_presence_and_announce(ctx, Presence::Active).await
    }
}

/// `/mode <state>` - explicit presence set, `away` or `active`.
pub struct ModeHandler;

#[async_trait]
impl CommandHandler for ModeHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> CommandResult {
        let state = match ctx.param(0) {
            Some(s) if s.eq_ignore_ascii_case("away") => Presence::Away,
            Some(s) if s.eq_ignore_ascii_case("active") => Presence::Active,
            Some(other) => {
                return Err(CommandError::InvalidArgument {
                    param: "state",
                    reason: format!("expected away or active, got {other}"),
                });
            }
            None => {
                return Err(CommandError::InvalidArgument {
                    param: "state",
                    reason: "required".to_string(),
                });
            }
        };
        set_presence_and_announce(ctx, state).await
    }
}

/// `/active` - private active-user listing for the invoker only.
pub struct ActiveHandler;

#[async_trait]
impl CommandHandler for ActiveHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> CommandResult {
        let reply = active_users_envelope(ctx, &ctx.invoker.room_id).await;
        private_reply(ctx, &reply).await;
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
    async fn test_away_reannounces_active_users() {
        let rooms = test_registry();
        let registry = CommandRegistry::new();
        let (a_conn, mut a_rx) = MpscHandle::pair();
        let (b_conn, mut b_rx) = MpscHandle::pair();
        let alice = ClientIdentity::new("alice", "R1", 1);
        let bob = ClientIdentity::new("bob", "R1", 2);
        rooms.join(alice.clone(), a_conn.clone()).await;
        rooms.join(bob, b_conn).await;

        let conn: Arc<dyn ConnectionHandle> = a_conn;
        registry
            .invoke("away", &[], &alice, Role::Student, &conn, &rooms, "srv")
            .await
            .unwrap();

        // Both members receive the refreshed list, alice no longer in it.
        let frame = b_rx.try_recv().unwrap();
        assert!(frame.contains("ACTIVE_USERS"));
        assert!(frame.contains("bob"));
        assert!(!frame.contains("alice"));
        assert!(a_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_mode_rejects_unknown_state() {
        let rooms = test_registry();
        let registry = CommandRegistry::new();
        let (a_conn, _a_rx) = MpscHandle::pair();
        let alice = ClientIdentity::new("alice", "R1", 1);
        rooms.join(alice.clone(), a_conn.clone()).await;

        let conn: Arc<dyn ConnectionHandle> = a_conn;
        let err = registry
            .invoke("mode", &["busy"], &alice, Role::Student, &conn, &rooms, "srv")
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument { param: "state", .. }));
    }

    #[tokio::test]
    async fn test_active_reply_is_private() {
        let rooms = test_registry();
        let registry = CommandRegistry::new();
        let (a_conn, mut a_rx) = MpscHandle::pair();
        let (b_conn, mut b_rx) = MpscHandle::pair();
        let alice = ClientIdentity::new("alice", "R1", 1);
        let bob = ClientIdentity::new("bob", "R1", 2);
        rooms.join(alice.clone(), a_conn.clone()).await;
        rooms.join(bob, b_conn).await;

        let conn: Arc<dyn ConnectionHandle> = a_conn;
        registry
            .invoke("active", &[], &alice, Role::Student, &conn, &rooms, "srv")
            .await
            .unwrap();

        assert!(a_rx.try_recv().unwrap().contains("ACTIVE_USERS"));
        assert!(b_rx.try_recv().is_err());
    }
}
