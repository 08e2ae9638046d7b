//! Membership handlers: USER_JOINED and USER_LEFT.
//!
//! Announcements are ephemeral: never persisted, so history never replays
//! them (the history layer additionally filters a requester's own, in case
//! an older log carries them).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{Context, MessageHandler};
use crate::envelope::{MessageEnvelope, MessageType};
use crate::error::{DispatchError, DispatchResult};

/// USER_JOINED: admit the sender into its room and tell the others.
pub struct JoinHandler;

#[async_trait]
impl MessageHandler for JoinHandler {
    async fn handle(&self, ctx: &Context<'_>, _envelope: &MessageEnvelope) -> DispatchResult {
        if !ctx.rooms.rate_limiter.check_join(&ctx.identity.key()) {
            return Err(DispatchError::JoinRefused(
                "too many joins, slow down".to_string(),
            ));
        }

        ctx.rooms
            .join(ctx.identity.clone(), Arc::clone(ctx.conn))
            .await;
        info!(room = %ctx.identity.room_id, user = %ctx.identity.username, "joined");

        let announce = MessageEnvelope::server(
            MessageType::UserJoined,
            &ctx.identity.room_id,
            ctx.server_name,
            format!("{} has joined", ctx.identity.username),
        );
        ctx.rooms
            .broadcast(&ctx.identity.room_id, &announce, false, Some(ctx.identity))
            .await;
        Ok(())
    }
}

/// USER_LEFT: announce to the whole room, then remove the sender.
///
/// The announcement goes out first and unconditionally, so the leaver gets
/// its own confirmation.
pub struct LeaveHandler;

#[async_trait]
impl MessageHandler for LeaveHandler {
    async fn handle(&self, ctx: &Context<'_>, _envelope: &MessageEnvelope) -> DispatchResult {
        let announce = MessageEnvelope::server(
            MessageType::UserLeft,
            &ctx.identity.room_id,
            ctx.server_name,
            format!("{} has left", ctx.identity.username),
        );
        ctx.rooms
            .broadcast(&ctx.identity.room_id, &announce, false, None)
            .await;

        ctx.rooms.leave(ctx.identity).await;
        info!(room = %ctx.identity.room_id, user = %ctx.identity.username, "left");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Harness;
    use crate::auth::Role;
    use crate::envelope::{MessageEnvelope, MessageType};

    #[tokio::test]
    async fn test_join_announces_to_others_only() {
        let h = Harness::new();
        let (_alice, _a_conn, mut a_rx) = h.join("alice", "R1", Role::Student).await;
        let (_bob, _b_conn, mut b_rx) = h.join("bob", "R1", Role::Student).await;

        let frame = a_rx.try_recv().unwrap();
        assert!(frame.contains("USER_JOINED"));
        assert!(frame.contains("bob has joined"));
        // The joiner itself hears nothing.
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_announcement_not_persisted() {
        let h = Harness::new();
        let (_alice, _a_conn, _a_rx) = h.join("alice", "R1", Role::Student).await;
        let page = h.rooms.history.get_page("R1", "bob", 0).await.unwrap();
        assert!(page.entries.is_empty());
    }

    #[tokio::test]
    async fn test_join_burst_refused() {
        let h = Harness::new();
        let (alice, conn, mut rx) = h.join("alice", "R1", Role::Student).await;
        let frame = MessageEnvelope::server(MessageType::UserJoined, "R1", "alice", String::new())
            .to_json();
        // Default burst allows 3; hammer well past it.
        for _ in 0..6 {
            h.dispatch(&alice, Role::Student, &conn, &frame).await;
        }
        let mut refused = false;
        while let Ok(f) = rx.try_recv() {
            refused |= f.contains("join refused");
        }
        assert!(refused);
    }
}
