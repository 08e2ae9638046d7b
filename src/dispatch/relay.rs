//! Generic and parseable message relay.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Context, MessageHandler};
use crate::envelope::{MessageEnvelope, MessageType};
use crate::error::{DispatchError, DispatchResult};

/// Shared relay path for text, media, and typing indicators.
///
/// Redacts `sessionId`/`authToken`, stamps a fresh server timestamp, and
/// broadcasts to the room excluding the sender. Persistence follows the
/// concrete type.
pub struct RelayHandler;

pub(super) async fn relay(ctx: &Context<'_>, envelope: &MessageEnvelope) -> DispatchResult {
    let room_id = &ctx.identity.room_id;
    if !ctx.rooms.is_present(&ctx.identity.username, room_id).await {
        return Err(DispatchError::NotAMember(room_id.clone()));
    }
    if !ctx.rooms.rate_limiter.check_message_rate(&ctx.identity.key()) {
        return Err(DispatchError::RateLimited);
    }

    let outbound = envelope.redacted();
    ctx.rooms
        .broadcast(
            room_id,
            &outbound,
            outbound.headers.message_type.persists(),
            Some(ctx.identity),
        )
        .await;
    Ok(())
}

#[async_trait]
impl MessageHandler for RelayHandler {
    async fn handle(&self, ctx: &Context<'_>, envelope: &MessageEnvelope) -> DispatchResult {
        relay(ctx, envelope).await
    }
}

/// PARSEABLE_MESSAGE: relay first, then scan for mentions and commands.
///
/// Scanning runs strictly after the broadcast so a scan failure can never
/// block delivery. Scan-side errors surface only to the invoker.
pub struct ParseableHandler;

#[async_trait]
impl MessageHandler for ParseableHandler {
    async fn handle(&self, ctx: &Context<'_>, envelope: &MessageEnvelope) -> DispatchResult {
        relay(ctx, envelope).await?;

        let content = match envelope.text_content() {
            Ok(c) => c,
            Err(e) => {
                // Already delivered as-is; nothing left to scan.
                debug!(user = %ctx.identity.username, error = %e, "unscannable body");
                return Ok(());
            }
        };
        let scan = crate::commands::scan_content(&content, &ctx.identity.username);

        for mentioned in &scan.mentions {
            notify_mention(ctx, mentioned).await;
        }

        if let Some((name, args)) = scan.command {
            let args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
            ctx.commands
                .invoke(
                    &name,
                    &args,
                    ctx.identity,
                    ctx.role,
                    ctx.conn,
                    ctx.rooms,
                    ctx.server_name,
                )
                .await?;
        }
        Ok(())
    }
}

/// Private "you were mentioned" notice. Not persisted; a missing or dead
/// target is a no-op.
async fn notify_mention(ctx: &Context<'_>, mentioned: &str) {
    let room_id = &ctx.identity.room_id;
    let Some(conn) = ctx.rooms.member_connection(room_id, mentioned).await else {
        debug!(room = %room_id, target = %mentioned, "mention of absent user");
        return;
    };
    let notice = MessageEnvelope::server(
        MessageType::TextMessage,
        room_id,
        ctx.server_name,
        format!("you were mentioned by {}", ctx.identity.username),
    );
    if let Err(e) = conn.send(&notice.to_json()).await {
        warn!(room = %room_id, target = %mentioned, error = %e, "mention notice failed");
        return;
    }
    crate::metrics::mentions().inc();
}

#[cfg(test)]
mod tests {
    use super::super::tests::Harness;
    use crate::auth::Role;
    use crate::envelope::MessageType;

    fn frame(t: MessageType, user: &str, room: &str, content: &str) -> String {
        serde_json::json!({
            "headers": {
                "username": user,
                "roomId": room,
                "sessionId": 3,
                "type": serde_json::to_value(t).unwrap(),
                "timestamp": 1_700_000_000_000_i64,
                "authToken": "Bearer tok"
            },
            "body": { "encoding": "utf-8", "content": content }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_typing_indicator_not_persisted() {
        let h = Harness::new();
        let (alice, a_conn, _a_rx) = h.join("alice", "R1", Role::Student).await;
        let (_bob, _b_conn, mut b_rx) = h.join("bob", "R1", Role::Student).await;

        let raw = frame(MessageType::UserTyping, "alice", "R1", "");
        h.dispatch(&alice, Role::Student, &a_conn, &raw).await;

        assert!(b_rx.try_recv().unwrap().contains("USER_TYPING"));
        let page = h.rooms.history.get_page("R1", "carol", 0).await.unwrap();
        assert!(page.entries.is_empty());
    }

    #[tokio::test]
    async fn test_message_rate_limit_enforced() {
        let h = Harness::new();
        let (alice, a_conn, mut a_rx) = h.join("alice", "R1", Role::Student).await;
        let (_bob, _b_conn, mut b_rx) = h.join("bob", "R1", Role::Student).await;
        let _ = a_rx.try_recv();

        // Default allows 5/s; the burst beyond that must bounce.
        for i in 0..12 {
            let raw = frame(MessageType::TextMessage, "alice", "R1", &format!("m{i}"));
            h.dispatch(&alice, Role::Student, &a_conn, &raw).await;
        }

        let delivered = std::iter::from_fn(|| b_rx.try_recv().ok()).count();
        assert!(delivered < 12);
        let mut limited = false;
        while let Ok(f) = a_rx.try_recv() {
            limited |= f.contains("rate exceeded");
        }
        assert!(limited);
    }

    #[tokio::test]
    async fn test_mention_of_absent_user_is_noop() {
        let h = Harness::new();
        let (alice, a_conn, mut a_rx) = h.join("alice", "R1", Role::Student).await;

        let raw = frame(MessageType::ParseableMessage, "alice", "R1", "@ghost hi");
        h.dispatch(&alice, Role::Student, &a_conn, &raw).await;
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_permission_error_reported_to_invoker() {
        let h = Harness::new();
        let (alice, a_conn, mut a_rx) = h.join("alice", "R1", Role::Student).await;
        let (_bob, _b_conn, mut b_rx) = h.join("bob", "R1", Role::Student).await;
        let _ = a_rx.try_recv();

        let raw = frame(MessageType::ParseableMessage, "alice", "R1", "/kick bob");
        h.dispatch(&alice, Role::Student, &a_conn, &raw).await;

        // Relay delivered, but the command itself was refused.
        assert!(b_rx.try_recv().unwrap().contains("/kick bob"));
        assert!(b_rx.try_recv().is_err());
        assert!(h.rooms.is_present("bob", "R1").await);
        assert!(a_rx.try_recv().unwrap().contains("requires the TEACHER role"));
    }

    #[tokio::test]
    async fn test_base64_body_scanned_after_decode() {
        use base64::Engine as _;
        let h = Harness::new();
        let (alice, a_conn, _a_rx) = h.join("alice", "R1", Role::Student).await;
        let (_bob, _b_conn, mut b_rx) = h.join("bob", "R1", Role::Student).await;

        let encoded =
            base64::engine::general_purpose::STANDARD.encode("@bob ping");
        let raw = serde_json::json!({
            "headers": {
                "username": "alice", "roomId": "R1", "sessionId": 3,
                "type": "PARSEABLE_MESSAGE", "timestamp": 1_700_000_000_000_i64,
                "authToken": "Bearer tok"
            },
            "body": { "encoding": "base64", "content": encoded }
        })
        .to_string();
        h.dispatch(&alice, Role::Student, &a_conn, &raw).await;

        let _rebroadcast = b_rx.try_recv().unwrap();
        assert!(b_rx.try_recv().unwrap().contains("mentioned by alice"));
    }

    #[tokio::test]
    async fn test_role_always_from_binding_not_body() {
        let h = Harness::new();
        let (alice, a_conn, mut a_rx) = h.join("alice", "R1", Role::Student).await;
        let (_bob, _b_conn, _b_rx) = h.join("bob", "R1", Role::Student).await;
        let _ = a_rx.try_recv();

        // A forged ADMIN claim in the content changes nothing; the bound
        // role is what counts.
        let raw = frame(
            MessageType::ParseableMessage,
            "alice",
            "R1",
            "role=ADMIN /kick bob",
        );
        h.dispatch(&alice, Role::Student, &a_conn, &raw).await;
        assert!(h.rooms.is_present("bob", "R1").await);
    }

    #[tokio::test]
    async fn test_leave_then_relay_fails_membership() {
        let h = Harness::new();
        let (alice, a_conn, mut a_rx) = h.join("alice", "R1", Role::Student).await;
        let (_bob, _b_conn, _b_rx) = h.join("bob", "R1", Role::Student).await;
        let _ = a_rx.try_recv();

        h.rooms.leave(&alice).await;
        let raw = frame(MessageType::TextMessage, "alice", "R1", "late");
        h.dispatch(&alice, Role::Student, &a_conn, &raw).await;
        assert!(a_rx.try_recv().unwrap().contains("not a member"));
    }
}
