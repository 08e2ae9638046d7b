//! Query handlers: GET_HISTORY, PING/PONG, ACTIVE_USERS.

use async_trait::async_trait;
use tracing::warn;

use super::{Context, MessageHandler};
use crate::envelope::{MessageEnvelope, MessageType};
use crate::error::{DispatchError, DispatchResult};

async fn reply(ctx: &Context<'_>, envelope: &MessageEnvelope) -> DispatchResult {
    if let Err(e) = ctx.conn.send(&envelope.to_json()).await {
        warn!(user = %ctx.identity.username, error = %e, "query reply failed");
        return Err(e.into());
    }
    Ok(())
}

/// GET_HISTORY: page of stored envelopes from the client-reported offset.
///
/// The offset is the count of entries the client already holds, carried as
/// an integer string in the body. An empty body means offset zero.
pub struct GetHistoryHandler;

#[async_trait]
impl MessageHandler for GetHistoryHandler {
    async fn handle(&self, ctx: &Context<'_>, envelope: &MessageEnvelope) -> DispatchResult {
        let room_id = &ctx.identity.room_id;
        if !ctx.rooms.is_present(&ctx.identity.username, room_id).await {
            return Err(DispatchError::NotAMember(room_id.clone()));
        }

        let content = envelope.text_content()?;
        let offset: usize = match content.trim() {
            "" => 0,
            s => s.parse().map_err(|_| {
                DispatchError::Protocol(crate::envelope::EnvelopeError::BadOffset(s.to_string()))
            })?,
        };

        let page = ctx
            .rooms
            .history
            .get_page(room_id, &ctx.identity.username, offset)
            .await?;
        let body = serde_json::to_string(&page)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;

        let response =
            MessageEnvelope::server(MessageType::GetHistory, room_id, ctx.server_name, body);
        reply(ctx, &response).await
    }
}

/// PING/PONG keepalive. A client PING gets a PONG; a client PONG is absorbed.
pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(&self, ctx: &Context<'_>, envelope: &MessageEnvelope) -> DispatchResult {
        if envelope.headers.message_type == MessageType::Pong {
            return Ok(());
        }
        let pong = MessageEnvelope::server(
            MessageType::Pong,
            &ctx.identity.room_id,
            ctx.server_name,
            envelope.body.content.clone(),
        );
        reply(ctx, &pong).await
    }
}

/// ACTIVE_USERS: private listing of active members, for the sender only.
pub struct ActiveUsersHandler;

#[async_trait]
impl MessageHandler for ActiveUsersHandler {
    async fn handle(&self, ctx: &Context<'_>, _envelope: &MessageEnvelope) -> DispatchResult {
        let room_id = &ctx.identity.room_id;
        let names = ctx.rooms.list_active_usernames(room_id).await;
        let content = serde_json::to_string(&names)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        let response =
            MessageEnvelope::server(MessageType::ActiveUsers, room_id, ctx.server_name, content);
        reply(ctx, &response).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Harness;
    use crate::auth::Role;
    use crate::envelope::{MessageEnvelope, MessageType};
    use crate::history::HistoryPage;

    fn frame(t: MessageType, user: &str, room: &str, content: &str) -> String {
        serde_json::json!({
            "headers": {
                "username": user, "roomId": room, "sessionId": 2,
                "type": serde_json::to_value(t).unwrap(),
                "timestamp": 1_700_000_000_000_i64,
                "authToken": "Bearer tok"
            },
            "body": { "encoding": "utf-8", "content": content }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_history_offset_skips_held_entries() {
        let h = Harness::new();
        let (alice, a_conn, mut a_rx) = h.join("alice", "R1", Role::Student).await;
        for content in ["m1", "m2", "m3"] {
            let raw = frame(MessageType::TextMessage, "alice", "R1", content);
            h.dispatch(&alice, Role::Student, &a_conn, &raw).await;
        }

        let raw = frame(MessageType::GetHistory, "alice", "R1", "2");
        h.dispatch(&alice, Role::Student, &a_conn, &raw).await;

        let envelope = MessageEnvelope::parse(&a_rx.try_recv().unwrap()).unwrap();
        let page: HistoryPage = serde_json::from_str(&envelope.body.content).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].envelope.body.content, "m3");
        assert_eq!(page.next_offset, 3);
    }

    #[tokio::test]
    async fn test_history_bad_offset_is_protocol_error() {
        let h = Harness::new();
        let (alice, a_conn, mut a_rx) = h.join("alice", "R1", Role::Student).await;
        let raw = frame(MessageType::GetHistory, "alice", "R1", "lots");
        h.dispatch(&alice, Role::Student, &a_conn, &raw).await;
        assert!(a_rx.try_recv().unwrap().contains("ERROR_MESSAGE"));
    }

    #[tokio::test]
    async fn test_active_users_sorted_case_insensitively() {
        let h = Harness::new();
        let (_zed, _z_conn, mut z_rx) = h.join("Zed", "R1", Role::Student).await;
        let (alice, a_conn, mut a_rx) = h.join("alice", "R1", Role::Student).await;
        let _ = z_rx.try_recv();

        let raw = frame(MessageType::ActiveUsers, "alice", "R1", "");
        h.dispatch(&alice, Role::Student, &a_conn, &raw).await;

        let envelope = MessageEnvelope::parse(&a_rx.try_recv().unwrap()).unwrap();
        let names: Vec<String> = serde_json::from_str(&envelope.body.content).unwrap();
        assert_eq!(names, vec!["alice", "Zed"]);
    }

    #[tokio::test]
    async fn test_pong_is_absorbed() {
        let h = Harness::new();
        let (alice, a_conn, mut a_rx) = h.join("alice", "R1", Role::Student).await;
        let raw = frame(MessageType::Pong, "alice", "R1", "");
        h.dispatch(&alice, Role::Student, &a_conn, &raw).await;
        assert!(a_rx.try_recv().is_err());
    }
}
