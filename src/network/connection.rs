//! Per-connection task.
//!
//! Each accepted socket runs one task with a split WebSocket stream:
//! a writer half draining the client's outbound queue into the sink, and
//! the read loop feeding inbound text frames to the dispatcher one at a
//! time, so a single connection's messages are handled in order.
//!
//! The first frame binds the connection's identity: it must carry a valid
//! auth token, whose claims - not the frame's own headers - decide the
//! username and role for the lifetime of the connection.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::Shared;
use crate::dispatch::Context;
use crate::envelope::{MessageEnvelope, MessageType};
use crate::state::ClientIdentity;
use crate::transport::{ConnectionHandle, MpscHandle};

/// Accept the WebSocket handshake and run the connection to completion.
pub async fn handle_connection(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
) -> anyhow::Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (handle, mut outbound) = MpscHandle::pair();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let conn: Arc<dyn ConnectionHandle> = handle.clone();
    let result = read_loop(&mut source, &conn, &handle, addr, &shared).await;

    // Let the writer drain whatever is still queued (an auth rejection, a
    // kick notice) before the sink closes. It exits once every sender clone
    // is gone; read_loop's leave already dropped the registry's clone.
    handle.close();
    drop(conn);
    drop(handle);
    if tokio::time::timeout(std::time::Duration::from_secs(5), &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    result
}

async fn read_loop(
    source: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
    conn: &Arc<dyn ConnectionHandle>,
    handle: &Arc<MpscHandle>,
    addr: SocketAddr,
    shared: &Arc<Shared>,
) -> anyhow::Result<()> {
    let mut identity: Option<(ClientIdentity, crate::auth::Role)> = None;

    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            // tungstenite answers pings at the protocol level
            Ok(_) => continue,
            Err(e) => {
                debug!(%addr, error = %e, "read error");
                break;
            }
        };

        let (bound_identity, role) = match identity.clone() {
            Some(bound) => bound,
            None => match bind_identity(&text, conn, shared).await {
                Some(bound) => {
                    info!(%addr, user = %bound.0.username, room = %bound.0.room_id, "identity bound");
                    identity = Some(bound.clone());
                    bound
                }
                None => {
                    warn!(%addr, "rejected unauthenticated first frame");
                    break;
                }
            },
        };

        let ctx = Context {
            identity: &bound_identity,
            role,
            conn,
            rooms: &shared.rooms,
            commands: &shared.commands,
            server_name: &shared.server_name,
        };
        shared.dispatcher.dispatch(&ctx, &text).await;

        // A kick or forced logout closes the handle mid-session.
        if !handle.is_open() {
            break;
        }
    }

    // The socket is gone; membership must not outlive it. Leave is a no-op
    // if a USER_LEFT already went through.
    if let Some((bound_identity, _)) = identity {
        shared.rooms.leave(&bound_identity).await;
    }
    Ok(())
}

/// Validate the first frame's token and derive the connection identity.
///
/// Username and role come from the token claims; the frame only contributes
/// the room and session ids. An invalid token gets one error reply, then
/// the connection is torn down.
async fn bind_identity(
    text: &str,
    conn: &Arc<dyn ConnectionHandle>,
    shared: &Arc<Shared>,
) -> Option<(ClientIdentity, crate::auth::Role)> {
    let envelope = match MessageEnvelope::parse(text) {
        Ok(e) => e,
        Err(e) => {
            send_rejection(conn, &format!("malformed message: {e}")).await;
            return None;
        }
    };

    let claims = envelope
        .headers
        .auth_token
        .as_deref()
        .and_then(|token| shared.validator.validate(token));
    let Some(claims) = claims else {
        send_rejection(conn, "invalid or missing auth token").await;
        return None;
    };

    let identity = ClientIdentity::new(
        claims.username,
        envelope.headers.room_id.clone(),
        envelope.headers.session_id.unwrap_or_default(),
    );
    Some((identity, claims.role))
}

async fn send_rejection(conn: &Arc<dyn ConnectionHandle>, reason: &str) {
    let reply = MessageEnvelope::server(MessageType::ErrorMessage, "", "server", reason.to_string());
    if let Err(e) = conn.send(&reply.to_json()).await {
        debug!(error = %e, "rejection reply undeliverable");
    }
}
