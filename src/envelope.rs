//! Wire envelope for the chat engine.
//!
//! Every inbound and outbound frame is a JSON envelope of `headers` plus
//! `body`. Field names are contractual (shared with the web clients), so the
//! serde renames here are load-bearing. Envelopes are immutable after parse
//! except for the server timestamp stamp and sensitive-field redaction
//! applied before re-broadcast.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or decoding an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("body is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid history offset: {0}")]
    BadOffset(String),
}

/// Closed catalogue of message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    UserJoined,
    UserLeft,
    UserTyping,
    UserStoppedTyping,
    TextMessage,
    ImageMessage,
    AudioMessage,
    VideoMessage,
    PdfMessage,
    TextDocMessage,
    ParseableMessage,
    ActiveUsers,
    GetHistory,
    Ping,
    Pong,
    Restart,
    Maintenance,
    ErrorMessage,
}

impl MessageType {
    /// Whether broadcasts of this tag are appended to the room history log.
    ///
    /// Join/leave announcements and typing indicators are ephemeral; chat
    /// content (text, media, parseable) is persisted.
    pub fn persists(&self) -> bool {
        matches!(
            self,
            Self::TextMessage
                | Self::ImageMessage
                | Self::AudioMessage
                | Self::VideoMessage
                | Self::PdfMessage
                | Self::TextDocMessage
                | Self::ParseableMessage
        )
    }

    /// Tags relayed by the generic redact-and-broadcast path.
    pub fn is_relayed(&self) -> bool {
        self.persists() || matches!(self, Self::UserTyping | Self::UserStoppedTyping)
    }

    /// Join/leave activity announcements, filtered from a requester's own
    /// history pages.
    pub fn is_activity(&self) -> bool {
        matches!(self, Self::UserJoined | Self::UserLeft)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Reuse the serde tag so logs match the wire.
        let tag = serde_json::to_value(self).expect("tag serialization is infallible");
        write!(f, "{}", tag.as_str().unwrap_or("UNKNOWN"))
    }
}

/// Body content encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

/// Envelope headers. `session_id` and `auth_token` are stripped before any
/// re-broadcast; they never leave the server once a frame has been accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    pub username: String,
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<i64>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "authToken", skip_serializing_if = "Option::is_none", default)]
    pub auth_token: Option<String>,
}

/// Envelope body: an encoding marker and the raw content string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub encoding: Encoding,
    pub content: String,
}

/// The header+body wrapper around every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub headers: Headers,
    pub body: Body,
}

impl MessageEnvelope {
    /// Parse an envelope from a wire frame.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization is infallible")
    }

    /// Build a server-originated envelope with a fresh timestamp.
    pub fn server(message_type: MessageType, room_id: &str, username: &str, content: String) -> Self {
        Self {
            headers: Headers {
                username: username.to_string(),
                room_id: room_id.to_string(),
                session_id: None,
                message_type,
                timestamp: chrono::Utc::now().timestamp_millis(),
                auth_token: None,
            },
            body: Body {
                encoding: Encoding::Utf8,
                content,
            },
        }
    }

    /// Build an ERROR_MESSAGE reply, addressed to a single connection.
    pub fn error_reply(room_id: &str, content: String) -> Self {
        Self::server(MessageType::ErrorMessage, room_id, "server", content)
    }

    /// Strip `session_id` and `auth_token` and stamp a fresh server
    /// timestamp. Called on every envelope before it is re-broadcast.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        out.headers.session_id = None;
        out.headers.auth_token = None;
        out.headers.timestamp = chrono::Utc::now().timestamp_millis();
        out
    }

    /// Body content as text, decoding base64 bodies.
    pub fn text_content(&self) -> Result<String, EnvelopeError> {
        match self.body.encoding {
            Encoding::Utf8 => Ok(self.body.content.clone()),
            Encoding::Base64 => {
                let bytes = BASE64.decode(&self.body.content)?;
                Ok(String::from_utf8(bytes)?)
            }
        }
    }
}
