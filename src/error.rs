//! Unified error handling for campusd.
//!
//! Dispatch errors funnel through this hierarchy so every failure path
//! produces one of: a private ERROR_MESSAGE reply to the offending client,
//! a log line, or both. Errors never reach anyone but the origin.

use thiserror::Error;

use crate::commands::CommandError;
use crate::envelope::{EnvelopeError, MessageEnvelope};
use crate::history::HistoryError;
use crate::transport::TransportError;

/// Errors that can occur while dispatching one inbound message.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed message: {0}")]
    Protocol(#[from] EnvelopeError),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("not a member of room {0}")]
    NotAMember(String),

    #[error("message rate exceeded")]
    RateLimited,

    #[error("join refused: {0}")]
    JoinRefused(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("history error: {0}")]
    History(#[from] HistoryError),

    #[error("send error: {0}")]
    Transport(#[from] TransportError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Static code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::UnknownType(_) => "unknown_type",
            Self::NotAMember(_) => "not_a_member",
            Self::RateLimited => "rate_limited",
            Self::JoinRefused(_) => "join_refused",
            Self::Command(e) => e.error_code(),
            Self::History(_) => "history",
            Self::Transport(_) => "transport",
            Self::Internal(_) => "internal",
        }
    }

    /// Convert to a private ERROR_MESSAGE envelope for the origin client.
    ///
    /// Returns `None` for errors that don't warrant a client-visible reply:
    /// a dead transport can't receive one, and internal faults only log.
    pub fn to_error_reply(&self, room_id: &str) -> Option<MessageEnvelope> {
        match self {
            Self::Transport(_) | Self::Internal(_) | Self::History(_) => None,
            other => Some(MessageEnvelope::error_reply(room_id, other.to_string())),
        }
    }
}

/// Result type for message and command handlers.
pub type DispatchResult = Result<(), DispatchError>;
