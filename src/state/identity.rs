//! Client identity and connection pairing.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::transport::ConnectionHandle;

/// One logical participant in one room.
///
/// Equality and hash are defined by lowercase username alone: membership
/// sets are per-room, and a user has at most one logical presence per room
/// even when sockets briefly overlap during reconnect. Immutable once
/// constructed.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub username: String,
    pub room_id: String,
    pub session_id: i64,
}

impl ClientIdentity {
    pub fn new(username: impl Into<String>, room_id: impl Into<String>, session_id: i64) -> Self {
        Self {
            username: username.into(),
            room_id: room_id.into(),
            session_id,
        }
    }

    /// Canonical membership key.
    pub fn key(&self) -> String {
        self.username.to_lowercase()
    }
}

impl PartialEq for ClientIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.username.eq_ignore_ascii_case(&other.username)
    }
}

impl Eq for ClientIdentity {}

impl Hash for ClientIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Presence state, independent of membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Active,
    Away,
}

/// A member of a room: identity plus its live connection.
///
/// Equality follows identity; socket identity is irrelevant, which is what
/// lets a re-join swap the connection without duplicating membership.
#[derive(Clone)]
pub struct ConnectedClient {
    pub identity: ClientIdentity,
    pub conn: Arc<dyn ConnectionHandle>,
}

impl ConnectedClient {
    pub fn new(identity: ClientIdentity, conn: Arc<dyn ConnectionHandle>) -> Self {
        Self { identity, conn }
    }
}

impl PartialEq for ConnectedClient {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for ConnectedClient {}

impl std::fmt::Debug for ConnectedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedClient")
            .field("identity", &self.identity)
            .field("open", &self.conn.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MpscHandle;

    #[test]
    fn test_identity_equality_by_username_only() {
        let a = ClientIdentity::new("Alice", "R1", 1);
        let b = ClientIdentity::new("alice", "R1", 999);
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_client_equality_ignores_socket() {
        let (conn_a, _rx_a) = MpscHandle::pair();
        let (conn_b, _rx_b) = MpscHandle::pair();
        let a = ConnectedClient::new(ClientIdentity::new("alice", "R1", 1), conn_a);
        let b = ConnectedClient::new(ClientIdentity::new("alice", "R1", 2), conn_b);
        assert_eq!(a, b);
    }
}
