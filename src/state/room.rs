//! Room state: membership and presence.

use std::collections::HashMap;
use std::sync::Arc;

use crate::state::identity::{ClientIdentity, ConnectedClient, Presence};
use crate::transport::ConnectionHandle;

/// A named channel grouping connected clients.
///
/// Membership is unique by identity (lowercase username). All mutation goes
/// through the registry's per-room lock; the room itself is plain data.
#[derive(Debug)]
pub struct Room {
    pub id: String,
    members: HashMap<String, ConnectedClient>,
    presence: HashMap<String, Presence>,
    pub created: i64,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: HashMap::new(),
            presence: HashMap::new(),
            created: chrono::Utc::now().timestamp(),
        }
    }

    /// Add a member, replacing any prior connection bound to the same
    /// identity. The replaced client is returned so the caller can close its
    /// stale socket.
    pub fn insert_member(&mut self, client: ConnectedClient) -> Option<ConnectedClient> {
        let key = client.identity.key();
        self.presence.insert(key.clone(), Presence::Active);
        self.members.insert(key, client)
    }

    pub fn remove_member(&mut self, identity: &ClientIdentity) -> Option<ConnectedClient> {
        let key = identity.key();
        self.presence.remove(&key);
        self.members.remove(&key)
    }

    pub fn is_member(&self, identity: &ClientIdentity) -> bool {
        self.members.contains_key(&identity.key())
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn member(&self, username: &str) -> Option<&ConnectedClient> {
        self.members.get(&username.to_lowercase())
    }

    /// Toggle presence for a member. No-op for non-members.
    pub fn set_presence(&mut self, identity: &ClientIdentity, state: Presence) -> bool {
        let key = identity.key();
        if !self.members.contains_key(&key) {
            return false;
        }
        self.presence.insert(key, state);
        true
    }

    pub fn presence(&self, identity: &ClientIdentity) -> Option<Presence> {
        self.presence.get(&identity.key()).copied()
    }

    /// Display usernames of ACTIVE members, case-insensitively sorted.
    pub fn active_usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .members
            .values()
            .filter(|c| {
                self.presence.get(&c.identity.key()).copied() != Some(Presence::Away)
            })
            .map(|c| c.identity.username.clone())
            .collect();
        names.sort_by_key(|n| n.to_lowercase());
        names
    }

    /// Snapshot of member connections for iteration outside the room lock.
    ///
    /// Broadcast acquires the lock only for this snapshot, then releases it
    /// before performing any sends.
    pub fn member_snapshot(&self) -> Vec<(ClientIdentity, Arc<dyn ConnectionHandle>)> {
        self.members
            .values()
            .map(|c| (c.identity.clone(), Arc::clone(&c.conn)))
            .collect()
    }

    /// Members whose connection reports closed (zombie sweep input).
    pub fn closed_members(&self) -> Vec<ClientIdentity> {
        self.members
            .values()
            .filter(|c| !c.conn.is_open())
            .map(|c| c.identity.clone())
            .collect()
    }
}
