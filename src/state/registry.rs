//! The room registry: central shared state for the chat engine.
//!
//! Rooms live in a concurrent map so unrelated rooms never serialize each
//! other; per-room membership mutation is linearized by each room's RwLock.
//! Broadcast takes the lock only long enough to snapshot the member list,
//! then sends with no lock held, so transport backpressure can never stall a
//! room.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::envelope::MessageEnvelope;
use crate::history::HistoryStore;
use crate::security::RateLimitManager;
use crate::state::identity::{ClientIdentity, ConnectedClient, Presence};
use crate::state::room::Room;
use crate::transport::ConnectionHandle;

pub struct RoomRegistry {
    rooms: DashMap<String, Arc<RwLock<Room>>>,
    pub history: Arc<HistoryStore>,
    pub rate_limiter: Arc<RateLimitManager>,
}

impl RoomRegistry {
    pub fn new(history: Arc<HistoryStore>, rate_limiter: Arc<RateLimitManager>) -> Self {
        Self {
            rooms: DashMap::new(),
            history,
            rate_limiter,
        }
    }

    fn room(&self, room_id: &str) -> Option<Arc<RwLock<Room>>> {
        self.rooms.get(room_id).map(|r| Arc::clone(&r))
    }

    /// Add a client to its room, creating the room lazily.
    ///
    /// Idempotent per identity: a re-join replaces the prior connection
    /// rather than duplicating membership. The replaced socket is closed.
    pub async fn join(&self, identity: ClientIdentity, conn: Arc<dyn ConnectionHandle>) {
        let room = self
            .rooms
            .entry(identity.room_id.clone())
            .or_insert_with(|| {
                info!(room = %identity.room_id, "room created");
                crate::metrics::active_rooms().inc();
                Arc::new(RwLock::new(Room::new(identity.room_id.clone())))
            })
            .clone();

        let replaced = {
            let mut room = room.write().await;
            room.insert_member(ConnectedClient::new(identity.clone(), conn))
        };
        if let Some(stale) = replaced {
            debug!(room = %identity.room_id, user = %identity.username, "re-join replaced stale connection");
            stale.conn.close();
        } else {
            crate::metrics::connected_clients().inc();
        }
    }

    /// Remove a client from its room. Finalizes the room (history flushed,
    /// entry dropped) when the last member leaves.
    ///
    /// Leaving an unknown identity or room is logged and ignored:
    /// leave-after-disconnect races are expected, not exceptional.
    pub async fn leave(&self, identity: &ClientIdentity) {
        let Some(room) = self.room(&identity.room_id) else {
            debug!(room = %identity.room_id, user = %identity.username, "leave for unknown room");
            return;
        };

        let (removed, now_empty) = {
            let mut room = room.write().await;
            let removed = room.remove_member(identity);
            (removed.is_some(), room.is_empty())
        };

        if !removed {
            debug!(room = %identity.room_id, user = %identity.username, "leave for non-member");
            return;
        }
        crate::metrics::connected_clients().dec();
        self.rate_limiter.remove_entry(&identity.key());

        if now_empty {
            // Re-check emptiness under the map entry so a concurrent join
            // since our write lock does not lose the room.
            let torn_down = self
                .rooms
                .remove_if(&identity.room_id, |_, r| {
                    r.try_read().map(|g| g.is_empty()).unwrap_or(false)
                })
                .is_some();
            if torn_down {
                crate::metrics::active_rooms().dec();
                info!(room = %identity.room_id, "last member left; room finalized");
                self.history.finalize_room(&identity.room_id).await;
            }
        }
    }

    /// Send a message to every current member of a room, except `exclude`.
    ///
    /// When `persist` is set the message is appended to the room's history
    /// log before any send, so a client fetching history right after a live
    /// broadcast is guaranteed to see it. A failed send to one member never
    /// aborts delivery to the rest; the failed member is cleaned up after.
    pub async fn broadcast(
        &self,
        room_id: &str,
        message: &MessageEnvelope,
        persist: bool,
        exclude: Option<&ClientIdentity>,
    ) {
        let Some(room) = self.room(room_id) else {
            debug!(room = %room_id, "broadcast to unknown room");
            return;
        };

        if persist {
            // Persist before any send; a storage error must not block
            // live delivery.
            if let Err(e) = self.history.append(room_id, message).await {
                warn!(room = %room_id, error = %e, "history append failed; delivering unpersisted");
            }
        }

        // Snapshot under the read lock, send with no lock held.
        let members = room.read().await.member_snapshot();
        drop(room);

        let frame = message.to_json();
        let mut failed: Vec<ClientIdentity> = Vec::new();
        for (identity, conn) in members {
            if exclude.is_some_and(|e| *e == identity) {
                continue;
            }
            if let Err(e) = conn.send(&frame).await {
                warn!(room = %room_id, user = %identity.username, error = %e, "broadcast delivery failed");
                crate::metrics::broadcast_failures().inc();
                failed.push(identity);
            }
        }
        crate::metrics::messages_broadcast().inc();

        for identity in failed {
            self.leave(&identity).await;
        }
    }

    /// Toggle a member's ACTIVE/AWAY state. Membership is unaffected.
    pub async fn set_presence(&self, identity: &ClientIdentity, state: Presence) {
        let Some(room) = self.room(&identity.room_id) else {
            return;
        };
        let changed = room.write().await.set_presence(identity, state);
        if !changed {
            debug!(room = %identity.room_id, user = %identity.username, "presence set for non-member");
        }
    }

    /// Usernames of ACTIVE members, case-insensitively sorted.
    pub async fn list_active_usernames(&self, room_id: &str) -> Vec<String> {
        match self.room(room_id) {
            Some(room) => room.read().await.active_usernames(),
            None => Vec::new(),
        }
    }

    /// Whether a user is currently a member of a room. Exposed to the
    /// account-management flows outside this engine.
    pub async fn is_present(&self, username: &str, room_id: &str) -> bool {
        match self.room(room_id) {
            Some(room) => room.read().await.member(username).is_some(),
            None => false,
        }
    }

    /// Connection handle for a member, if present.
    pub async fn member_connection(
        &self,
        room_id: &str,
        username: &str,
    ) -> Option<Arc<dyn ConnectionHandle>> {
        let room = self.room(room_id)?;
        let room = room.read().await;
        room.member(username).map(|c| Arc::clone(&c.conn))
    }

    /// Identity of a member, if present.
    pub async fn member_identity(&self, room_id: &str, username: &str) -> Option<ClientIdentity> {
        let room = self.room(room_id)?;
        let room = room.read().await;
        room.member(username).map(|c| c.identity.clone())
    }

    /// Send a message to every member of every room. Used for maintenance
    /// and restart announcements. Tolerates rooms disappearing mid-pass.
    pub async fn total_broadcast(&self, message: &MessageEnvelope) {
        for room_id in self.room_ids() {
            let mut msg = message.clone();
            msg.headers.room_id = room_id.clone();
            self.broadcast(&room_id, &msg, false, None).await;
        }
    }

    /// Snapshot of current room ids.
    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        match self.room(room_id) {
            Some(room) => room.read().await.len(),
            None => 0,
        }
    }

    /// Remove members whose connection reports closed. Leave notifications
    /// can be lost; this sweep is the backstop. Returns removals.
    pub async fn sweep_zombies(&self) -> usize {
        let mut swept = 0;
        for room_id in self.room_ids() {
            let Some(room) = self.room(&room_id) else {
                continue; // torn down mid-iteration
            };
            let zombies = room.read().await.closed_members();
            drop(room);
            for identity in zombies {
                info!(room = %room_id, user = %identity.username, "sweeping zombie connection");
                self.leave(&identity).await;
                swept += 1;
            }
        }
        if swept > 0 {
            crate::metrics::zombies_swept().inc_by(swept as u64);
        }
        swept
    }
}
