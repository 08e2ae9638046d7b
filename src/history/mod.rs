//! Per-room history logs with cached pagination.
//!
//! Each room owns one append-only log. A bounded in-memory tail serves
//! recent pages; older entries fall through to the durable blob store. The
//! flush path (room teardown and scheduled maintenance) writes the whole log
//! under a key derived from the room id, then evicts the tail down to the
//! configured cache size.

pub mod blob;
pub mod redb;

pub use blob::{BlobStore, MemoryBlobStore};
pub use redb::RedbBlobStore;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::envelope::MessageEnvelope;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One stored log entry: a server-assigned id, the (already redacted)
/// envelope, and the append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: String,
    pub envelope: MessageEnvelope,
    pub appended_at: i64,
}

/// A page of history plus the offset the client should request next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<StoredEntry>,
    #[serde(rename = "nextOffset")]
    pub next_offset: usize,
}

impl HistoryPage {
    fn empty(offset: usize) -> Self {
        Self {
            entries: Vec::new(),
            next_offset: offset,
        }
    }
}

/// One room's log.
///
/// Invariant: `base_offset <= persisted <= base_offset + tail.len()`.
/// Entries below `base_offset` live only in the blob store; entries below
/// `persisted` are durable; the tail holds everything from `base_offset` on.
struct RoomLog {
    base_offset: usize,
    persisted: usize,
    tail: VecDeque<StoredEntry>,
}

impl RoomLog {
    /// Resume a log whose first `archived` entries already live in the blob
    /// store. A brand-new room resumes from zero.
    fn resume(archived: usize) -> Self {
        Self {
            base_offset: archived,
            persisted: archived,
            tail: VecDeque::new(),
        }
    }

    fn total_len(&self) -> usize {
        self.base_offset + self.tail.len()
    }
}

/// Append-only per-room history with an in-memory tail cache.
pub struct HistoryStore {
    logs: DashMap<String, Arc<Mutex<RoomLog>>>,
    store: Arc<dyn BlobStore>,
    cache_entries: usize,
    page_size: usize,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn BlobStore>, cache_entries: usize, page_size: usize) -> Self {
        Self {
            logs: DashMap::new(),
            store,
            cache_entries: cache_entries.max(1),
            page_size: page_size.max(1),
        }
    }

    fn room_key(room_id: &str) -> String {
        format!("room:{room_id}")
    }

    /// Look up a room's log, creating it if absent. A room that was torn
    /// down and re-created resumes after its archived prefix, so new entries
    /// append behind what the blob already holds instead of shadowing it.
    async fn log_for(&self, room_id: &str) -> Result<Arc<Mutex<RoomLog>>, HistoryError> {
        if let Some(log) = self.logs.get(room_id) {
            return Ok(Arc::clone(&log));
        }
        let archived = self.fetch_archived(room_id).await?.len();
        Ok(self
            .logs
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RoomLog::resume(archived))))
            .clone())
    }

    /// Append one envelope to a room's log. Creates the log lazily on first
    /// persisted message. O(1) amortized once the log is resident.
    pub async fn append(
        &self,
        room_id: &str,
        envelope: &MessageEnvelope,
    ) -> Result<StoredEntry, HistoryError> {
        let entry = StoredEntry {
            id: uuid::Uuid::new_v4().to_string(),
            envelope: envelope.clone(),
            appended_at: chrono::Utc::now().timestamp_millis(),
        };
        let log = self.log_for(room_id).await?;
        log.lock().await.tail.push_back(entry.clone());
        Ok(entry)
    }

    /// Total entries appended to a room's log (including evicted ones).
    pub async fn room_len(&self, room_id: &str) -> usize {
        match self.logs.get(room_id).map(|e| Arc::clone(&e)) {
            Some(log) => log.lock().await.total_len(),
            None => 0,
        }
    }

    /// Fetch the page following `client_offset`, the count of raw log
    /// entries the requester already holds.
    ///
    /// Entries come back in append order, bounded by the configured page
    /// size, with the requester's own join/leave announcements filtered out.
    /// `next_offset` indexes the raw log so filtering never shifts later
    /// pages.
    pub async fn get_page(
        &self,
        room_id: &str,
        requester: &str,
        client_offset: usize,
    ) -> Result<HistoryPage, HistoryError> {
        // An unknown room yields an empty page; a torn-down room resumes
        // from its archive.
        let log = self.log_for(room_id).await?;
        let log = log.lock().await;

        let total = log.total_len();
        let start = client_offset.min(total);
        let end = (start + self.page_size).min(total);
        if start == end {
            return Ok(HistoryPage::empty(start));
        }

        let mut raw: Vec<StoredEntry> = Vec::with_capacity(end - start);
        if start < log.base_offset {
            // Cache miss: older entries live only in the durable blob.
            let archived = self.fetch_archived(room_id).await?;
            let blob_end = end.min(log.base_offset);
            if archived.len() < blob_end {
                warn!(
                    room = %room_id,
                    have = archived.len(),
                    want = blob_end,
                    "archived history shorter than expected"
                );
            }
            raw.extend(
                archived
                    .into_iter()
                    .skip(start)
                    .take(blob_end.saturating_sub(start)),
            );
        }
        let tail_from = start.max(log.base_offset);
        if end > tail_from {
            raw.extend(
                log.tail
                    .iter()
                    .skip(tail_from - log.base_offset)
                    .take(end - tail_from)
                    .cloned(),
            );
        }

        // A client never sees its own join/leave echo in history.
        let entries = raw
            .into_iter()
            .filter(|e| {
                !(e.envelope.headers.message_type.is_activity()
                    && e.envelope.headers.username.eq_ignore_ascii_case(requester))
            })
            .collect();

        Ok(HistoryPage {
            entries,
            next_offset: end,
        })
    }

    async fn fetch_archived(&self, room_id: &str) -> Result<Vec<StoredEntry>, HistoryError> {
        match self.store.fetch(&Self::room_key(room_id)).await? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| HistoryError::Serialization(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Flush a room's log to durable storage and trim the tail down to the
    /// cache bound. Returns the number of newly persisted entries.
    ///
    /// On storage failure the in-memory tail is retained untouched so the
    /// next scheduled flush can retry.
    pub async fn flush_room(&self, room_id: &str) -> Result<usize, HistoryError> {
        let Some(log) = self.logs.get(room_id).map(|e| Arc::clone(&e)) else {
            return Ok(0);
        };
        let mut log = log.lock().await;

        let total = log.total_len();
        let newly = total - log.persisted;
        if newly == 0 && log.tail.len() <= self.cache_entries {
            return Ok(0);
        }

        // The blob always holds the whole log: archived prefix plus tail.
        let mut full = if log.base_offset > 0 {
            let mut archived = self.fetch_archived(room_id).await?;
            archived.truncate(log.base_offset);
            archived
        } else {
            Vec::new()
        };
        full.extend(log.tail.iter().cloned());

        let bytes =
            serde_json::to_vec(&full).map_err(|e| HistoryError::Serialization(e.to_string()))?;
        self.store.store(&Self::room_key(room_id), bytes).await?;

        log.persisted = total;
        while log.tail.len() > self.cache_entries {
            log.tail.pop_front();
            log.base_offset += 1;
        }
        debug!(room = %room_id, persisted = newly, "flushed room history");
        Ok(newly)
    }

    /// Flush every room's log. Storage errors are logged per room and do not
    /// abort the pass. Returns (rooms flushed, entries persisted, rooms
    /// whose flush failed).
    pub async fn flush_all(&self) -> (usize, usize, usize) {
        let room_ids: Vec<String> = self.logs.iter().map(|e| e.key().clone()).collect();
        let mut rooms = 0;
        let mut entries = 0;
        let mut failed = 0;
        for room_id in room_ids {
            match self.flush_room(&room_id).await {
                Ok(0) => {}
                Ok(n) => {
                    rooms += 1;
                    entries += n;
                }
                Err(e) => {
                    failed += 1;
                    warn!(room = %room_id, error = %e, "history flush failed; cache retained");
                }
            }
        }
        (rooms, entries, failed)
    }

    /// Final flush on room teardown: persist and drop the in-memory log.
    /// The archived blob remains under the room's key.
    pub async fn finalize_room(&self, room_id: &str) {
        if let Err(e) = self.flush_room(room_id).await {
            warn!(room = %room_id, error = %e, "final history flush failed; log retained");
            return;
        }
        self.logs.remove(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageType;

    fn store() -> HistoryStore {
        HistoryStore::new(Arc::new(MemoryBlobStore::new()), 100, 50)
    }

    fn msg(user: &str, kind: MessageType, text: &str) -> MessageEnvelope {
        MessageEnvelope::server(kind, "R1", user, text.to_string())
    }

    #[tokio::test]
    async fn test_pages_in_append_order_without_gaps() {
        let store = store();
        for i in 0..3 {
            store
                .append("R1", &msg("alice", MessageType::TextMessage, &format!("m{i}")))
                .await.unwrap();
        }
        let page = store.get_page("R1", "bob", 0).await.unwrap();
        let texts: Vec<_> = page
            .entries
            .iter()
            .map(|e| e.envelope.body.content.as_str())
            .collect();
        assert_eq!(texts, vec!["m0", "m1", "m2"]);
        assert_eq!(page.next_offset, 3);
    }

    #[tokio::test]
    async fn test_page_size_bounds_response() {
        let store = HistoryStore::new(Arc::new(MemoryBlobStore::new()), 100, 2);
        for i in 0..5 {
            store
                .append("R1", &msg("alice", MessageType::TextMessage, &format!("m{i}")))
                .await.unwrap();
        }
        let first = store.get_page("R1", "bob", 0).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.next_offset, 2);

        let second = store.get_page("R1", "bob", first.next_offset).await.unwrap();
        assert_eq!(second.entries.len(), 2);
        let third = store.get_page("R1", "bob", second.next_offset).await.unwrap();
        assert_eq!(third.entries.len(), 1);
        assert_eq!(third.next_offset, 5);
    }

    #[tokio::test]
    async fn test_own_activity_suppressed() {
        let store = store();
        store.append("R1", &msg("alice", MessageType::UserJoined, "")).await.unwrap();
        store.append("R1", &msg("bob", MessageType::UserJoined, "")).await.unwrap();
        store.append("R1", &msg("alice", MessageType::TextMessage, "hi")).await.unwrap();
        store.append("R1", &msg("Alice", MessageType::UserLeft, "")).await.unwrap();

        let page = store.get_page("R1", "alice", 0).await.unwrap();
        let kinds: Vec<_> = page
            .entries
            .iter()
            .map(|e| (e.envelope.headers.username.as_str(), e.envelope.headers.message_type))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("bob", MessageType::UserJoined),
                ("alice", MessageType::TextMessage),
            ]
        );
        // Raw offsets are unaffected by filtering.
        assert_eq!(page.next_offset, 4);
    }

    #[tokio::test]
    async fn test_unknown_room_is_empty_not_error() {
        let page = store().get_page("nope", "alice", 0).await.unwrap();
        assert!(page.entries.is_empty());
        assert_eq!(page.next_offset, 0);
    }

    #[tokio::test]
    async fn test_flush_evicts_and_pages_fall_through() {
        let blob = Arc::new(MemoryBlobStore::new());
        let store = HistoryStore::new(blob.clone(), 2, 50);
        for i in 0..6 {
            store
                .append("R1", &msg("alice", MessageType::TextMessage, &format!("m{i}")))
                .await.unwrap();
        }
        let persisted = store.flush_room("R1").await.unwrap();
        assert_eq!(persisted, 6);
        assert_eq!(blob.len(), 1);

        // Entries 0..4 are evicted; a page from offset 0 must read the blob.
        let page = store.get_page("R1", "bob", 0).await.unwrap();
        let texts: Vec<_> = page
            .entries
            .iter()
            .map(|e| e.envelope.body.content.as_str())
            .collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn test_second_flush_appends_new_entries() {
        let blob = Arc::new(MemoryBlobStore::new());
        let store = HistoryStore::new(blob, 2, 50);
        for i in 0..4 {
            store
                .append("R1", &msg("alice", MessageType::TextMessage, &format!("m{i}")))
                .await.unwrap();
        }
        store.flush_room("R1").await.unwrap();
        store.append("R1", &msg("alice", MessageType::TextMessage, "m4")).await.unwrap();
        assert_eq!(store.flush_room("R1").await.unwrap(), 1);

        let page = store.get_page("R1", "bob", 0).await.unwrap();
        assert_eq!(page.entries.len(), 5);
        assert_eq!(page.entries[4].envelope.body.content, "m4");
    }

    #[tokio::test]
    async fn test_recreated_room_appends_after_archive() {
        let blob = Arc::new(MemoryBlobStore::new());
        let store = HistoryStore::new(blob, 100, 50);
        store.append("R1", &msg("alice", MessageType::TextMessage, "old1")).await.unwrap();
        store.append("R1", &msg("alice", MessageType::TextMessage, "old2")).await.unwrap();
        store.finalize_room("R1").await;

        // The room comes back: its log resumes behind the archive, and the
        // next flush must not shadow the archived prefix.
        store.append("R1", &msg("bob", MessageType::TextMessage, "new1")).await.unwrap();
        assert_eq!(store.flush_room("R1").await.unwrap(), 1);

        let page = store.get_page("R1", "carol", 0).await.unwrap();
        let texts: Vec<_> = page
            .entries
            .iter()
            .map(|e| e.envelope.body.content.as_str())
            .collect();
        assert_eq!(texts, vec!["old1", "old2", "new1"]);
        assert_eq!(page.next_offset, 3);
    }

    #[tokio::test]
    async fn test_archive_pages_served_while_log_not_resident() {
        let blob = Arc::new(MemoryBlobStore::new());
        let store = HistoryStore::new(blob, 100, 50);
        store.append("R1", &msg("alice", MessageType::TextMessage, "hi")).await.unwrap();
        store.finalize_room("R1").await;

        // No append has re-created the log yet; the page comes straight
        // from the blob.
        let page = store.get_page("R1", "bob", 0).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].envelope.body.content, "hi");
        assert_eq!(page.next_offset, 1);
    }

    #[tokio::test]
    async fn test_flush_all_reports_rooms_entries_and_failures() {
        let store = store();
        for i in 0..3 {
            store
                .append("R1", &msg("alice", MessageType::TextMessage, &format!("m{i}")))
                .await
                .unwrap();
        }
        assert_eq!(store.flush_all().await, (1, 3, 0));
        // Nothing new: a second pass is a no-op on every count.
        assert_eq!(store.flush_all().await, (0, 0, 0));
    }

    #[tokio::test]
    async fn test_finalize_drops_log_but_keeps_blob() {
        let blob = Arc::new(MemoryBlobStore::new());
        let store = HistoryStore::new(blob.clone(), 100, 50);
        store.append("R1", &msg("alice", MessageType::TextMessage, "hi")).await.unwrap();
        store.finalize_room("R1").await;
        assert_eq!(store.room_len("R1").await, 0);
        assert_eq!(blob.len(), 1);
    }
}
