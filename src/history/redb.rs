//! Redb-backed durable storage for room history blobs.
//!
//! One table, keyed by room key, holding the serialized log. Flushes
//! overwrite the previous blob for the room; readers see whole logs only.

use redb::{Database, ReadableDatabase, TableDefinition};
use std::sync::Arc;

use async_trait::async_trait;

use super::HistoryError;
use super::blob::BlobStore;

const LOGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("room_logs");

pub struct RedbBlobStore {
    db: Arc<Database>,
}

impl RedbBlobStore {
    pub fn new(path: &str) -> Result<Self, HistoryError> {
        let db = Database::create(path).map_err(|e| HistoryError::Storage(e.to_string()))?;
        // Ensure the table exists so first fetch does not error.
        let write_txn = db
            .begin_write()
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        write_txn
            .open_table(LOGS_TABLE)
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl BlobStore for RedbBlobStore {
    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), HistoryError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(LOGS_TABLE)
                .map_err(|e| HistoryError::Storage(e.to_string()))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| HistoryError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, HistoryError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(LOGS_TABLE)
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        let value = table
            .get(key)
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }
}
