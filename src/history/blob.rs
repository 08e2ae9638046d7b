//! Durable blob storage collaborator.
//!
//! The engine consumes durable storage as "store these bytes under a key" /
//! "fetch them back". The shipped backend is redb; tests use the in-memory
//! backend.

use async_trait::async_trait;
use dashmap::DashMap;

use super::HistoryError;

/// Key-value blob store for per-room history logs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), HistoryError>;
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, HistoryError>;
}

/// In-memory blob store for tests and the `memory` backend config.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), HistoryError> {
        self.blobs.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, HistoryError> {
        Ok(self.blobs.get(key).map(|b| b.clone()))
    }
}
