use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{BlobError, BlobInfo, BlobStore, NotFoundSnafu, Tier, validate_key};

/// In-memory blob store.
///
/// Deletes can be made to fail with [`MemBlobStore::fail_deletes`].
#[derive(Debug, Default)]
pub struct MemBlobStore {
    blobs: RwLock<BTreeMap<(Tier, String), MemBlob>>,
    fail_deletes: AtomicBool,
}

#[derive(Debug, Clone)]
struct MemBlob {
    data: Bytes,
    modified: DateTime<Utc>,
}

impl MemBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following delete fail with [`BlobError::Unavailable`].
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::Relaxed);
    }

    /// Number of stored payloads across tiers.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Whether the store holds no payloads.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Whether a payload is stored.
    pub fn contains(&self, tier: Tier, key: &str) -> bool {
        self.blobs.read().contains_key(&(tier, key.to_string()))
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn put(&self, tier: Tier, key: &str, data: Bytes) -> Result<(), BlobError> {
        validate_key(key)?;
        let blob = MemBlob {
            data,
            modified: Utc::now(),
        };
        self.blobs.write().insert((tier, key.to_string()), blob);
        Ok(())
    }

    async fn get(&self, tier: Tier, key: &str) -> Result<Bytes, BlobError> {
        self.blobs
            .read()
            .get(&(tier, key.to_string()))
            .map(|blob| blob.data.clone())
            .ok_or_else(|| NotFoundSnafu { tier, key }.build())
    }

    async fn delete(&self, tier: Tier, key: &str) -> Result<(), BlobError> {
        if self.fail_deletes.load(Ordering::Relaxed) {
            return Err(BlobError::Unavailable);
        }
        match self.blobs.write().remove(&(tier, key.to_string())) {
            Some(_) => Ok(()),
            None => NotFoundSnafu { tier, key }.fail(),
        }
    }

    async fn exists(&self, tier: Tier, key: &str) -> Result<bool, BlobError> {
        Ok(self.contains(tier, key))
    }

    async fn list(&self, tier: Tier, prefix: &str) -> Result<Vec<BlobInfo>, BlobError> {
        let list = self
            .blobs
            .read()
            .iter()
            .filter(|((t, key), _)| *t == tier && key.starts_with(prefix))
            .map(|((_, key), blob)| BlobInfo {
                key: key.clone(),
                size: blob.data.len() as u64,
                last_modified: blob.modified,
            })
            .collect();
        Ok(list)
    }
}
