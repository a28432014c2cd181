//! Blob storage for relic payloads and backup documents.
//!
//! Payloads are addressed by a [`Tier`] and a `/`-separated key. The [`BlobStore`] trait is
//! implemented by [`FsBlobStore`] for deployments and [`MemBlobStore`] for tests. Services talk
//! to a [`Blobs`] handle which bounds every call by a timeout.

use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

mod fs;
mod mem;

pub use self::{fs::FsBlobStore, mem::MemBlobStore};

/// Storage class of a payload.
///
/// Ephemeral payloads are the ones uploaded with an expiry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Tier {
    /// Kept until deleted.
    Standard,
    /// Uploaded with an expiry.
    Ephemeral,
}

impl Tier {
    /// The tier for a payload with the given expiry.
    pub fn for_expiry(expires_at: Option<&DateTime<Utc>>) -> Self {
        match expires_at {
            Some(_) => Self::Ephemeral,
            None => Self::Standard,
        }
    }
}

/// Listing entry returned by [`BlobStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Full key of the blob.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// Errors from the blob stores.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum BlobError {
    /// No blob under this key.
    #[snafu(display("blob {tier}/{key} not found"))]
    NotFound {
        /// Tier that was searched.
        tier: Tier,
        /// Missing key.
        key: String,
    },
    /// The key is empty or escapes the store namespace.
    #[snafu(display("invalid blob key {key:?}"))]
    InvalidKey {
        /// Rejected key.
        key: String,
    },
    /// Filesystem failure.
    #[snafu(display("blob i/o failed for {key}"))]
    Io {
        /// Key being accessed.
        key: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The store did not answer in time.
    #[snafu(display("blob operation timed out after {timeout:?}"))]
    Timeout {
        /// Configured timeout.
        timeout: Duration,
    },
    /// The store refused the operation.
    #[snafu(display("blob store unavailable"))]
    Unavailable,
}

impl BlobError {
    /// Whether this is a [`BlobError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A key/value store for opaque payloads.
#[async_trait]
pub trait BlobStore: Debug + Send + Sync + 'static {
    /// Store a payload, replacing any previous one.
    async fn put(&self, tier: Tier, key: &str, data: Bytes) -> Result<(), BlobError>;

    /// Fetch a payload.
    ///
    /// # Errors
    /// Returns [`BlobError::NotFound`] if nothing is stored under `key`.
    async fn get(&self, tier: Tier, key: &str) -> Result<Bytes, BlobError>;

    /// Delete a payload.
    ///
    /// # Errors
    /// Returns [`BlobError::NotFound`] if nothing is stored under `key`.
    async fn delete(&self, tier: Tier, key: &str) -> Result<(), BlobError>;

    /// Whether a payload exists.
    async fn exists(&self, tier: Tier, key: &str) -> Result<bool, BlobError>;

    /// List payloads whose key starts with `prefix`.
    async fn list(&self, tier: Tier, prefix: &str) -> Result<Vec<BlobInfo>, BlobError>;

    /// Copy a payload to another key.
    async fn copy(
        &self,
        from_tier: Tier,
        from_key: &str,
        to_tier: Tier,
        to_key: &str,
    ) -> Result<(), BlobError> {
        let data = self.get(from_tier, from_key).await?;
        self.put(to_tier, to_key, data).await
    }
}

/// Validate a `/`-separated key.
pub(crate) fn validate_key(key: &str) -> Result<(), BlobError> {
    let valid = !key.is_empty()
        && key.split('/').all(|part| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });
    snafu::ensure!(valid, InvalidKeySnafu { key });
    Ok(())
}

/// Shared handle to a [`BlobStore`] bounding every call by a timeout.
#[derive(Debug, Clone)]
pub struct Blobs {
    inner: Arc<dyn BlobStore>,
    timeout: Duration,
}

impl Blobs {
    /// Wrap a store.
    pub fn new(store: impl BlobStore, timeout: Duration) -> Self {
        Self::from_arc(Arc::new(store), timeout)
    }

    /// Wrap a store that is shared elsewhere.
    pub fn from_arc(store: Arc<dyn BlobStore>, timeout: Duration) -> Self {
        Self {
            inner: store,
            timeout,
        }
    }

    /// See [`BlobStore::put`].
    pub async fn put(&self, tier: Tier, key: &str, data: Bytes) -> Result<(), BlobError> {
        self.timed(self.inner.put(tier, key, data)).await
    }

    /// See [`BlobStore::get`].
    pub async fn get(&self, tier: Tier, key: &str) -> Result<Bytes, BlobError> {
        self.timed(self.inner.get(tier, key)).await
    }

    /// See [`BlobStore::delete`].
    pub async fn delete(&self, tier: Tier, key: &str) -> Result<(), BlobError> {
        self.timed(self.inner.delete(tier, key)).await
    }

    /// See [`BlobStore::exists`].
    pub async fn exists(&self, tier: Tier, key: &str) -> Result<bool, BlobError> {
        self.timed(self.inner.exists(tier, key)).await
    }

    /// See [`BlobStore::list`].
    pub async fn list(&self, tier: Tier, prefix: &str) -> Result<Vec<BlobInfo>, BlobError> {
        self.timed(self.inner.list(tier, prefix)).await
    }

    /// See [`BlobStore::copy`].
    pub async fn copy(
        &self,
        from_tier: Tier,
        from_key: &str,
        to_tier: Tier,
        to_key: &str,
    ) -> Result<(), BlobError> {
        self.timed(self.inner.copy(from_tier, from_key, to_tier, to_key))
            .await
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T, BlobError>>,
    ) -> Result<T, BlobError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_elapsed) => TimeoutSnafu {
                timeout: self.timeout,
            }
            .fail(),
        }
    }
}
