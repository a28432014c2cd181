//! Entities persisted in the metadata store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    blobs::Tier,
    error::{InvalidArgumentSnafu, Result},
    expiry,
};

/// Who may discover a relic through listings.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccessLevel {
    /// Listed publicly.
    #[default]
    Public,
    /// Reachable by id only.
    Private,
}

impl AccessLevel {
    /// Parse a user supplied access level.
    pub fn parse(value: &str) -> Result<Self> {
        value.parse().map_err(|_| {
            InvalidArgumentSnafu {
                message: format!("access_level must be 'public' or 'private', got {value:?}"),
            }
            .build()
        })
    }
}

/// A stored content object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relic {
    /// Unique id.
    pub id: String,
    /// Owning client, `None` for anonymous uploads.
    pub client_id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// MIME type of the payload.
    pub content_type: String,
    /// Syntax highlighting hint.
    pub language_hint: Option<String>,
    /// Payload length.
    pub size_bytes: u64,
    /// Blob key of the payload.
    pub storage_key: String,
    /// Storage class, fixed at creation.
    pub tier: Tier,
    /// Listing visibility.
    pub access_level: AccessLevel,
    /// Argon2 hash of the read password.
    pub password_hash: Option<String>,
    /// Number of successful metadata reads.
    pub access_count: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: Option<DateTime<Utc>>,
    /// Soft delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Previous version in the lineage.
    pub parent_id: Option<String>,
    /// First version of the lineage.
    pub root_id: String,
    /// 1-based position in the lineage.
    pub version_number: u32,
    /// Relic this lineage was forked from.
    pub fork_of: Option<String>,
}

impl Relic {
    /// Blob key for a relic id.
    pub fn storage_key_for(id: &str) -> String {
        format!("relics/{id}")
    }

    /// Whether the relic was soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the expiry has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        expiry::is_expired_at(self.expires_at.as_ref(), now)
    }

    /// Whether `client_id` owns the relic.
    pub fn is_owned_by(&self, client_id: &str) -> bool {
        self.client_id.as_deref() == Some(client_id)
    }

    /// Whether a password is needed to read the relic.
    pub fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }

    /// File name offered for downloads.
    pub fn download_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A caller identity, created on first sight of its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// The client supplied key.
    pub id: String,
    /// Display name, needed to comment.
    pub name: Option<String>,
    /// Number of non-deleted relics owned.
    pub relic_count: u64,
    /// First sight.
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// A client seen for the first time.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            relic_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// A client's bookmark on a relic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Unique id.
    pub id: String,
    /// Bookmarking client.
    pub client_id: String,
    /// Bookmarked relic.
    pub relic_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A comment on a relic, optionally anchored to a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique id.
    pub id: String,
    /// Commented relic.
    pub relic_id: String,
    /// Author.
    pub client_id: String,
    /// Line the comment refers to.
    pub line_number: Option<u32>,
    /// Comment this one replies to.
    pub parent_id: Option<String>,
    /// Text.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last edit.
    pub updated_at: Option<DateTime<Utc>>,
}

/// An abuse report filed against a relic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Unique id.
    pub id: String,
    /// Reported relic.
    pub relic_id: String,
    /// Free text reason.
    pub reason: String,
    /// Filing time.
    pub created_at: DateTime<Utc>,
}

/// Default number of entries per listing page.
pub const DEFAULT_PAGE_LIMIT: usize = 50;
/// Largest accepted page size.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Limit and offset of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Maximum number of entries.
    pub limit: usize,
    /// Entries to skip.
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Build a page from optional request parameters, clamping the limit.
    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// Apply the page to a full listing, returning the page and the total count.
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> (Vec<T>, usize) {
        let mut total = 0;
        let mut out = Vec::new();
        for item in items {
            if total >= self.offset && out.len() < self.limit {
                out.push(item);
            }
            total += 1;
        }
        (out, total)
    }
}
