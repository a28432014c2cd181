//! Relic lifecycle: upload, read, versioning, forking, deletion and diffs.
//!
//! Payload bytes go to the blob store before the metadata row is committed, and are deleted
//! before a row is soft-deleted. No write transaction is ever held across blob I/O. A failed
//! commit after a successful upload leaves an orphaned blob, which is logged.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use snafu::ensure;
use tracing::{debug, info, warn};

use crate::{
    blobs::{BlobError, Blobs, Tier},
    clients::{Caller, ClientService},
    diff,
    error::{
        ConflictSnafu, Error, ForbiddenSnafu, GoneSnafu, InvalidArgumentSnafu, NotFoundSnafu,
        PayloadTooLargeSnafu, Result,
    },
    expiry, id,
    metrics::Metrics,
    models::{AccessLevel, Page, Relic},
    password,
    store::{MetadataStore, WriteTx},
};

/// Content type used when neither the request nor the upload names one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Diff text returned when neither side is text.
pub const BINARY_DIFF: &str = "Binary content - metadata comparison";

/// Uploaded payload with what the client said about it.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// Payload bytes.
    pub data: Bytes,
    /// File name of the uploaded part.
    pub file_name: Option<String>,
    /// Content type of the uploaded part.
    pub content_type: Option<String>,
}

/// Metadata for a new relic.
#[derive(Debug, Clone, Default)]
pub struct NewRelic {
    /// Display name, defaults to the upload's file name.
    pub name: Option<String>,
    /// Content type, defaults to the upload's content type.
    pub content_type: Option<String>,
    /// Syntax highlighting hint.
    pub language_hint: Option<String>,
    /// `public` (default) or `private`.
    pub access_level: Option<String>,
    /// Expiry expression, see [`expiry::parse_expiry`].
    pub expires_in: Option<String>,
    /// Read password.
    pub password: Option<String>,
}

/// Options for a fork.
#[derive(Debug, Clone, Default)]
pub struct ForkOptions {
    /// Display name, defaults to the original's.
    pub name: Option<String>,
    /// Content type, defaults to the upload's or the original's.
    pub content_type: Option<String>,
    /// Access level, defaults to the original's.
    pub access_level: Option<String>,
    /// Expiry of the fork.
    pub expires_in: Option<String>,
    /// Password of a protected original.
    pub password: Option<String>,
}

/// Metadata patch applied by [`RelicService::update`].
///
/// An empty `name`, `language_hint` or `password` clears the field.
#[derive(Debug, Clone, Default, Deserialize)]
#[allow(missing_docs)]
pub struct RelicUpdate {
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub language_hint: Option<String>,
    pub access_level: Option<String>,
    pub expires_in: Option<String>,
    pub password: Option<String>,
}

/// Payload of a relic ready to be served.
#[derive(Debug, Clone)]
pub struct RawContent {
    /// Payload bytes.
    pub data: Bytes,
    /// Content type to serve.
    pub content_type: String,
    /// File name for the `Content-Disposition` header.
    pub file_name: String,
}

/// One entry of a [`History`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct VersionEntry {
    pub id: String,
    pub version: u32,
    pub created_at: chrono::DateTime<Utc>,
    pub size_bytes: u64,
    pub name: Option<String>,
}

impl From<&Relic> for VersionEntry {
    fn from(relic: &Relic) -> Self {
        Self {
            id: relic.id.clone(),
            version: relic.version_number,
            created_at: relic.created_at,
            size_bytes: relic.size_bytes,
            name: relic.name.clone(),
        }
    }
}

/// The parent chain of a relic, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct History {
    pub root_id: String,
    pub current_id: String,
    pub current_version: u32,
    pub versions: Vec<VersionEntry>,
}

/// Comparison of two relics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct RelicDiff {
    pub from_id: String,
    pub to_id: String,
    pub diff: String,
    pub additions: usize,
    pub deletions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_size: Option<u64>,
}

/// The relic service.
#[derive(Debug, Clone)]
pub struct RelicService {
    store: MetadataStore,
    blobs: Blobs,
    clients: ClientService,
    metrics: Arc<Metrics>,
    max_upload_size: u64,
}

impl RelicService {
    /// Create the service.
    pub fn new(
        store: MetadataStore,
        blobs: Blobs,
        clients: ClientService,
        metrics: Arc<Metrics>,
        max_upload_size: u64,
    ) -> Self {
        Self {
            store,
            blobs,
            clients,
            metrics,
            max_upload_size,
        }
    }

    /// Store a new relic at version 1 of a new lineage.
    pub async fn create(&self, key: Option<&str>, upload: Upload, new: NewRelic) -> Result<Relic> {
        let access_level = parse_access_level(new.access_level.as_deref())?.unwrap_or_default();
        self.check_size(&upload.data)?;
        let owner = self.clients.resolve_or_create(key)?;
        let id = self.unique_relic_id()?;
        let expires_at = expiry::parse_expiry(new.expires_in.as_deref());
        let password_hash = hash_optional(new.password).await?;
        let content_type = non_empty(new.content_type)
            .or(upload.content_type)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let relic = Relic {
            id: id.clone(),
            client_id: owner.map(|caller| caller.client.id),
            name: non_empty(new.name).or(upload.file_name),
            content_type,
            language_hint: non_empty(new.language_hint),
            size_bytes: upload.data.len() as u64,
            storage_key: Relic::storage_key_for(&id),
            tier: Tier::for_expiry(expires_at.as_ref()),
            access_level,
            password_hash,
            access_count: 0,
            created_at: Utc::now(),
            expires_at,
            deleted_at: None,
            parent_id: None,
            root_id: id,
            version_number: 1,
            fork_of: None,
        };
        let relic = self.persist(relic, upload.data).await?;
        self.metrics.relics_created.inc();
        info!(id = %relic.id, size = relic.size_bytes, tier = %relic.tier, "created relic");
        Ok(relic)
    }

    /// Read a relic's metadata, counting the access.
    pub async fn get(&self, id: &str, password: Option<&str>) -> Result<Relic> {
        let relic = self.readable(id)?;
        check_password(&relic, password).await?;

        let tx = self.store.write()?;
        // deleted while the password was checked
        let mut relic = live_row(&tx, id)?;
        relic.access_count += 1;
        tx.update_relic(&relic)?;
        tx.commit()?;
        self.metrics.relic_reads.inc();
        Ok(relic)
    }

    /// Read a relic's payload.
    pub async fn get_raw(&self, id: &str, password: Option<&str>) -> Result<RawContent> {
        let relic = self.readable(id)?;
        check_password(&relic, password).await?;
        let data = self.fetch(&relic).await?;
        self.metrics.raw_reads.inc();
        let file_name = relic.download_name().to_string();
        Ok(RawContent {
            data,
            content_type: relic.content_type,
            file_name,
        })
    }

    /// Patch a relic's metadata in place. The tier never changes.
    pub async fn update(&self, key: Option<&str>, id: &str, update: RelicUpdate) -> Result<Relic> {
        let caller = self.clients.require(key)?;
        let access_level = parse_access_level(update.access_level.as_deref())?;
        if let Some(content_type) = &update.content_type {
            ensure!(
                !content_type.trim().is_empty(),
                InvalidArgumentSnafu {
                    message: "content_type must not be empty"
                }
            );
        }
        let password_hash = match update.password {
            None => None,
            Some(password) => Some(hash_optional(Some(password)).await?),
        };

        let tx = self.store.write()?;
        let mut relic = live_row(&tx, id)?;
        ensure!(
            caller.can_manage(relic.client_id.as_deref()),
            ForbiddenSnafu {
                reason: "not allowed to modify this relic"
            }
        );
        if let Some(name) = update.name {
            relic.name = non_empty(Some(name));
        }
        if let Some(content_type) = update.content_type {
            relic.content_type = content_type;
        }
        if let Some(hint) = update.language_hint {
            relic.language_hint = non_empty(Some(hint));
        }
        if let Some(level) = access_level {
            relic.access_level = level;
        }
        if let Some(expr) = update.expires_in.as_deref() {
            relic.expires_at = expiry::parse_expiry(Some(expr));
        }
        if let Some(hash) = password_hash {
            relic.password_hash = hash;
        }
        tx.update_relic(&relic)?;
        tx.commit()?;
        debug!(id, "updated relic metadata");
        Ok(relic)
    }

    /// Store new content as the next version of `parent_id`.
    ///
    /// The parent is not modified. The new relic inherits the parent's metadata and is owned
    /// by the caller, if any.
    pub async fn edit(
        &self,
        key: Option<&str>,
        parent_id: &str,
        upload: Upload,
        name: Option<String>,
    ) -> Result<Relic> {
        let parent = self.live(parent_id)?;
        self.check_size(&upload.data)?;
        let owner = self.clients.resolve_or_create(key)?;
        let id = self.unique_relic_id()?;

        let relic = Relic {
            id: id.clone(),
            client_id: owner.map(|caller| caller.client.id),
            name: non_empty(name).or_else(|| parent.name.clone()),
            content_type: parent.content_type.clone(),
            language_hint: parent.language_hint.clone(),
            size_bytes: upload.data.len() as u64,
            storage_key: Relic::storage_key_for(&id),
            tier: parent.tier,
            access_level: parent.access_level,
            password_hash: parent.password_hash.clone(),
            access_count: 0,
            created_at: Utc::now(),
            expires_at: parent.expires_at,
            deleted_at: None,
            parent_id: Some(parent.id.clone()),
            root_id: parent.root_id.clone(),
            version_number: parent.version_number + 1,
            fork_of: None,
        };
        let relic = self.persist(relic, upload.data).await?;
        self.metrics.relics_edited.inc();
        info!(id = %relic.id, parent = %parent.id, version = relic.version_number, "edited relic");
        Ok(relic)
    }

    /// Start a new lineage from `original_id`, reusing its payload unless new content is given.
    ///
    /// A protected original needs its password. A fork that copies the payload keeps the
    /// original's password hash.
    pub async fn fork(
        &self,
        key: Option<&str>,
        original_id: &str,
        upload: Option<Upload>,
        options: ForkOptions,
    ) -> Result<Relic> {
        let original = self.readable(original_id)?;
        check_password(&original, options.password.as_deref()).await?;
        let access_level =
            parse_access_level(options.access_level.as_deref())?.unwrap_or(original.access_level);
        let (data, upload_type, password_hash) = match upload {
            Some(upload) => (upload.data, upload.content_type, None),
            None => (
                self.fetch(&original).await?,
                None,
                original.password_hash.clone(),
            ),
        };
        self.check_size(&data)?;
        let owner = self.clients.resolve_or_create(key)?;
        let id = self.unique_relic_id()?;
        let expires_at = expiry::parse_expiry(options.expires_in.as_deref());

        let relic = Relic {
            id: id.clone(),
            client_id: owner.map(|caller| caller.client.id),
            name: non_empty(options.name).or_else(|| original.name.clone()),
            content_type: non_empty(options.content_type)
                .or(upload_type)
                .unwrap_or_else(|| original.content_type.clone()),
            language_hint: original.language_hint.clone(),
            size_bytes: data.len() as u64,
            storage_key: Relic::storage_key_for(&id),
            tier: Tier::for_expiry(expires_at.as_ref()),
            access_level,
            password_hash,
            access_count: 0,
            created_at: Utc::now(),
            expires_at,
            deleted_at: None,
            parent_id: None,
            root_id: id,
            version_number: 1,
            fork_of: Some(original.id.clone()),
        };
        let relic = self.persist(relic, data).await?;
        self.metrics.relics_forked.inc();
        info!(id = %relic.id, fork_of = %original.id, "forked relic");
        Ok(relic)
    }

    /// Soft-delete a relic owned by the caller, or any relic for admins.
    pub async fn delete(&self, key: Option<&str>, id: &str) -> Result<()> {
        let caller = self.clients.require(key)?;
        let relic = self.live(id)?;
        ensure!(
            caller.can_manage(relic.client_id.as_deref()),
            ForbiddenSnafu {
                reason: "not allowed to delete this relic"
            }
        );
        ensure!(self.discard(&relic).await?, NotFoundSnafu { what: "relic" });
        self.metrics.relics_deleted.inc();
        info!(id, by = caller.id(), "deleted relic");
        Ok(())
    }

    /// Delete the payload and soft-delete the row, decrementing the owner's count.
    ///
    /// Returns `false` if the row was already gone or soft-deleted. A failing blob delete is
    /// logged and does not stop the metadata update.
    pub(crate) async fn discard(&self, relic: &Relic) -> Result<bool> {
        if let Err(err) = self.blobs.delete(relic.tier, &relic.storage_key).await {
            if !err.is_not_found() {
                self.metrics.blob_errors.inc();
            }
            warn!(id = %relic.id, storage_key = %relic.storage_key, "failed to delete blob: {err}");
        }

        let tx = self.store.write()?;
        let Some(mut current) = tx.relic(&relic.id)? else {
            return Ok(false);
        };
        if current.is_deleted() {
            return Ok(false);
        }
        current.deleted_at = Some(Utc::now());
        tx.update_relic(&current)?;
        if let Some(owner) = &current.client_id {
            decrement_relic_count(&tx, owner)?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Walk the parent chain of a relic back to the root.
    pub fn history(&self, id: &str) -> Result<History> {
        let tx = self.store.read()?;
        let Some(current) = tx.relic(id)? else {
            return NotFoundSnafu { what: "relic" }.fail();
        };
        let mut versions = vec![VersionEntry::from(&current)];
        let mut next = current.parent_id.clone();
        while let Some(parent_id) = next {
            // a purged parent ends the walk
            let Some(parent) = tx.relic(&parent_id)? else {
                break;
            };
            versions.push(VersionEntry::from(&parent));
            next = parent.parent_id;
        }
        versions.reverse();
        Ok(History {
            root_id: current.root_id,
            current_id: current.id,
            current_version: current.version_number,
            versions,
        })
    }

    /// The previous version of a relic.
    pub fn parent(&self, id: &str) -> Result<Relic> {
        let relic = self.live(id)?;
        let Some(parent_id) = relic.parent_id else {
            return NotFoundSnafu { what: "parent" }.fail();
        };
        match self.store.read()?.relic(&parent_id)? {
            Some(parent) if !parent.is_deleted() => Ok(parent),
            _ => NotFoundSnafu { what: "parent" }.fail(),
        }
    }

    /// Non-deleted relics whose parent is `id`.
    pub fn children(&self, id: &str) -> Result<Vec<Relic>> {
        let children = self.store.read()?.children(id)?;
        Ok(children.into_iter().filter(|r| !r.is_deleted()).collect())
    }

    /// Compare two relics, each unlocked by its own password if protected.
    ///
    /// Text payloads get a unified line diff, anything else a size comparison.
    pub async fn diff(
        &self,
        from_id: &str,
        to_id: &str,
        from_password: Option<&str>,
        to_password: Option<&str>,
    ) -> Result<RelicDiff> {
        let from = self.readable(from_id)?;
        let to = self.readable(to_id)?;
        check_password(&from, from_password).await?;
        check_password(&to, to_password).await?;
        if !diff::is_text(&from.content_type) && !diff::is_text(&to.content_type) {
            return Ok(RelicDiff {
                from_id: from.id,
                to_id: to.id,
                diff: BINARY_DIFF.to_string(),
                additions: 0,
                deletions: 0,
                from_size: Some(from.size_bytes),
                to_size: Some(to.size_bytes),
            });
        }
        let (from_data, to_data) = tokio::try_join!(self.fetch(&from), self.fetch(&to))?;
        let line_diff = diff::line_diff(&from_data, &to_data, &from.id, &to.id);
        Ok(RelicDiff {
            from_id: from.id,
            to_id: to.id,
            diff: line_diff.unified,
            additions: line_diff.additions,
            deletions: line_diff.deletions,
            from_size: None,
            to_size: None,
        })
    }

    /// Compare a relic with its parent.
    ///
    /// Versions share their password, so one password unlocks both sides.
    pub async fn diff_with_parent(&self, id: &str, password: Option<&str>) -> Result<RelicDiff> {
        let relic = self.readable(id)?;
        let Some(parent_id) = relic.parent_id else {
            return NotFoundSnafu { what: "parent" }.fail();
        };
        self.diff(&parent_id, id, password, password).await
    }

    /// Public, live relics, newest first.
    pub fn list(&self, page: Page) -> Result<(Vec<Relic>, usize)> {
        let now = Utc::now();
        let relics = self.store.read()?.relics_newest_first()?;
        Ok(page.apply(relics.into_iter().filter(|r| {
            r.access_level == AccessLevel::Public && !r.is_deleted() && !r.is_expired_at(now)
        })))
    }

    /// The caller's non-deleted relics, newest first.
    pub fn list_owned(&self, key: Option<&str>) -> Result<(Caller, Vec<Relic>)> {
        let caller = self.clients.require(key)?;
        let relics = self.store.read()?.relics_of_client(caller.id())?;
        let relics = relics.into_iter().filter(|r| !r.is_deleted()).collect();
        Ok((caller, relics))
    }

    fn live(&self, id: &str) -> Result<Relic> {
        match self.store.read()?.relic(id)? {
            Some(relic) if !relic.is_deleted() => Ok(relic),
            _ => NotFoundSnafu { what: "relic" }.fail(),
        }
    }

    fn readable(&self, id: &str) -> Result<Relic> {
        let relic = self.live(id)?;
        ensure!(!relic.is_expired_at(Utc::now()), GoneSnafu);
        Ok(relic)
    }

    fn check_size(&self, data: &Bytes) -> Result<()> {
        let size = data.len() as u64;
        ensure!(
            size <= self.max_upload_size,
            PayloadTooLargeSnafu {
                size,
                max: self.max_upload_size
            }
        );
        Ok(())
    }

    fn unique_relic_id(&self) -> Result<String> {
        let tx = self.store.read()?;
        id::generate_unique_id(id::DEFAULT_MAX_RETRIES, |id| Ok(tx.relic_exists(id)?))
    }

    async fn fetch(&self, relic: &Relic) -> Result<Bytes> {
        self.blobs
            .get(relic.tier, &relic.storage_key)
            .await
            .map_err(|err| self.blob_failure(err))
    }

    fn blob_failure(&self, source: BlobError) -> Error {
        self.metrics.blob_errors.inc();
        Error::StorageUnavailable { source }
    }

    async fn persist(&self, relic: Relic, data: Bytes) -> Result<Relic> {
        self.blobs
            .put(relic.tier, &relic.storage_key, data)
            .await
            .map_err(|err| self.blob_failure(err))?;
        if let Err(err) = self.insert_row(&relic) {
            warn!(id = %relic.id, storage_key = %relic.storage_key, "metadata commit failed, blob is orphaned: {err}");
            return Err(err);
        }
        Ok(relic)
    }

    fn insert_row(&self, relic: &Relic) -> Result<()> {
        let tx = self.store.write()?;
        ensure!(
            !tx.relic_exists(&relic.id)?,
            ConflictSnafu {
                message: "relic id already taken"
            }
        );
        tx.insert_relic(relic)?;
        if let Some(owner) = &relic.client_id {
            if let Some(mut client) = tx.client(owner)? {
                client.relic_count += 1;
                tx.put_client(&client)?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Decrement a client's relic count, floored at zero.
pub(crate) fn decrement_relic_count(tx: &WriteTx, client_id: &str) -> Result<()> {
    if let Some(mut client) = tx.client(client_id)? {
        client.relic_count = client.relic_count.saturating_sub(1);
        tx.put_client(&client)?;
    }
    Ok(())
}

fn live_row(tx: &WriteTx, id: &str) -> Result<Relic> {
    match tx.relic(id)? {
        Some(relic) if !relic.is_deleted() => Ok(relic),
        _ => NotFoundSnafu { what: "relic" }.fail(),
    }
}

async fn check_password(relic: &Relic, password: Option<&str>) -> Result<()> {
    let Some(hash) = &relic.password_hash else {
        return Ok(());
    };
    match password {
        None | Some("") => ForbiddenSnafu {
            reason: "this relic requires a password",
        }
        .fail(),
        Some(password) => {
            ensure!(
                password::verify(password.to_string(), hash.clone()).await?,
                ForbiddenSnafu {
                    reason: "invalid password"
                }
            );
            Ok(())
        }
    }
}

fn parse_access_level(value: Option<&str>) -> Result<Option<AccessLevel>> {
    value.map(AccessLevel::parse).transpose()
}

async fn hash_optional(password: Option<String>) -> Result<Option<String>> {
    match password.filter(|p| !p.is_empty()) {
        None => Ok(None),
        Some(password) => password::hash(password).await.map(Some),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use testresult::TestResult;

    use super::*;
    use crate::state::AppState;

    fn text(data: &'static str) -> Upload {
        Upload {
            data: Bytes::from_static(data.as_bytes()),
            file_name: Some("notes.txt".to_string()),
            content_type: Some("text/plain".to_string()),
        }
    }

    fn relic_count(state: &AppState, client: &str) -> u64 {
        state
            .store
            .read()
            .unwrap()
            .client(client)
            .unwrap()
            .map(|c| c.relic_count)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn create_and_get() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let a = relics
            .create(Some("alice"), text("hello"), NewRelic::default())
            .await?;
        let b = relics.create(None, text("hello"), NewRelic::default()).await?;
        assert_ne!(a.id, b.id);
        assert_eq!(a.root_id, a.id);
        assert_eq!(a.version_number, 1);
        assert_eq!(a.tier, Tier::Standard);
        assert_eq!(a.name.as_deref(), Some("notes.txt"));
        assert_eq!(a.content_type, "text/plain");
        assert_eq!(b.client_id, None);

        let got = relics.get(&a.id, None).await?;
        assert_eq!(got.access_count, 1);
        assert_eq!(relics.get(&a.id, None).await?.access_count, 2);
        let raw = relics.get_raw(&a.id, None).await?;
        assert_eq!(raw.data, "hello");
        assert_eq!(raw.file_name, "notes.txt");
        assert_eq!(relics.get(&a.id, None).await?.access_count, 3);
        assert_eq!(relic_count(&state, "alice"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn create_defaults_and_validation() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let upload = Upload {
            data: Bytes::from_static(b"\x00\x01"),
            ..Default::default()
        };
        let relic = relics
            .create(None, upload.clone(), NewRelic::default())
            .await?;
        assert_eq!(relic.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(relic.download_name(), relic.id);

        let bad = NewRelic {
            access_level: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            relics.create(None, upload, bad).await,
            Err(Error::InvalidArgument { .. })
        ));

        let big = Upload {
            data: Bytes::from(vec![0u8; 2048]),
            ..Default::default()
        };
        assert!(matches!(
            relics.create(None, big, NewRelic::default()).await,
            Err(Error::PayloadTooLarge { size: 2048, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn expiry_picks_tier_and_gone() -> TestResult {
        let (state, blobs) = AppState::for_tests();
        let relics = &state.relics;
        let relic = relics
            .create(
                None,
                text("short lived"),
                NewRelic {
                    expires_in: Some("1h".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(relic.tier, Tier::Ephemeral);
        assert!(blobs.contains(Tier::Ephemeral, &relic.storage_key));

        let tx = state.store.write()?;
        let mut row = tx.relic(&relic.id)?.unwrap();
        row.expires_at = Some(Utc::now() - TimeDelta::seconds(1));
        tx.update_relic(&row)?;
        tx.commit()?;

        assert!(matches!(relics.get(&relic.id, None).await, Err(Error::Gone)));
        assert!(matches!(
            relics.get_raw(&relic.id, None).await,
            Err(Error::Gone)
        ));
        let (listed, total) = relics.list(Page::default())?;
        assert!(listed.is_empty());
        assert_eq!(total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn edits_form_a_lineage() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let root = relics
            .create(
                Some("alice"),
                text("v1"),
                NewRelic {
                    name: Some("doc".to_string()),
                    language_hint: Some("rust".to_string()),
                    access_level: Some("private".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let mut current = root.clone();
        for depth in 1..=4u32 {
            current = relics
                .edit(Some("bob"), &current.id, text("next"), None)
                .await?;
            assert_eq!(current.version_number, depth + 1);
            assert_eq!(current.root_id, root.id);
            assert_eq!(current.access_level, AccessLevel::Private);
            assert_eq!(current.language_hint.as_deref(), Some("rust"));
            assert_eq!(current.name.as_deref(), Some("doc"));
            assert_eq!(current.client_id.as_deref(), Some("bob"));
        }

        let history = relics.history(&current.id)?;
        assert_eq!(history.versions.len(), 5);
        assert_eq!(history.root_id, root.id);
        assert_eq!(history.current_id, current.id);
        assert_eq!(history.current_version, 5);
        let versions: Vec<_> = history.versions.iter().map(|v| v.version).collect();
        assert_eq!(versions, [1, 2, 3, 4, 5]);
        assert_eq!(history.versions[0].id, root.id);

        let children = relics.children(&root.id)?;
        assert_eq!(children.len(), 1);
        assert_eq!(relics.parent(&children[0].id)?.id, root.id);
        assert!(matches!(
            relics.parent(&root.id),
            Err(Error::NotFound { what: "parent" })
        ));
        assert_eq!(relics.get(&root.id, None).await?.version_number, 1);
        assert_eq!(relic_count(&state, "bob"), 4);
        Ok(())
    }

    #[tokio::test]
    async fn forks_start_new_lineages() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let root = relics.create(None, text("base"), NewRelic::default()).await?;
        let child = relics.edit(None, &root.id, text("base 2"), None).await?;

        let fork = relics
            .fork(Some("carol"), &child.id, None, ForkOptions::default())
            .await?;
        assert_eq!(fork.version_number, 1);
        assert_eq!(fork.root_id, fork.id);
        assert_ne!(fork.root_id, root.root_id);
        assert_eq!(fork.fork_of.as_deref(), Some(child.id.as_str()));
        assert_eq!(fork.parent_id, None);
        assert_eq!(fork.content_type, "text/plain");
        assert_eq!(relics.get_raw(&fork.id, None).await?.data, "base 2");

        let replaced = relics
            .fork(
                None,
                &root.id,
                Some(text("other")),
                ForkOptions {
                    expires_in: Some("1d".to_string()),
                    access_level: Some("private".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(replaced.tier, Tier::Ephemeral);
        assert_eq!(replaced.access_level, AccessLevel::Private);
        assert_eq!(replaced.size_bytes, 5);
        Ok(())
    }

    #[tokio::test]
    async fn delete_authorization() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let relic = relics
            .create(Some("alice"), text("mine"), NewRelic::default())
            .await?;
        state.clients.register(Some("mallory"))?;

        assert!(matches!(
            relics.delete(None, &relic.id).await,
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            relics.delete(Some("mallory"), &relic.id).await,
            Err(Error::Forbidden { .. })
        ));
        assert_eq!(relic_count(&state, "alice"), 1);

        relics.delete(Some("alice"), &relic.id).await?;
        assert!(matches!(
            relics.get(&relic.id, None).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            relics.delete(Some("alice"), &relic.id).await,
            Err(Error::NotFound { .. })
        ));
        assert_eq!(relic_count(&state, "alice"), 0);

        let other = relics
            .create(Some("alice"), text("again"), NewRelic::default())
            .await?;
        relics.delete(Some("admin"), &other.id).await?;
        assert_eq!(relic_count(&state, "alice"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn blob_delete_failure_does_not_block_delete() -> TestResult {
        let (state, blobs) = AppState::for_tests();
        let relics = &state.relics;
        let relic = relics
            .create(Some("alice"), text("sticky"), NewRelic::default())
            .await?;
        blobs.fail_deletes(true);
        relics.delete(Some("alice"), &relic.id).await?;
        assert!(blobs.contains(Tier::Standard, &relic.storage_key));
        assert!(matches!(
            relics.get(&relic.id, None).await,
            Err(Error::NotFound { .. })
        ));
        assert_eq!(state.metrics.blob_errors.get(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn passwords() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let relic = relics
            .create(
                Some("alice"),
                text("secret"),
                NewRelic {
                    password: Some("hunter2".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        assert!(matches!(
            relics.get(&relic.id, None).await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            relics.get(&relic.id, Some("nope")).await,
            Err(Error::Forbidden {
                reason: "invalid password"
            })
        ));
        assert!(matches!(
            relics.get_raw(&relic.id, None).await,
            Err(Error::Forbidden { .. })
        ));
        assert_eq!(relics.get(&relic.id, Some("hunter2")).await?.id, relic.id);

        // versions keep the password
        let next = relics.edit(None, &relic.id, text("v2"), None).await?;
        assert!(next.is_password_protected());
        // a fork of the same content keeps it, new content does not
        let unlocked = ForkOptions {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let fork = relics
            .fork(None, &relic.id, None, unlocked.clone())
            .await?;
        assert!(fork.is_password_protected());
        let fork = relics
            .fork(None, &relic.id, Some(text("public")), unlocked)
            .await?;
        assert!(!fork.is_password_protected());

        let update = RelicUpdate {
            password: Some(String::new()),
            ..Default::default()
        };
        relics.update(Some("alice"), &relic.id, update).await?;
        assert_eq!(relics.get(&relic.id, None).await?.id, relic.id);
        Ok(())
    }

    #[tokio::test]
    async fn update_metadata() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let relic = relics
            .create(
                Some("alice"),
                text("x"),
                NewRelic {
                    expires_in: Some("1h".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        state.clients.register(Some("bob"))?;

        let update = RelicUpdate {
            name: Some("renamed".to_string()),
            access_level: Some("private".to_string()),
            expires_in: Some("never".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            relics.update(Some("bob"), &relic.id, update.clone()).await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            relics.update(None, &relic.id, update.clone()).await,
            Err(Error::Unauthorized)
        ));
        let updated = relics.update(Some("alice"), &relic.id, update).await?;
        assert_eq!(updated.name.as_deref(), Some("renamed"));
        assert_eq!(updated.access_level, AccessLevel::Private);
        assert_eq!(updated.expires_at, None);
        assert_eq!(updated.tier, Tier::Ephemeral);

        let bad = RelicUpdate {
            access_level: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            relics.update(Some("alice"), &relic.id, bad).await,
            Err(Error::InvalidArgument { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn diffs() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let parent = relics
            .create(None, text("Line 1\nLine 2\n"), NewRelic::default())
            .await?;
        let child = relics
            .edit(None, &parent.id, text("Line 1\nLine 2 Modified\nLine 3\n"), None)
            .await?;

        let diff = relics.diff_with_parent(&child.id, None).await?;
        assert_eq!(diff.from_id, parent.id);
        assert_eq!(diff.to_id, child.id);
        assert!(diff.additions > 0);
        assert!(diff.deletions > 0);
        assert!(diff.diff.contains("+Line 3"));

        let same = relics.diff(&parent.id, &parent.id, None, None).await?;
        assert_eq!((same.additions, same.deletions), (0, 0));

        assert!(matches!(
            relics.diff_with_parent(&parent.id, None).await,
            Err(Error::NotFound { what: "parent" })
        ));
        assert!(matches!(
            relics.diff(&parent.id, "missing", None, None).await,
            Err(Error::NotFound { .. })
        ));

        let png = |data: &'static [u8]| Upload {
            data: Bytes::from_static(data),
            file_name: None,
            content_type: Some("image/png".to_string()),
        };
        let a = relics.create(None, png(b"abc"), NewRelic::default()).await?;
        let b = relics.create(None, png(b"abcdef"), NewRelic::default()).await?;
        let binary = relics.diff(&a.id, &b.id, None, None).await?;
        assert_eq!(binary.diff, BINARY_DIFF);
        assert_eq!((binary.from_size, binary.to_size), (Some(3), Some(6)));
        Ok(())
    }

    #[tokio::test]
    async fn locked_relics_stay_locked_through_forks_and_diffs() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let open = relics.create(None, text("open\n"), NewRelic::default()).await?;
        let locked = relics
            .create(
                None,
                text("secret\n"),
                NewRelic {
                    password: Some("hunter2".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        let next = relics
            .edit(None, &locked.id, text("secret 2\n"), None)
            .await?;

        assert!(matches!(
            relics.fork(None, &locked.id, None, ForkOptions::default()).await,
            Err(Error::Forbidden {
                reason: "this relic requires a password"
            })
        ));
        let wrong = ForkOptions {
            password: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            relics.fork(None, &locked.id, Some(text("x")), wrong).await,
            Err(Error::Forbidden {
                reason: "invalid password"
            })
        ));

        assert!(matches!(
            relics.diff(&open.id, &locked.id, None, None).await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            relics.diff(&locked.id, &open.id, Some("nope"), None).await,
            Err(Error::Forbidden { .. })
        ));
        // each side is unlocked by its own password
        assert!(matches!(
            relics.diff(&open.id, &locked.id, Some("hunter2"), None).await,
            Err(Error::Forbidden { .. })
        ));
        let diff = relics
            .diff(&open.id, &locked.id, None, Some("hunter2"))
            .await?;
        assert!(diff.diff.contains("+secret"));

        assert!(matches!(
            relics.diff_with_parent(&next.id, None).await,
            Err(Error::Forbidden { .. })
        ));
        let diff = relics.diff_with_parent(&next.id, Some("hunter2")).await?;
        assert_eq!(diff.from_id, locked.id);
        assert!(diff.diff.contains("+secret 2"));
        Ok(())
    }

    #[tokio::test]
    async fn expired_relics_cannot_be_forked_or_diffed() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let root = relics.create(None, text("old\n"), NewRelic::default()).await?;
        let child = relics.edit(None, &root.id, text("new\n"), None).await?;
        let other = relics.create(None, text("other\n"), NewRelic::default()).await?;

        let tx = state.store.write()?;
        let mut row = tx.relic(&root.id)?.unwrap();
        row.expires_at = Some(Utc::now() - TimeDelta::seconds(1));
        tx.update_relic(&row)?;
        tx.commit()?;

        assert!(matches!(
            relics.fork(None, &root.id, None, ForkOptions::default()).await,
            Err(Error::Gone)
        ));
        assert!(matches!(
            relics.diff(&root.id, &other.id, None, None).await,
            Err(Error::Gone)
        ));
        assert!(matches!(
            relics.diff(&other.id, &root.id, None, None).await,
            Err(Error::Gone)
        ));
        assert!(matches!(
            relics.diff_with_parent(&child.id, None).await,
            Err(Error::Gone)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn get_after_delete_is_not_found() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let relic = relics
            .create(
                Some("alice"),
                text("short"),
                NewRelic {
                    password: Some("hunter2".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(relics.get(&relic.id, Some("hunter2")).await?.access_count, 1);
        relics.delete(Some("alice"), &relic.id).await?;
        assert!(matches!(
            relics.get(&relic.id, Some("hunter2")).await,
            Err(Error::NotFound { what: "relic" })
        ));
        let tx = state.store.read()?;
        let row = tx.relic(&relic.id)?.unwrap();
        assert!(row.deleted_at.is_some());
        assert_eq!(row.access_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn listings() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relics = &state.relics;
        let first = relics
            .create(Some("alice"), text("1"), NewRelic::default())
            .await?;
        let _private = relics
            .create(
                Some("alice"),
                text("2"),
                NewRelic {
                    access_level: Some("private".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        let deleted = relics
            .create(Some("alice"), text("3"), NewRelic::default())
            .await?;
        let last = relics.create(None, text("4"), NewRelic::default()).await?;
        relics.delete(Some("alice"), &deleted.id).await?;

        let (listed, total) = relics.list(Page::default())?;
        assert_eq!(total, 2);
        let ids: Vec<_> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, [last.id.as_str(), first.id.as_str()]);

        let (caller, owned) = relics.list_owned(Some("alice"))?;
        assert_eq!(caller.client.relic_count, 2);
        assert_eq!(owned.len(), 2);
        assert!(matches!(relics.list_owned(None), Err(Error::Unauthorized)));
        Ok(())
    }
}
