use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use snafu::ResultExt;
use tracing::{debug, info};

use super::{BlobError, BlobInfo, BlobStore, IoSnafu, NotFoundSnafu, Tier, validate_key};

const PARTIAL_SUFFIX: &str = ".partial";

/// Blob store keeping each payload in a file below `<root>/<tier>/`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the tier directories.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        info!("using blob directory {}", root.display());
        for tier in [Tier::Standard, Tier::Ephemeral] {
            let dir = root.join(tier_dir(tier));
            tokio::fs::create_dir_all(&dir)
                .await
                .context(IoSnafu { key: tier_dir(tier) })?;
        }
        Ok(Self { root })
    }

    fn path(&self, tier: Tier, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        let mut path = self.root.join(tier_dir(tier));
        path.extend(key.split('/'));
        Ok(path)
    }
}

fn tier_dir(tier: Tier) -> &'static str {
    match tier {
        Tier::Standard => "standard",
        Tier::Ephemeral => "ephemeral",
    }
}

fn not_found(err: io::Error, tier: Tier, key: &str) -> BlobError {
    if err.kind() == io::ErrorKind::NotFound {
        NotFoundSnafu { tier, key }.build()
    } else {
        BlobError::Io {
            key: key.to_string(),
            source: err,
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, tier: Tier, key: &str, data: Bytes) -> Result<(), BlobError> {
        let path = self.path(tier, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(IoSnafu { key })?;
        }
        // write to a sibling file and rename so readers never see partial payloads
        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        tokio::fs::write(&partial, &data)
            .await
            .context(IoSnafu { key })?;
        tokio::fs::rename(&partial, &path)
            .await
            .context(IoSnafu { key })?;
        debug!(%tier, key, size = data.len(), "stored blob");
        Ok(())
    }

    async fn get(&self, tier: Tier, key: &str) -> Result<Bytes, BlobError> {
        let path = self.path(tier, key)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|err| not_found(err, tier, key))?;
        Ok(data.into())
    }

    async fn delete(&self, tier: Tier, key: &str) -> Result<(), BlobError> {
        let path = self.path(tier, key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|err| not_found(err, tier, key))
    }

    async fn exists(&self, tier: Tier, key: &str) -> Result<bool, BlobError> {
        let path = self.path(tier, key)?;
        tokio::fs::try_exists(&path).await.context(IoSnafu { key })
    }

    async fn list(&self, tier: Tier, prefix: &str) -> Result<Vec<BlobInfo>, BlobError> {
        let (dir, name_prefix) = match prefix.rsplit_once('/') {
            Some((dir, name)) => (Some(dir), name),
            None => (None, prefix),
        };
        let dir_path = match dir {
            Some(dir) => self.path(tier, dir)?,
            None => self.root.join(tier_dir(tier)),
        };
        let mut entries = match tokio::fs::read_dir(&dir_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err).context(IoSnafu { key: prefix }),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await.context(IoSnafu { key: prefix })? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(name_prefix) || name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            let meta = entry.metadata().await.context(IoSnafu { key: &name })?;
            if !meta.is_file() {
                continue;
            }
            let last_modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .context(IoSnafu { key: &name })?;
            let key = match dir {
                Some(dir) => format!("{dir}/{name}"),
                None => name,
            };
            out.push(BlobInfo {
                key,
                size: meta.len(),
                last_modified,
            });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[tokio::test]
    async fn put_get_delete() -> TestResult {
        let dir = tempfile::tempdir()?;
        let store = FsBlobStore::open(dir.path()).await?;

        store
            .put(Tier::Standard, "relics/abc", Bytes::from_static(b"payload"))
            .await?;
        assert!(dir.path().join("standard/relics/abc").is_file());
        assert_eq!(store.get(Tier::Standard, "relics/abc").await?, "payload");
        assert!(store.exists(Tier::Standard, "relics/abc").await?);
        assert!(!store.exists(Tier::Ephemeral, "relics/abc").await?);

        store.delete(Tier::Standard, "relics/abc").await?;
        let err = store.get(Tier::Standard, "relics/abc").await.unwrap_err();
        assert!(err.is_not_found());
        let err = store.delete(Tier::Standard, "relics/abc").await.unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn list_by_prefix() -> TestResult {
        let dir = tempfile::tempdir()?;
        let store = FsBlobStore::open(dir.path()).await?;
        assert!(store.list(Tier::Standard, "db/backup-").await?.is_empty());

        for key in ["db/backup-1.json", "db/backup-2.json", "db/other.json"] {
            store
                .put(Tier::Standard, key, Bytes::from_static(b"{}"))
                .await?;
        }
        let keys: Vec<_> = store
            .list(Tier::Standard, "db/backup-")
            .await?
            .into_iter()
            .map(|info| info.key)
            .collect();
        assert_eq!(keys, ["db/backup-1.json", "db/backup-2.json"]);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_escaping_keys() -> TestResult {
        let dir = tempfile::tempdir()?;
        let store = FsBlobStore::open(dir.path()).await?;
        let err = store
            .put(Tier::Standard, "../escape", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidKey { .. }));
        Ok(())
    }
}
