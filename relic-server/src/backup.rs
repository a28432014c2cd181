//! Metadata backups stored in the blob store.
//!
//! A backup is a JSON document holding every metadata table, written to the standard tier under
//! `db/backup-<timestamp>-<kind>.json`. Backups older than the retention window are pruned after
//! each successful backup.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    blobs::{BlobError, Blobs, Tier},
    error::{BackupSnafu, Error, InvalidArgumentSnafu, NotFoundSnafu, Result},
    metrics::Metrics,
    models::{Bookmark, Client, Comment, Relic, Report},
    store::MetadataStore,
};

/// Blob key prefix of backup documents.
pub const BACKUP_PREFIX: &str = "db/backup-";
const BACKUP_DIR: &str = "db/";
const BACKUP_SUFFIX: &str = ".json";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// Format version of [`Snapshot`] documents.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Backup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Run the backup scheduler.
    pub enabled: bool,
    /// Time between scheduled backups.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Age after which backups are pruned.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Back up once when the server starts.
    pub on_startup: bool,
    /// Back up once when the server shuts down.
    pub on_shutdown: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(24 * 60 * 60),
            retention: Duration::from_secs(30 * 24 * 60 * 60),
            on_startup: false,
            on_shutdown: false,
        }
    }
}

/// What triggered a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BackupKind {
    /// Periodic scheduler run.
    Scheduled,
    /// Requested by an admin.
    Manual,
    /// Server start.
    Startup,
    /// Server shutdown.
    Shutdown,
}

/// Contents of a backup document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Snapshot {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub relics: Vec<Relic>,
    pub clients: Vec<Client>,
    pub bookmarks: Vec<Bookmark>,
    pub comments: Vec<Comment>,
    pub reports: Vec<Report>,
}

/// A stored backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    /// Blob key.
    pub key: String,
    /// File name, as accepted by [`BackupService::download`].
    pub filename: String,
    /// Time the backup was taken.
    pub timestamp: DateTime<Utc>,
    /// Document size.
    pub size_bytes: u64,
    /// Blob modification time.
    pub last_modified: DateTime<Utc>,
}

/// Takes, lists and prunes backups.
#[derive(Debug, Clone)]
pub struct BackupService {
    store: MetadataStore,
    blobs: Blobs,
    metrics: Arc<Metrics>,
    retention: Duration,
}

impl BackupService {
    /// Create the service.
    pub fn new(
        store: MetadataStore,
        blobs: Blobs,
        metrics: Arc<Metrics>,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            blobs,
            metrics,
            retention,
        }
    }

    /// Read every table into a [`Snapshot`].
    pub fn snapshot(&self) -> Result<Snapshot> {
        let tx = self.store.read()?;
        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            created_at: Utc::now(),
            relics: tx.relics_newest_first()?,
            clients: tx.clients()?,
            bookmarks: tx.bookmarks()?,
            comments: tx.comments()?,
            reports: tx.reports()?,
        })
    }

    /// Take a backup and prune old ones.
    pub async fn create(&self, kind: BackupKind) -> Result<BackupInfo> {
        match self.write_backup(kind).await {
            Ok(info) => {
                self.metrics.backups_created.inc();
                info!(key = %info.key, size = info.size_bytes, "backup written");
                if let Err(err) = self.prune(Utc::now()).await {
                    warn!("failed to prune backups: {err}");
                }
                Ok(info)
            }
            Err(err) => {
                self.metrics.backups_failed.inc();
                warn!(%kind, "backup failed: {err}");
                Err(err)
            }
        }
    }

    async fn write_backup(&self, kind: BackupKind) -> Result<BackupInfo> {
        let snapshot = self.snapshot()?;
        let data = serde_json::to_vec_pretty(&snapshot).context(BackupSnafu)?;
        let timestamp = snapshot.created_at;
        let filename = format!(
            "backup-{}-{kind}{BACKUP_SUFFIX}",
            timestamp.format(TIMESTAMP_FORMAT)
        );
        let key = format!("{BACKUP_DIR}{filename}");
        let size_bytes = data.len() as u64;
        self.blobs
            .put(Tier::Standard, &key, Bytes::from(data))
            .await
            .map_err(|err| self.blob_failure(err))?;
        Ok(BackupInfo {
            key,
            filename,
            timestamp,
            size_bytes,
            last_modified: timestamp,
        })
    }

    /// Stored backups, newest first.
    pub async fn list(&self) -> Result<Vec<BackupInfo>> {
        let blobs = self
            .blobs
            .list(Tier::Standard, BACKUP_PREFIX)
            .await
            .map_err(|err| self.blob_failure(err))?;
        let mut out: Vec<_> = blobs
            .into_iter()
            .filter_map(|blob| {
                let filename = blob.key.strip_prefix(BACKUP_DIR)?.to_string();
                if !is_backup_filename(&filename) {
                    return None;
                }
                let timestamp = parse_timestamp(&filename).unwrap_or(blob.last_modified);
                Some(BackupInfo {
                    key: blob.key,
                    filename,
                    timestamp,
                    size_bytes: blob.size,
                    last_modified: blob.last_modified,
                })
            })
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    /// Fetch a backup document by file name.
    pub async fn download(&self, filename: &str) -> Result<Bytes> {
        ensure!(
            is_backup_filename(filename),
            InvalidArgumentSnafu {
                message: "invalid backup filename"
            }
        );
        let key = format!("{BACKUP_DIR}{filename}");
        match self.blobs.get(Tier::Standard, &key).await {
            Ok(data) => Ok(data),
            Err(err) if err.is_not_found() => NotFoundSnafu { what: "backup" }.fail(),
            Err(err) => Err(self.blob_failure(err)),
        }
    }

    /// Delete backups taken before `now - retention`. Returns the number deleted.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<usize> {
        let Ok(retention) = chrono::TimeDelta::from_std(self.retention) else {
            return Ok(0);
        };
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return Ok(0);
        };
        let mut pruned = 0;
        for backup in self.list().await? {
            if backup.timestamp >= cutoff {
                continue;
            }
            match self.blobs.delete(Tier::Standard, &backup.key).await {
                Ok(()) => {
                    debug!(key = %backup.key, "pruned backup");
                    pruned += 1;
                }
                Err(err) => warn!(key = %backup.key, "failed to prune backup: {err}"),
            }
        }
        Ok(pruned)
    }

    /// Run scheduled backups every `interval` until `cancel` fires.
    pub fn spawn_scheduler(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // failures are logged and counted in `create`
                        self.create(BackupKind::Scheduled).await.ok();
                    }
                }
            }
            debug!("backup scheduler stopped");
        })
    }

    fn blob_failure(&self, source: BlobError) -> Error {
        self.metrics.blob_errors.inc();
        Error::StorageUnavailable { source }
    }
}

fn is_backup_filename(filename: &str) -> bool {
    filename.starts_with("backup-")
        && filename.ends_with(BACKUP_SUFFIX)
        && !filename.contains('/')
        && !filename.contains("..")
}

fn parse_timestamp(filename: &str) -> Option<DateTime<Utc>> {
    let rest = filename.strip_prefix("backup-")?;
    let (timestamp, _kind) = rest.split_once('-')?;
    NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|ts| ts.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use testresult::TestResult;

    use super::*;
    use crate::{
        relics::{NewRelic, Upload},
        state::AppState,
    };

    #[test]
    fn filenames() {
        assert!(is_backup_filename("backup-20260101T000000.000Z-manual.json"));
        assert!(!is_backup_filename("backup-x.sql.gz"));
        assert!(!is_backup_filename("relics-1.db"));
        assert!(!is_backup_filename("backup-../../etc/passwd.json"));
        let ts = parse_timestamp("backup-20260102T030405.678Z-startup.json").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-02T03:04:05.678+00:00");
        assert_eq!(parse_timestamp("backup-garbage.json"), None);
    }

    #[tokio::test]
    async fn backups_round_trip() -> TestResult {
        let (state, _) = AppState::for_tests();
        state
            .relics
            .create(Some("alice"), Upload::default(), NewRelic::default())
            .await?;

        let info = state.backups.create(BackupKind::Manual).await?;
        assert!(info.filename.ends_with("-manual.json"));
        let listed = state.backups.list().await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, info.filename);
        assert_eq!(listed[0].size_bytes, info.size_bytes);

        let data = state.backups.download(&info.filename).await?;
        let snapshot: Snapshot = serde_json::from_slice(&data)?;
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.relics.len(), 1);
        // alice and the test admin
        assert_eq!(snapshot.clients.len(), 2);
        assert_eq!(state.metrics.backups_created.get(), 1);

        assert!(matches!(
            state.backups.download("nope.txt").await,
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            state
                .backups
                .download("backup-20000101T000000.000Z-manual.json")
                .await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn prune_old_backups() -> TestResult {
        let (state, blobs) = AppState::for_tests();
        let old = "db/backup-20000101T000000.000Z-scheduled.json";
        state
            .blobs
            .put(Tier::Standard, old, Bytes::from_static(b"{}"))
            .await?;
        state.backups.create(BackupKind::Manual).await?;
        assert!(!blobs.contains(Tier::Standard, old));
        assert_eq!(state.backups.list().await?.len(), 1);

        // nothing else is old enough
        let pruned = state.backups.prune(Utc::now() + TimeDelta::days(1)).await?;
        assert_eq!(pruned, 0);
        Ok(())
    }

    #[tokio::test]
    async fn scheduler_stops_on_cancel() -> TestResult {
        let (state, _) = AppState::for_tests();
        let cancel = CancellationToken::new();
        let task = state
            .backups
            .clone()
            .spawn_scheduler(Duration::from_millis(20), cancel.clone());
        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
        task.await?;
        assert!(state.metrics.backups_created.get() >= 1);
        Ok(())
    }
}
