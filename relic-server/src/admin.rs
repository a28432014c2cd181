//! Admin-only views and moderation.
//!
//! Every method takes the caller's key and fails with `Unauthorized` without one and
//! `Forbidden` when the key is not listed in `admin_client_ids`.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use snafu::ensure;
use tracing::info;

use crate::{
    backup::{BackupInfo, BackupKind, BackupService},
    clients::ClientService,
    config::Config,
    error::{ForbiddenSnafu, NotFoundSnafu, Result},
    metrics::{Metrics, MetricsSnapshot},
    models::{AccessLevel, Client, Page, Relic},
    relics::RelicService,
    reports::{ReportService, ReportView},
    store::MetadataStore,
};

/// Result of an admin check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminCheck {
    /// The caller's client id, if the key is known.
    pub client_id: Option<String>,
    /// Whether the caller is an admin.
    pub is_admin: bool,
}

/// Filter for [`AdminService::list_relics`].
#[derive(Debug, Clone, Default)]
pub struct RelicFilter {
    /// Only relics with this access level.
    pub access_level: Option<AccessLevel>,
    /// Only relics owned by this client.
    pub client_id: Option<String>,
}

/// A client with its admin flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientView {
    /// The client row.
    #[serde(flatten)]
    pub client: Client,
    /// Whether the client is an admin.
    pub is_admin: bool,
}

/// Totals over the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct Stats {
    pub total_relics: usize,
    pub total_clients: usize,
    pub total_size_bytes: u64,
    pub public_relics: usize,
    pub private_relics: usize,
    pub admin_count: usize,
    pub metrics: MetricsSnapshot,
}

/// What [`AdminService::delete_client`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientDeletion {
    /// Relics that were soft-deleted.
    pub relics_deleted: usize,
    /// Relics that were kept without an owner.
    pub relics_disassociated: usize,
    /// Bookmarks removed with the client.
    pub bookmarks_removed: usize,
}

/// The admin service.
#[derive(Debug, Clone)]
pub struct AdminService {
    config: Arc<Config>,
    store: MetadataStore,
    clients: ClientService,
    relics: RelicService,
    reports: ReportService,
    backups: BackupService,
    metrics: Arc<Metrics>,
}

impl AdminService {
    /// Create the service.
    pub fn new(
        config: Arc<Config>,
        store: MetadataStore,
        clients: ClientService,
        relics: RelicService,
        reports: ReportService,
        backups: BackupService,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            store,
            clients,
            relics,
            reports,
            backups,
            metrics,
        }
    }

    /// Report whether the caller is an admin, without failing.
    pub fn check(&self, key: Option<&str>) -> Result<AdminCheck> {
        let caller = self.clients.resolve(key)?;
        Ok(AdminCheck {
            client_id: caller.as_ref().map(|c| c.client.id.clone()),
            is_admin: caller.is_some_and(|c| c.is_admin),
        })
    }

    /// All non-deleted relics, private ones included, newest first.
    pub fn list_relics(
        &self,
        key: Option<&str>,
        filter: &RelicFilter,
        page: Page,
    ) -> Result<(Vec<Relic>, usize)> {
        self.clients.require_admin(key)?;
        let relics = self.store.read()?.relics_newest_first()?;
        Ok(page.apply(relics.into_iter().filter(|r| {
            !r.is_deleted()
                && filter.access_level.is_none_or(|level| r.access_level == level)
                && filter
                    .client_id
                    .as_deref()
                    .is_none_or(|id| r.client_id.as_deref() == Some(id))
        })))
    }

    /// All clients, newest first.
    pub fn list_clients(&self, key: Option<&str>, page: Page) -> Result<(Vec<ClientView>, usize)> {
        self.clients.require_admin(key)?;
        let mut clients = self.store.read()?.clients()?;
        clients.reverse();
        Ok(page.apply(clients.into_iter().map(|client| ClientView {
            is_admin: self.clients.is_admin(&client.id),
            client,
        })))
    }

    /// Totals over live relics and clients, with the process counters.
    pub fn stats(&self, key: Option<&str>) -> Result<Stats> {
        self.clients.require_admin(key)?;
        let tx = self.store.read()?;
        let relics: Vec<_> = tx
            .relics_newest_first()?
            .into_iter()
            .filter(|r| !r.is_deleted())
            .collect();
        let public_relics = relics
            .iter()
            .filter(|r| r.access_level == AccessLevel::Public)
            .count();
        Ok(Stats {
            total_relics: relics.len(),
            total_clients: tx.clients()?.len(),
            total_size_bytes: relics.iter().map(|r| r.size_bytes).sum(),
            public_relics,
            private_relics: relics.len() - public_relics,
            admin_count: self.clients.admin_count(),
            metrics: self.metrics.snapshot(),
        })
    }

    /// Remove a client, either deleting or orphaning its relics.
    pub async fn delete_client(
        &self,
        key: Option<&str>,
        client_id: &str,
        delete_relics: bool,
    ) -> Result<ClientDeletion> {
        let admin = self.clients.require_admin(key)?;
        ensure!(
            self.store.read()?.client(client_id)?.is_some(),
            NotFoundSnafu { what: "client" }
        );
        ensure!(
            !self.clients.is_admin(client_id),
            ForbiddenSnafu {
                reason: "cannot delete an admin client"
            }
        );

        let mut outcome = ClientDeletion::default();
        let owned = self.store.read()?.relics_of_client(client_id)?;
        if delete_relics {
            for relic in owned.iter().filter(|r| !r.is_deleted()) {
                if self.relics.discard(relic).await? {
                    outcome.relics_deleted += 1;
                }
            }
        }

        let tx = self.store.write()?;
        for relic in tx.relics_of_client(client_id)? {
            let mut relic = relic;
            relic.client_id = None;
            tx.update_relic(&relic)?;
            if !delete_relics {
                outcome.relics_disassociated += 1;
            }
        }
        outcome.bookmarks_removed = tx.remove_bookmarks_of_client(client_id)?;
        tx.remove_client(client_id)?;
        tx.commit()?;
        info!(client_id, by = admin.id(), ?outcome, "deleted client");
        Ok(outcome)
    }

    /// The running configuration.
    pub fn config(&self, key: Option<&str>) -> Result<Arc<Config>> {
        self.clients.require_admin(key)?;
        Ok(self.config.clone())
    }

    /// All reports, newest first.
    pub fn list_reports(&self, key: Option<&str>) -> Result<Vec<ReportView>> {
        self.clients.require_admin(key)?;
        self.reports.list()
    }

    /// Dismiss a report.
    pub fn dismiss_report(&self, key: Option<&str>, id: &str) -> Result<()> {
        let admin = self.clients.require_admin(key)?;
        self.reports.dismiss(id)?;
        info!(id, by = admin.id(), "dismissed report");
        Ok(())
    }

    /// Stored backups, newest first.
    pub async fn list_backups(&self, key: Option<&str>) -> Result<Vec<BackupInfo>> {
        self.clients.require_admin(key)?;
        self.backups.list().await
    }

    /// Take a manual backup.
    pub async fn create_backup(&self, key: Option<&str>) -> Result<BackupInfo> {
        self.clients.require_admin(key)?;
        self.backups.create(BackupKind::Manual).await
    }

    /// Fetch a backup document.
    pub async fn download_backup(&self, key: Option<&str>, filename: &str) -> Result<Bytes> {
        self.clients.require_admin(key)?;
        self.backups.download(filename).await
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;
    use crate::{
        error::Error,
        relics::{NewRelic, Upload},
        state::AppState,
    };

    async fn upload(state: &AppState, key: &str, access_level: &str, size: usize) -> Relic {
        let upload = Upload {
            data: Bytes::from(vec![b'a'; size]),
            ..Default::default()
        };
        let new = NewRelic {
            access_level: Some(access_level.to_string()),
            ..Default::default()
        };
        state.relics.create(Some(key), upload, new).await.unwrap()
    }

    #[tokio::test]
    async fn gatekeeping() -> TestResult {
        let (state, _) = AppState::for_tests();
        let admin = &state.admin;
        state.clients.register(Some("alice"))?;

        let check = admin.check(Some("alice"))?;
        assert_eq!(check.client_id.as_deref(), Some("alice"));
        assert!(!check.is_admin);
        assert!(admin.check(Some("admin"))?.is_admin);
        assert_eq!(
            admin.check(None)?,
            AdminCheck {
                client_id: None,
                is_admin: false
            }
        );

        assert!(matches!(admin.stats(None), Err(Error::Unauthorized)));
        assert!(matches!(
            admin.stats(Some("alice")),
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            admin.list_backups(Some("alice")).await,
            Err(Error::Forbidden { .. })
        ));
        assert_eq!(admin.config(Some("admin"))?.admin_client_ids, ["admin"]);
        Ok(())
    }

    #[tokio::test]
    async fn listings_and_stats() -> TestResult {
        let (state, _) = AppState::for_tests();
        let admin = &state.admin;
        upload(&state, "alice", "public", 10).await;
        let private = upload(&state, "alice", "private", 20).await;
        upload(&state, "bob", "public", 5).await;
        let gone = upload(&state, "bob", "public", 100).await;
        state.relics.delete(Some("bob"), &gone.id).await?;

        let (all, total) = admin.list_relics(Some("admin"), &RelicFilter::default(), Page::default())?;
        assert_eq!((all.len(), total), (3, 3));
        let only_private = RelicFilter {
            access_level: Some(AccessLevel::Private),
            ..Default::default()
        };
        let (relics, _) = admin.list_relics(Some("admin"), &only_private, Page::default())?;
        assert_eq!(relics, [private]);
        let of_bob = RelicFilter {
            client_id: Some("bob".to_string()),
            ..Default::default()
        };
        assert_eq!(admin.list_relics(Some("admin"), &of_bob, Page::default())?.1, 1);

        let stats = admin.stats(Some("admin"))?;
        assert_eq!(stats.total_relics, 3);
        assert_eq!(stats.total_clients, 3);
        assert_eq!(stats.total_size_bytes, 35);
        assert_eq!((stats.public_relics, stats.private_relics), (2, 1));
        assert_eq!(stats.admin_count, 1);
        assert_eq!(stats.metrics.relics_created, 4);

        let (clients, total) = admin.list_clients(Some("admin"), Page::new(Some(1), None))?;
        assert_eq!(total, 3);
        assert_eq!(clients[0].client.id, "bob");
        assert!(!clients[0].is_admin);
        Ok(())
    }

    #[tokio::test]
    async fn delete_clients() -> TestResult {
        let (state, blobs) = AppState::for_tests();
        let admin = &state.admin;
        let kept = upload(&state, "alice", "public", 1).await;
        let removed = upload(&state, "bob", "public", 1).await;
        state.bookmarks.add(Some("bob"), &kept.id)?;

        assert!(matches!(
            admin.delete_client(Some("admin"), "nobody", false).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            admin.delete_client(Some("admin"), "admin", false).await,
            Err(Error::Forbidden { .. })
        ));

        let outcome = admin.delete_client(Some("admin"), "alice", false).await?;
        assert_eq!(outcome.relics_disassociated, 1);
        let kept = state.relics.get(&kept.id, None).await?;
        assert_eq!(kept.client_id, None);

        let outcome = admin.delete_client(Some("admin"), "bob", true).await?;
        assert_eq!(outcome.relics_deleted, 1);
        assert_eq!(outcome.bookmarks_removed, 1);
        assert!(!blobs.contains(removed.tier, &removed.storage_key));
        assert!(matches!(
            state.relics.get(&removed.id, None).await,
            Err(Error::NotFound { .. })
        ));
        let tx = state.store.read()?;
        assert!(tx.client("alice")?.is_none());
        assert!(tx.client("bob")?.is_none());
        assert!(tx.bookmarks()?.is_empty());
        Ok(())
    }
}
