//! Shared state and services of the relic-server

use std::sync::Arc;

use crate::{
    admin::AdminService,
    backup::BackupService,
    blobs::{BlobStore, Blobs},
    bookmarks::BookmarkService,
    clients::ClientService,
    comments::CommentService,
    config::Config,
    metrics::Metrics,
    relics::RelicService,
    reports::ReportService,
    store::MetadataStore,
    sweep::Sweeper,
};

/// The shared app state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The running configuration.
    pub config: Arc<Config>,
    /// Metadata store.
    pub store: MetadataStore,
    /// Payload store.
    pub blobs: Blobs,
    /// Process counters.
    pub metrics: Arc<Metrics>,
    /// Client identities.
    pub clients: ClientService,
    /// Relic lifecycle.
    pub relics: RelicService,
    /// Bookmarks.
    pub bookmarks: BookmarkService,
    /// Comments.
    pub comments: CommentService,
    /// Abuse reports.
    pub reports: ReportService,
    /// Metadata backups.
    pub backups: BackupService,
    /// Expiry sweeper.
    pub sweeper: Sweeper,
    /// Admin operations.
    pub admin: AdminService,
}

impl AppState {
    /// Wire up all services over a metadata store and a blob store.
    pub fn new(config: Config, store: MetadataStore, blob_store: Arc<dyn BlobStore>) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::default());
        let blobs = Blobs::from_arc(blob_store, config.storage.timeout);
        let clients = ClientService::new(store.clone(), config.admin_client_ids.iter().cloned());
        let relics = RelicService::new(
            store.clone(),
            blobs.clone(),
            clients.clone(),
            metrics.clone(),
            config.limits.max_upload_size,
        );
        let bookmarks = BookmarkService::new(store.clone(), clients.clone());
        let comments = CommentService::new(store.clone(), clients.clone());
        let reports = ReportService::new(store.clone());
        let backups = BackupService::new(
            store.clone(),
            blobs.clone(),
            metrics.clone(),
            config.backup.retention,
        );
        let sweeper = Sweeper::new(
            store.clone(),
            relics.clone(),
            metrics.clone(),
            config.sweep.purge_after,
        );
        let admin = AdminService::new(
            config.clone(),
            store.clone(),
            clients.clone(),
            relics.clone(),
            reports.clone(),
            backups.clone(),
            metrics.clone(),
        );
        Self {
            config,
            store,
            blobs,
            metrics,
            clients,
            relics,
            bookmarks,
            comments,
            reports,
            backups,
            sweeper,
            admin,
        }
    }

    /// State over in-memory stores with a 1 KiB upload limit and `admin` as the only admin.
    ///
    /// The `admin` client is registered. The blob store is returned for inspection.
    #[cfg(test)]
    pub(crate) fn for_tests() -> (Self, Arc<crate::blobs::MemBlobStore>) {
        let mut config = Config::default();
        config.admin_client_ids = vec!["admin".to_string()];
        config.limits.max_upload_size = 1024;
        config.storage.timeout = std::time::Duration::from_secs(5);
        let store = MetadataStore::in_memory().expect("in-memory store");
        let blobs = Arc::new(crate::blobs::MemBlobStore::new());
        let state = Self::new(config, store, blobs.clone());
        state.clients.register(Some("admin")).expect("register admin");
        (state, blobs)
    }
}
