//! The main server which combines the HTTP server with the background workers.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    backup::BackupKind,
    blobs::{BlobStore, FsBlobStore},
    config::Config,
    http::HttpServer,
    state::AppState,
    store::MetadataStore,
};

/// Spawn the server and run until the `Ctrl-C` signal is received, then shutdown.
pub async fn run_with_config_until_ctrl_c(config: Config) -> Result<()> {
    let store = MetadataStore::persistent(config.database_path()?)?;
    let blob_store = FsBlobStore::open(config.blobs_path()?).await?;
    let server = Server::spawn(config, store, Arc::new(blob_store)).await?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown");
    server.shutdown().await?;
    Ok(())
}

/// The relic server.
#[derive(Debug)]
pub struct Server {
    http_server: HttpServer,
    state: AppState,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Server {
    /// Spawn the server.
    ///
    /// This will spawn several background tasks:
    /// * The HTTP server task
    /// * The expiry sweeper
    /// * The backup scheduler, if backups are enabled
    pub async fn spawn(
        config: Config,
        store: MetadataStore,
        blob_store: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        let http_config = config.http.clone();
        let state = AppState::new(config, store, blob_store);
        let backup = state.config.backup.clone();

        if backup.enabled && backup.on_startup {
            if let Err(err) = state.backups.create(BackupKind::Startup).await {
                warn!("startup backup failed: {err}");
            }
        }

        let cancel = CancellationToken::new();
        let mut workers = vec![
            state
                .sweeper
                .clone()
                .spawn(state.config.sweep.interval, cancel.child_token()),
        ];
        if backup.enabled {
            workers.push(
                state
                    .backups
                    .clone()
                    .spawn_scheduler(backup.interval, cancel.child_token()),
            );
        }

        let http_server = HttpServer::spawn(http_config, state.clone()).await?;
        Ok(Self {
            http_server,
            state,
            cancel,
            workers,
        })
    }

    /// The shared state of the running server.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop the workers and the HTTP server and wait for all tasks to complete.
    ///
    /// Writes a shutdown backup first if configured.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        for worker in self.workers {
            if let Err(err) = worker.await {
                warn!(?err, "worker panicked");
            }
        }
        let backup = &self.state.config.backup;
        if backup.enabled && backup.on_shutdown {
            if let Err(err) = self.state.backups.create(BackupKind::Shutdown).await {
                warn!("shutdown backup failed: {err}");
            }
        }
        self.http_server.shutdown().await
    }

    /// Wait for all tasks to complete.
    ///
    /// This will run forever unless the HTTP server fails.
    pub async fn run_until_error(self) -> Result<()> {
        let res = self.http_server.run_until_done().await;
        self.cancel.cancel();
        res
    }

    /// Spawn a server suitable for testing.
    ///
    /// It binds to a random localhost port, keeps everything in memory, disables backups and
    /// makes `admin` the only admin key. Returns the server handle and the base URL.
    #[cfg(test)]
    pub async fn spawn_for_tests() -> Result<(Self, String)> {
        Self::spawn_for_tests_with_rate_limit(crate::http::RateLimitConfig::disabled()).await
    }

    /// Like [`Self::spawn_for_tests`] with custom rate limits.
    #[cfg(test)]
    pub async fn spawn_for_tests_with_rate_limit(
        rate_limit: crate::http::RateLimitConfig,
    ) -> Result<(Self, String)> {
        use std::net::{IpAddr, Ipv4Addr};

        let mut config = Config::default();
        config.http.port = 0;
        config.http.bind_addr = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        config.rate_limit = rate_limit;
        config.admin_client_ids = vec!["admin".to_string()];
        config.backup.enabled = false;
        config.limits.max_upload_size = 64 * 1024;

        let store = MetadataStore::in_memory()?;
        let blob_store = Arc::new(crate::blobs::MemBlobStore::new());
        let server = Self::spawn(config, store, blob_store).await?;
        let http_url = format!("http://{}", server.http_server.http_addr());
        Ok((server, http_url))
    }
}
