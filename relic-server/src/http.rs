//! HTTP server part of relic-server

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{ConnectInfo, DefaultBodyLimit, Request, State},
    http::Method,
    middleware::{self, Next},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{self, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Level, info, span, warn};

mod admin;
mod clients;
mod error;
mod extract;
mod rate_limiting;
mod relics;

pub use self::{extract::CLIENT_KEY_HEADER, rate_limiting::RateLimitConfig};
use crate::{metrics::Metrics, state::AppState};

/// Extra body size allowed on top of the upload limit for multipart framing and text fields.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Config for the HTTP server
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    /// Port to bind to
    pub port: u16,
    /// Optionally set a custom bind address (will use 0.0.0.0 if unset)
    pub bind_addr: Option<IpAddr>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_addr: None,
        }
    }
}

/// The HTTP server part of relic-server
#[derive(Debug)]
pub struct HttpServer {
    tasks: JoinSet<std::io::Result<()>>,
    http_addr: SocketAddr,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Spawn the server
    pub async fn spawn(config: HttpConfig, state: AppState) -> Result<HttpServer> {
        let app = create_app(state);
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let bind_addr = SocketAddr::new(
            config.bind_addr.unwrap_or(Ipv4Addr::UNSPECIFIED.into()),
            config.port,
        );
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind HTTP server to {bind_addr}"))?;
        let http_addr = listener.local_addr()?;
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(cancel.clone().cancelled_owned());
        info!("HTTP server listening on {http_addr}");
        tasks.spawn(async move { serve.await });

        Ok(HttpServer {
            tasks,
            http_addr,
            cancel,
        })
    }

    /// Get the bound address of the HTTP socket.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Shutdown the server and wait for all tasks to complete.
    ///
    /// In-flight requests are allowed to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.run_until_done().await?;
        Ok(())
    }

    /// Wait for all tasks to complete.
    ///
    /// Runs forever unless tasks fail.
    pub async fn run_until_done(mut self) -> Result<()> {
        let mut final_res: anyhow::Result<()> = Ok(());
        while let Some(res) = self.tasks.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Err(err) if err.is_cancelled() => {}
                Ok(Err(err)) => {
                    warn!(?err, "task failed");
                    final_res = Err(anyhow::Error::from(err));
                }
                Err(err) => {
                    warn!(?err, "task panicked");
                    final_res = Err(err.into());
                }
            }
        }
        final_res
    }
}

pub(crate) fn create_app(state: AppState) -> Router {
    // configure cors middleware
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(cors::Any)
        // allow requests from any origin
        .allow_origin(cors::Any);

    // configure tracing middleware
    let trace = TraceLayer::new_for_http().make_span_with(|request: &http::Request<_>| {
        let src = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|conn_info| conn_info.0.to_string())
            .unwrap_or_default();
        span!(
            Level::DEBUG,
            "http_request",
            method = ?request.method(),
            uri = ?request.uri(),
            src = %src,
        )
    });

    let body_limit = state
        .config
        .limits
        .max_upload_size
        .saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);
    let rate_limits = rate_limiting::create(&state.config.rate_limit, state.metrics.clone());
    let metrics = state.metrics.clone();

    let relic_routes = Router::new()
        .route(
            "/{id}",
            get(relics::get).put(relics::update).delete(relics::delete),
        )
        .route("/{id}/raw", get(relics::raw))
        .route("/{id}/fork", post(relics::fork))
        .route("/{id}/edit", post(relics::edit))
        .route("/{id}/history", get(relics::history))
        .route("/{id}/parent", get(relics::parent))
        .route("/{id}/children", get(relics::children))
        .route("/{id}/diff", get(relics::diff_with_parent))
        .route(
            "/{id}/comments",
            get(clients::list_comments).post(clients::create_comment),
        )
        .route(
            "/{id}/comments/{comment_id}",
            put(clients::update_comment).delete(clients::delete_comment),
        );

    let admin_routes = Router::new()
        .route("/check", get(admin::check))
        .route("/relics", get(admin::relics))
        .route("/clients", get(admin::clients))
        .route("/clients/{id}", delete(admin::delete_client))
        .route("/stats", get(admin::stats))
        .route("/config", get(admin::config))
        .route("/reports", get(admin::reports))
        .route("/reports/{id}", delete(admin::dismiss_report))
        .route("/backups", get(admin::backups).post(admin::create_backup))
        .route("/backups/{filename}/download", get(admin::download_backup));

    let api_routes = Router::new()
        .route("/version", get(version))
        .route("/relics", get(relics::list).post(relics::create))
        .nest("/relics", relic_routes)
        .route("/diff", get(relics::diff))
        .route(
            "/bookmarks",
            get(clients::list_bookmarks).post(clients::add_bookmark),
        )
        .route("/bookmarks/{relic_id}", delete(clients::remove_bookmark))
        .route("/bookmarks/check/{relic_id}", get(clients::check_bookmark))
        .route("/reports", post(clients::create_report))
        .route("/client/register", post(clients::register))
        .route("/client/relics", get(clients::relics))
        .route("/client/name", put(clients::set_name))
        .nest("/admin", admin_routes);

    // configure routes
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/{id}/raw", get(relics::raw))
        .nest("/api/v1", api_routes)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit));

    // only uploads and reads are rate limited
    if let Some(rate_limits) = rate_limits {
        router = router.layer(middleware::from_fn_with_state(
            rate_limits,
            rate_limiting::limit,
        ));
    }

    // configure app
    router
        .layer(cors)
        .layer(trace)
        .layer(middleware::from_fn_with_state(metrics, metrics_middleware))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

/// Record request metrics.
async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> impl IntoResponse {
    let start = Instant::now();
    let response = next.run(req).await;
    let latency = start.elapsed().as_millis();
    let status = response.status();
    metrics.http_requests_duration_ms.inc_by(latency as u64);
    metrics.http_requests.inc();
    if status.is_success() {
        metrics.http_requests_success.inc();
    } else {
        metrics.http_requests_error.inc();
    }
    response
}
