use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::{Arc, Weak},
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::AppError;
use crate::metrics::Metrics;

/// Config for the per IP rate limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Set to true to disable rate limiting.
    pub disabled: bool,
    /// Uploads (create, fork, edit) per minute and IP address.
    pub uploads_per_minute: u32,
    /// Reads per minute and IP address.
    pub reads_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            uploads_per_minute: 10,
            reads_per_minute: 100,
        }
    }
}

impl RateLimitConfig {
    /// Disable rate limiting.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Default::default()
        }
    }
}

/// Keyed limiters for uploads and reads.
#[derive(derive_more::Debug, Clone)]
pub struct RateLimits {
    #[debug("DefaultKeyedRateLimiter")]
    uploads: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    #[debug("DefaultKeyedRateLimiter")]
    reads: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    metrics: Arc<Metrics>,
}

/// Create the limiters, or `None` if rate limiting is disabled.
///
/// This spawns a background thread to clean up the rate limiting cache.
pub fn create(config: &RateLimitConfig, metrics: Arc<Metrics>) -> Option<RateLimits> {
    if config.disabled {
        return None;
    }
    let quota = |per_minute: u32| {
        Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN))
    };
    let limits = RateLimits {
        uploads: Arc::new(RateLimiter::keyed(quota(config.uploads_per_minute))),
        reads: Arc::new(RateLimiter::keyed(quota(config.reads_per_minute))),
        metrics,
    };

    // The limiters need a background task for garbage collection (to clear expired records).
    // It stops once the limiters are dropped.
    let gc_interval = Duration::from_secs(60);
    let uploads = Arc::downgrade(&limits.uploads);
    let reads = Arc::downgrade(&limits.reads);
    std::thread::spawn(move || {
        loop {
            std::thread::sleep(gc_interval);
            if !collect(&uploads, "uploads") || !collect(&reads, "reads") {
                break;
            }
        }
    });
    Some(limits)
}

fn collect(limiter: &Weak<DefaultKeyedRateLimiter<IpAddr>>, name: &str) -> bool {
    let Some(limiter) = limiter.upgrade() else {
        return false;
    };
    debug!("rate limiting storage size for {name}: {}", limiter.len());
    limiter.retain_recent();
    true
}

fn is_upload(method: &Method, path: &str) -> bool {
    method == Method::POST
        && (path == "/api/v1/relics" || path.ends_with("/fork") || path.ends_with("/edit"))
}

/// Middleware rejecting requests over quota with `429 Too Many Requests`.
pub async fn limit(
    State(limits): State<RateLimits>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let limiter = if is_upload(req.method(), req.uri().path()) {
        &limits.uploads
    } else if req.method() == Method::GET {
        &limits.reads
    } else {
        return next.run(req).await;
    };
    if limiter.check_key(&addr.ip()).is_err() {
        limits.metrics.http_requests_rate_limited.inc();
        debug!(peer = %addr, path = req.uri().path(), "rate limited");
        return AppError::new(StatusCode::TOO_MANY_REQUESTS, Some("rate limit exceeded"))
            .into_response();
    }
    next.run(req).await
}
