//! Metrics support for the server

use iroh_metrics::{Counter, MetricsGroup};
use serde::Serialize;

/// Metrics for relic-server
#[derive(Debug, Default, MetricsGroup)]
#[metrics(name = "relic_server")]
pub struct Metrics {
    /// Relics created by uploads.
    pub relics_created: Counter,
    /// Relics created as new versions of an existing relic.
    pub relics_edited: Counter,
    /// Relics created by forking.
    pub relics_forked: Counter,
    /// Relics soft-deleted by clients or admins.
    pub relics_deleted: Counter,
    /// Relics soft-deleted by the sweeper because they expired.
    pub relics_expired: Counter,
    /// Soft-deleted relics removed from the store by the sweeper.
    pub relics_purged: Counter,
    /// Successful metadata reads.
    pub relic_reads: Counter,
    /// Successful payload downloads.
    pub raw_reads: Counter,
    /// Blob store calls that failed or timed out.
    pub blob_errors: Counter,
    /// Backups written.
    pub backups_created: Counter,
    /// Backups that failed.
    pub backups_failed: Counter,
    /// Number of HTTP requests.
    pub http_requests: Counter,
    /// Number of HTTP requests with a 2xx status code.
    pub http_requests_success: Counter,
    /// Number of HTTP requests with a non-2xx status code.
    pub http_requests_error: Counter,
    /// Number of HTTP requests rejected by the rate limiter.
    pub http_requests_rate_limited: Counter,
    /// Total duration of all HTTP requests.
    pub http_requests_duration_ms: Counter,
}

/// Point in time copy of the counters, reported in admin statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub relics_created: u64,
    pub relics_edited: u64,
    pub relics_forked: u64,
    pub relics_deleted: u64,
    pub relics_expired: u64,
    pub relics_purged: u64,
    pub relic_reads: u64,
    pub raw_reads: u64,
    pub blob_errors: u64,
    pub backups_created: u64,
    pub backups_failed: u64,
    pub http_requests: u64,
    pub http_requests_success: u64,
    pub http_requests_error: u64,
    pub http_requests_rate_limited: u64,
    pub http_requests_duration_ms: u64,
}

impl Metrics {
    /// Read all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            relics_created: self.relics_created.get(),
            relics_edited: self.relics_edited.get(),
            relics_forked: self.relics_forked.get(),
            relics_deleted: self.relics_deleted.get(),
            relics_expired: self.relics_expired.get(),
            relics_purged: self.relics_purged.get(),
            relic_reads: self.relic_reads.get(),
            raw_reads: self.raw_reads.get(),
            blob_errors: self.blob_errors.get(),
            backups_created: self.backups_created.get(),
            backups_failed: self.backups_failed.get(),
            http_requests: self.http_requests.get(),
            http_requests_success: self.http_requests_success.get(),
            http_requests_error: self.http_requests_error.get(),
            http_requests_rate_limited: self.http_requests_rate_limited.get(),
            http_requests_duration_ms: self.http_requests_duration_ms.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_recorded() {
        let metrics = Metrics::default();
        metrics.relics_created.inc();
        metrics.relics_created.inc();
        metrics.http_requests_duration_ms.inc_by(15);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.relics_created, 2);
        assert_eq!(snapshot.http_requests_duration_ms, 15);
        assert_eq!(snapshot.relics_deleted, 0);
    }
}
