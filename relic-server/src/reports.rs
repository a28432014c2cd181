//! Abuse reports. Filing needs no identity, reviewing is done by admins.

use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::ensure;
use tracing::info;

use crate::{
    error::{InvalidArgumentSnafu, NotFoundSnafu, Result},
    id,
    models::Report,
    store::MetadataStore,
};

/// Longest accepted reason, in characters.
pub const MAX_REASON_LEN: usize = 1000;

/// Relic name shown for reports whose relic no longer exists.
pub const UNKNOWN_RELIC: &str = "Unknown (Deleted)";

/// A report with the name of the reported relic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct ReportView {
    pub id: String,
    pub relic_id: String,
    pub relic_name: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// The report service.
#[derive(Debug, Clone)]
pub struct ReportService {
    store: MetadataStore,
}

impl ReportService {
    /// Create the service.
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    /// File a report against a relic.
    pub fn create(&self, relic_id: &str, reason: &str) -> Result<Report> {
        let reason = reason.trim();
        ensure!(
            !reason.is_empty(),
            InvalidArgumentSnafu {
                message: "reason must not be empty"
            }
        );
        ensure!(
            reason.chars().count() <= MAX_REASON_LEN,
            InvalidArgumentSnafu {
                message: format!("reason must be at most {MAX_REASON_LEN} characters"),
            }
        );
        let tx = self.store.write()?;
        ensure!(tx.relic_exists(relic_id)?, NotFoundSnafu { what: "relic" });
        let id = id::generate_unique_id(id::DEFAULT_MAX_RETRIES, |id| {
            Ok(tx.report_exists(id)?)
        })?;
        let report = Report {
            id,
            relic_id: relic_id.to_string(),
            reason: reason.to_string(),
            created_at: Utc::now(),
        };
        tx.put_report(&report)?;
        tx.commit()?;
        info!(id = %report.id, relic_id, "relic reported");
        Ok(report)
    }

    /// All reports, newest first.
    pub fn list(&self) -> Result<Vec<ReportView>> {
        let tx = self.store.read()?;
        let mut out = Vec::new();
        for report in tx.reports()? {
            let relic_name = match tx.relic(&report.relic_id)? {
                Some(relic) if !relic.is_deleted() => relic.download_name().to_string(),
                _ => UNKNOWN_RELIC.to_string(),
            };
            out.push(ReportView {
                id: report.id,
                relic_id: report.relic_id,
                relic_name,
                reason: report.reason,
                created_at: report.created_at,
            });
        }
        Ok(out)
    }

    /// Remove a report.
    pub fn dismiss(&self, id: &str) -> Result<()> {
        let tx = self.store.write()?;
        ensure!(tx.remove_report(id)?, NotFoundSnafu { what: "report" });
        tx.commit()?;
        Ok(())
    }
}
