//! Background sweeper for expired and soft-deleted relics.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{error::Result, metrics::Metrics, relics::RelicService, store::MetadataStore};

/// Sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Time between sweeps.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How long soft-deleted rows are kept before they are purged.
    #[serde(with = "humantime_serde")]
    pub purge_after: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            purge_after: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired relics that were soft-deleted.
    pub expired: usize,
    /// Soft-deleted relics removed from the store.
    pub purged: usize,
}

/// Soft-deletes expired relics and purges old soft-deleted rows.
#[derive(Debug, Clone)]
pub struct Sweeper {
    store: MetadataStore,
    relics: RelicService,
    metrics: Arc<Metrics>,
    purge_after: Duration,
}

impl Sweeper {
    /// Create a sweeper.
    pub fn new(
        store: MetadataStore,
        relics: RelicService,
        metrics: Arc<Metrics>,
        purge_after: Duration,
    ) -> Self {
        Self {
            store,
            relics,
            metrics,
            purge_after,
        }
    }

    /// Run one sweep as of `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let relics = self.store.read()?.relics_newest_first()?;

        for relic in relics.iter().filter(|r| !r.is_deleted() && r.is_expired_at(now)) {
            if self.relics.discard(relic).await? {
                self.metrics.relics_expired.inc();
                stats.expired += 1;
            }
        }

        let cutoff = chrono::TimeDelta::from_std(self.purge_after)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));
        if let Some(cutoff) = cutoff {
            for relic in &relics {
                if relic.deleted_at.is_some_and(|at| at < cutoff) && self.purge(&relic.id)? {
                    self.metrics.relics_purged.inc();
                    stats.purged += 1;
                }
            }
        }
        if stats != SweepStats::default() {
            info!(expired = stats.expired, purged = stats.purged, "sweep finished");
        }
        Ok(stats)
    }

    fn purge(&self, id: &str) -> Result<bool> {
        let tx = self.store.write()?;
        match tx.relic(id)? {
            Some(relic) if relic.is_deleted() => {}
            _ => return Ok(false),
        }
        tx.remove_relic(id)?;
        tx.remove_comments_of_relic(id)?;
        tx.remove_bookmarks_of_relic(id)?;
        tx.commit()?;
        debug!(id, "purged relic");
        Ok(true)
    }

    /// Sweep every `interval` until `cancel` fires.
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once(Utc::now()).await {
                            warn!("sweep failed: {err}");
                        }
                    }
                }
            }
            debug!("sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use testresult::TestResult;

    use super::*;
    use crate::{
        blobs::Tier,
        relics::{NewRelic, Upload},
        state::AppState,
    };

    fn expiring(expires_in: &str) -> NewRelic {
        NewRelic {
            expires_in: Some(expires_in.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn expired_relics_are_discarded() -> TestResult {
        let (state, blobs) = AppState::for_tests();
        let short = state
            .relics
            .create(Some("alice"), Upload::default(), expiring("1h"))
            .await?;
        let long = state
            .relics
            .create(Some("alice"), Upload::default(), expiring("1w"))
            .await?;
        let sweeper = &state.sweeper;

        let stats = sweeper.run_once(Utc::now()).await?;
        assert_eq!(stats, SweepStats::default());

        let later = Utc::now() + TimeDelta::hours(2);
        let stats = sweeper.run_once(later).await?;
        assert_eq!(stats.expired, 1);
        assert!(!blobs.contains(Tier::Ephemeral, &short.storage_key));
        assert!(blobs.contains(Tier::Ephemeral, &long.storage_key));
        let client = state.store.read()?.client("alice")?.unwrap();
        assert_eq!(client.relic_count, 1);

        // already discarded
        assert_eq!(sweeper.run_once(later).await?.expired, 0);
        assert_eq!(state.metrics.relics_expired.get(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn old_deleted_rows_are_purged() -> TestResult {
        let (state, _) = AppState::for_tests();
        let relic = state
            .relics
            .create(Some("alice"), Upload::default(), NewRelic::default())
            .await?;
        state.clients.register(Some("bob"))?;
        state.clients.set_name(Some("bob"), "Bob")?;
        state.bookmarks.add(Some("bob"), &relic.id)?;
        state
            .comments
            .create(Some("bob"), &relic.id, "nice", None, None)?;
        state.relics.delete(Some("alice"), &relic.id).await?;

        let stats = state.sweeper.run_once(Utc::now()).await?;
        assert_eq!(stats.purged, 0);
        assert!(state.store.read()?.relic(&relic.id)?.is_some());

        let later = Utc::now() + TimeDelta::days(31);
        let stats = state.sweeper.run_once(later).await?;
        assert_eq!(stats.purged, 1);
        let tx = state.store.read()?;
        assert!(tx.relic(&relic.id)?.is_none());
        assert!(tx.comments()?.is_empty());
        assert!(tx.bookmarks()?.is_empty());
        assert_eq!(tx.client("alice")?.unwrap().relic_count, 0);
        Ok(())
    }
}
