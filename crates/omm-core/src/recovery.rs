//! Startup reconciliation.
//!
//! Runs once before the manager serves requests: restores gauges from the
//! persisted snapshot (or recounts them), abandons expired open keys and
//! retries leftover release intents. Multipart uploads are left alone so
//! clients can resume them by upload id.

use crate::metrics::{GAUGE_GENERATION, Gauge, MetricsRegistry};
use crate::release::{ReleaseQueue, ReleaseReport};
use crate::trash::TrashService;
use omm_common::OmResult;
use omm_store::keys::{BUCKET_PREFIX, GAUGES_KEY, KEY_PREFIX, VOLUME_PREFIX};
use omm_store::rows::GaugeRow;
use omm_store::{OmStore, StoreError};
use std::sync::Arc;
use tracing::{info, warn};

/// Where the gauges came from at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeSource {
    /// Restored from a clean-shutdown snapshot
    Snapshot,
    /// Recounted by scanning the namespace
    Rescan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub gauges: GaugeSource,
    pub open_keys_expired: u64,
    pub releases: ReleaseReport,
}

pub struct RestartRecovery<'a> {
    store: &'a OmStore,
    metrics: &'a MetricsRegistry,
    trash: &'a TrashService,
    releases: &'a Arc<ReleaseQueue>,
    page_size: usize,
}

impl<'a> RestartRecovery<'a> {
    pub fn new(
        store: &'a OmStore,
        metrics: &'a MetricsRegistry,
        trash: &'a TrashService,
        releases: &'a Arc<ReleaseQueue>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            metrics,
            trash,
            releases,
            page_size: page_size.max(1),
        }
    }

    pub fn run(&self, now: u64) -> OmResult<RecoveryReport> {
        let gauges = self.restore_gauges()?;

        // until the next graceful stop the snapshot cannot be trusted
        self.metrics.save_gauges(self.store, false)?;

        let open_keys_expired = self.trash.expire_open_keys(now)?;
        let releases = self.releases.retry_pending(self.page_size)?;
        info!(
            "Recovery complete: gauges from {:?}, {} open keys expired, {} releases retried ({} failed)",
            gauges,
            open_keys_expired,
            releases.released + releases.failed,
            releases.failed
        );
        Ok(RecoveryReport {
            gauges,
            open_keys_expired,
            releases,
        })
    }

    fn load_snapshot(&self) -> OmResult<Option<GaugeRow>> {
        match self.store.get_row::<GaugeRow>(GAUGES_KEY) {
            Ok(row) => Ok(row),
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!("Ignoring unreadable gauge snapshot: {}", reason);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Seed the gauges from the snapshot row, or recount them.
    ///
    /// Only a row written by a graceful stop (`clean_shutdown`, current
    /// generation) is trusted. The periodic saver writes `clean_shutdown =
    /// false` because mutations keep committing after it runs, so after a
    /// crash its counts can be behind the namespace. Any other row, or no
    /// row at all, falls back to a namespace scan.
    fn restore_gauges(&self) -> OmResult<GaugeSource> {
        match self.load_snapshot()? {
            Some(row) if row.generation == GAUGE_GENERATION && row.clean_shutdown => {
                self.metrics.restore_gauges(&row);
                info!(
                    "Restored gauges from snapshot: volumes={} buckets={} keys={}",
                    row.num_volumes, row.num_buckets, row.num_keys
                );
                return Ok(GaugeSource::Snapshot);
            }
            Some(row) if row.generation != GAUGE_GENERATION => {
                info!(
                    "Gauge snapshot generation {} does not match {}, rescanning",
                    row.generation, GAUGE_GENERATION
                );
            }
            Some(_) => info!("Previous run did not stop cleanly, rescanning gauges"),
            None => info!("No gauge snapshot, rescanning"),
        }
        self.rescan()?;
        Ok(GaugeSource::Rescan)
    }

    fn rescan(&self) -> OmResult<()> {
        for (gauge, prefix) in [
            (Gauge::NumVolumes, VOLUME_PREFIX),
            (Gauge::NumBuckets, BUCKET_PREFIX),
            (Gauge::NumKeys, KEY_PREFIX),
        ] {
            let count = self.store.count_rows(prefix, self.page_size)?;
            self.metrics
                .set(gauge, i64::try_from(count).unwrap_or(i64::MAX));
        }
        Ok(())
    }
}
