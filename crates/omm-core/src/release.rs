//! Deferred block release.
//!
//! Locations orphaned by a mutation are recorded as a release intent in the
//! same batch as the mutation. Only after that batch commits is the block
//! layer asked to release them; the intent row is removed on ack. Intents
//! left behind by a failed release or a crash are retried by the sweeper
//! and at startup, so no location is lost between the two systems.

use crate::block::BlockAllocator;
use crate::metrics::{Event, MetricsRegistry};
use omm_common::{BlockLocation, current_time_millis};
use omm_store::keys::{PENDING_RELEASE_PREFIX, pending_release_key};
use omm_store::rows::{ReleaseIntentRow, to_location_rows, to_locations};
use omm_store::{OmStore, RowBatch, StoreError, StoreResult};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// An intent written into a batch, to be dispatched once the batch commits
#[derive(Debug, Clone)]
#[must_use = "a recorded release does nothing until dispatched"]
pub struct PendingRelease {
    key: String,
    locations: Vec<BlockLocation>,
}

/// Outcome of a retry pass over leftover intents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: u64,
    pub failed: u64,
}

pub struct ReleaseQueue {
    store: OmStore,
    allocator: Arc<dyn BlockAllocator>,
    metrics: Arc<MetricsRegistry>,
}

impl ReleaseQueue {
    pub fn new(
        store: OmStore,
        allocator: Arc<dyn BlockAllocator>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            allocator,
            metrics,
        }
    }

    /// Add a release intent for `locations` to `batch`
    pub fn record(
        &self,
        batch: &mut RowBatch,
        locations: Vec<BlockLocation>,
        reason: &str,
    ) -> Option<PendingRelease> {
        if locations.is_empty() {
            return None;
        }
        let key = pending_release_key(&Uuid::new_v4().to_string());
        batch.put(
            key.clone(),
            &ReleaseIntentRow {
                locations: to_location_rows(&locations),
                reason: reason.to_string(),
                created_at: current_time_millis(),
                attempts: 0,
            },
        );
        Some(PendingRelease { key, locations })
    }

    /// Release the locations of committed intents. Never fails the caller;
    /// a failed release stays pending for the next retry pass.
    pub fn dispatch(&self, pending: impl IntoIterator<Item = PendingRelease>) {
        for release in pending {
            if self.release_one(&release.key, &release.locations) {
                continue;
            }
            if let Err(e) = self.bump_attempts(&release.key) {
                warn!("Failed to update release intent {}: {}", release.key, e);
            }
        }
    }

    fn release_one(&self, key: &str, locations: &[BlockLocation]) -> bool {
        match self.allocator.release(locations) {
            Ok(()) => {
                self.metrics.inc(Event::BlockReleases);
                if let Err(e) = self.store.delete_row(key) {
                    // harmless: the retry pass will release again and clean up
                    warn!("Released blocks but failed to clear intent {}: {}", key, e);
                }
                debug!("Released {} locations ({})", locations.len(), key);
                true
            }
            Err(e) => {
                self.metrics.inc(Event::BlockReleaseFails);
                warn!("Block release failed for {}: {}", key, e);
                false
            }
        }
    }

    fn bump_attempts(&self, key: &str) -> StoreResult<()> {
        if let Some(mut row) = self.store.get_row::<ReleaseIntentRow>(key)? {
            row.attempts = row.attempts.saturating_add(1);
            self.store.put_row(key, &row)?;
        }
        Ok(())
    }

    /// Retry every intent still in the store, `page_size` intents at a time
    pub fn retry_pending(&self, page_size: usize) -> StoreResult<ReleaseReport> {
        let mut report = ReleaseReport::default();
        self.store.for_each_page::<ReleaseIntentRow, StoreError>(
            PENDING_RELEASE_PREFIX,
            page_size,
            |page| {
                for (key, mut row) in page {
                    if self.release_one(&key, &to_locations(&row.locations)) {
                        report.released += 1;
                    } else {
                        report.failed += 1;
                        row.attempts = row.attempts.saturating_add(1);
                        self.store.put_row(&key, &row)?;
                    }
                }
                Ok(())
            },
        )?;
        Ok(report)
    }

    /// Number of intents waiting for an ack
    pub fn pending_count(&self) -> StoreResult<u64> {
        self.store.count_rows(PENDING_RELEASE_PREFIX, 1000)
    }
}
