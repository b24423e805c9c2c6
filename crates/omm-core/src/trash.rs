//! Trash recovery and the background sweep.
//!
//! The sweep abandons OpenKey rows past their expiry, purges Trash rows past
//! retention and retries release intents left by earlier failures. Each row
//! is handled under the same key lock a client write would take, and is
//! re-read under that lock before it is removed.

use crate::bucket::load_bucket;
use crate::context::RequestContext;
use crate::health::DegradedRanges;
use crate::lock::{LockManager, LockRequest, LockScope, LockSet};
use crate::metrics::{Event, MetricsRegistry};
use crate::release::{ReleaseQueue, ReleaseReport};
use crate::volume::VolumeUsage;
use omm_common::{KeyInfo, OmConfig, OmError, OmResult, current_time_millis};
use omm_store::keys::{OPEN_KEY_PREFIX, TRASH_PREFIX, key_key, trash_name_prefix, volume_key};
use omm_store::rows::{OpenKeyRow, TrashRow, to_locations};
use omm_store::{OmStore, RowBatch};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Restores trashed keys
pub trait TrashOps: Send + Sync {
    /// Restore the newest trashed copy of `volume/bucket/key` into
    /// `dest_bucket` of the same volume
    fn recover_trash(
        &self,
        ctx: &RequestContext,
        volume: &str,
        bucket: &str,
        key: &str,
        dest_bucket: &str,
    ) -> OmResult<KeyInfo>;
}

/// Retention and paging knobs for the sweep
#[derive(Clone, Debug)]
pub struct TrashSettings {
    pub open_key_expiry: Duration,
    pub retention: Duration,
    pub batch_size: usize,
    pub lock_timeout: Duration,
}

impl TrashSettings {
    #[must_use]
    pub fn from_config(config: &OmConfig) -> Self {
        Self {
            open_key_expiry: config.open_key.expiry(),
            retention: config.trash.retention(),
            batch_size: config.trash.sweep_batch_size.max(1),
            lock_timeout: config.om.lock_timeout(),
        }
    }
}

impl Default for TrashSettings {
    fn default() -> Self {
        Self::from_config(&OmConfig::default())
    }
}

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub open_keys_expired: u64,
    pub trash_purged: u64,
    pub releases: ReleaseReport,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub struct TrashService {
    store: OmStore,
    locks: Arc<LockManager>,
    releases: Arc<ReleaseQueue>,
    usage: Arc<VolumeUsage>,
    metrics: Arc<MetricsRegistry>,
    settings: TrashSettings,
    degraded: Arc<DegradedRanges>,
}

impl TrashService {
    pub fn new(
        store: OmStore,
        locks: Arc<LockManager>,
        releases: Arc<ReleaseQueue>,
        usage: Arc<VolumeUsage>,
        metrics: Arc<MetricsRegistry>,
        settings: TrashSettings,
    ) -> Self {
        Self {
            store,
            locks,
            releases,
            usage,
            metrics,
            settings,
            degraded: Arc::new(DegradedRanges::new()),
        }
    }

    /// Share the manager's degraded set; unreadable rows are marked there
    #[must_use]
    pub fn with_degraded(mut self, degraded: Arc<DegradedRanges>) -> Self {
        self.degraded = degraded;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &TrashSettings {
        &self.settings
    }

    /// Take the write lock set for one key, or `None` if it is busy
    fn lock_key(&self, volume: &str, bucket: &str, key: &str) -> Option<LockSet<'_>> {
        let requests = vec![
            LockRequest::shared(LockScope::volume(volume)),
            LockRequest::shared(LockScope::bucket(volume, bucket)),
            LockRequest::exclusive(LockScope::key(volume, bucket, key)),
        ];
        match self
            .locks
            .acquire(requests, Instant::now() + self.settings.lock_timeout)
        {
            Ok(set) => Some(set),
            Err(e) => {
                debug!("Sweep skipping busy key {}/{}/{}: {}", volume, bucket, key, e);
                None
            }
        }
    }

    /// Run one full pass: expire open keys, purge trash, retry releases
    pub fn sweep(&self, now: u64) -> OmResult<SweepReport> {
        let open_keys_expired = self.expire_open_keys(now)?;
        let trash_purged = self.purge_trash(now)?;
        let releases = self.releases.retry_pending(self.settings.batch_size)?;
        if open_keys_expired + trash_purged + releases.released + releases.failed > 0 {
            info!(
                "Sweep: {} open keys expired, {} trash rows purged, {} releases retried ({} failed)",
                open_keys_expired,
                trash_purged,
                releases.released + releases.failed,
                releases.failed
            );
        }
        Ok(SweepReport {
            open_keys_expired,
            trash_purged,
            releases,
        })
    }

    /// Abandon OpenKey rows opened more than `open_key_expiry` before `now`
    pub fn expire_open_keys(&self, now: u64) -> OmResult<u64> {
        let cutoff = now.saturating_sub(millis(self.settings.open_key_expiry));
        let mut expired = 0;
        self.store.for_each_page::<OpenKeyRow, OmError>(
            OPEN_KEY_PREFIX,
            self.settings.batch_size,
            |page| {
                for (row_key, row) in page {
                    if row.opened_at < cutoff && self.expire_open_key(&row_key, &row)? {
                        expired += 1;
                    }
                }
                Ok(())
            },
        )?;
        if expired > 0 {
            self.metrics.add(Event::OpenKeysExpired, expired);
            debug!("Expired {} open keys", expired);
        }
        Ok(expired)
    }

    fn expire_open_key(&self, row_key: &str, row: &OpenKeyRow) -> OmResult<bool> {
        let Some(_locks) = self.lock_key(&row.volume, &row.bucket, &row.name) else {
            return Ok(false);
        };
        // committed or aborted since the scan
        let Some(current) = self.store.get_row::<OpenKeyRow>(row_key)? else {
            return Ok(false);
        };
        let mut batch = RowBatch::new();
        batch.delete(row_key);
        let pending =
            self.releases
                .record(&mut batch, to_locations(&current.locations), "open key expired");
        self.store.commit(batch)?;
        self.releases.dispatch(pending);
        Ok(true)
    }

    /// Delete Trash rows older than `retention` and release their blocks
    pub fn purge_trash(&self, now: u64) -> OmResult<u64> {
        let cutoff = now.saturating_sub(millis(self.settings.retention));
        let mut purged = 0;
        self.store.for_each_page::<TrashRow, OmError>(
            TRASH_PREFIX,
            self.settings.batch_size,
            |page| {
                for (row_key, row) in page {
                    if row.deleted_at < cutoff && self.purge_one(&row_key, row)? {
                        purged += 1;
                    }
                }
                Ok(())
            },
        )?;
        if purged > 0 {
            self.metrics.add(Event::TrashKeysPurged, purged);
            debug!("Purged {} trash rows", purged);
        }
        Ok(purged)
    }

    fn purge_one(&self, row_key: &str, row: TrashRow) -> OmResult<bool> {
        let Some(key) = row.key else {
            // nothing says which key lock guards it; leave it for an operator
            let range = row_key.strip_prefix(TRASH_PREFIX).unwrap_or(row_key);
            if self.degraded.mark(range) {
                error!("Trash row {} carries no key, skipping it", row_key);
            }
            return Ok(false);
        };
        let Some(_locks) = self.lock_key(&key.volume, &key.bucket, &key.name) else {
            return Ok(false);
        };
        if !self.store.exists(row_key)? {
            return Ok(false);
        }
        let mut batch = RowBatch::new();
        batch.delete(row_key);
        let pending = self
            .releases
            .record(&mut batch, key.all_locations(), "trash purge");
        self.store.commit(batch)?;
        self.releases.dispatch(pending);
        Ok(true)
    }

    /// Newest Trash row for one key name
    fn newest_trash(
        &self,
        volume: &str,
        bucket: &str,
        key: &str,
    ) -> OmResult<Option<(String, TrashRow)>> {
        let mut newest = None;
        self.store.for_each_row::<TrashRow>(
            &trash_name_prefix(volume, bucket, key),
            self.settings.batch_size,
            |row_key, row| {
                newest = Some((row_key, row));
                Ok(())
            },
        )?;
        Ok(newest)
    }
}

impl TrashOps for TrashService {
    fn recover_trash(
        &self,
        ctx: &RequestContext,
        volume: &str,
        bucket: &str,
        key: &str,
        dest_bucket: &str,
    ) -> OmResult<KeyInfo> {
        let Some((trash_key, trash)) = self.newest_trash(volume, bucket, key)? else {
            return Err(OmError::KeyNotFound(format!(
                "{volume}/{bucket}/{key} (trash)"
            )));
        };
        let Some(mut row) = trash.key else {
            return Err(OmError::KvCorrupt {
                key: trash_key,
                reason: "trash row carries no key".to_string(),
            });
        };
        load_bucket(&self.store, volume, dest_bucket)?;
        let dest_key = key_key(volume, dest_bucket, key);
        if self.store.exists(&dest_key)? {
            return Err(OmError::KeyAlreadyExists(format!(
                "{volume}/{dest_bucket}/{key}"
            )));
        }

        row.bucket = dest_bucket.to_string();
        row.modified_at = current_time_millis();

        let usage_guard = self.usage.lock();
        let volume_row = self.usage.charge(volume, row.data_size, 0)?;
        let mut batch = RowBatch::new();
        batch.put(dest_key, &row);
        batch.delete(trash_key);
        batch.put(volume_key(volume), &volume_row);
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        drop(usage_guard);

        info!(
            "Recovered '{}/{}/{}' from trash into bucket '{}'",
            volume, bucket, key, dest_bucket
        );
        Ok(KeyInfo::from(&row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyOps;
    use crate::key::tests::{Fixture, fixture, write_key};
    use omm_common::{KeyArgs, ResultCode};

    const DAY_MS: u64 = 24 * 3600 * 1000;

    fn service(f: &Fixture) -> (TrashService, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let service = TrashService::new(
            f.store.clone(),
            Arc::new(LockManager::new()),
            f.releases.clone(),
            f.usage.clone(),
            metrics.clone(),
            TrashSettings::default(),
        );
        (service, metrics)
    }

    fn trash(f: &Fixture, bucket: &str, key: &str, size: u64) {
        write_key(f, bucket, key, size);
        f.keys
            .delete_key(&f.ctx, &KeyArgs::new("v", bucket, key))
            .unwrap();
    }

    #[test]
    fn test_recover_into_destination() {
        let f = fixture();
        let (trash_service, _) = service(&f);
        trash(&f, "trash", "k", 100);

        let info = trash_service
            .recover_trash(&f.ctx, "v", "trash", "k", "plain")
            .unwrap();
        assert_eq!(info.bucket, "plain");
        assert_eq!(info.data_size, 100);

        let restored = f
            .keys
            .lookup_key(&f.ctx, &KeyArgs::new("v", "plain", "k"))
            .unwrap();
        assert_eq!(restored.locations, info.locations);
        assert!(!f.store.has_children(TRASH_PREFIX).unwrap());
        assert_eq!(f.allocator.live_blocks(), 1);
    }

    #[test]
    fn test_recover_picks_newest_copy() {
        let f = fixture();
        let (trash_service, _) = service(&f);
        trash(&f, "trash", "k", 10);
        trash(&f, "trash", "k", 20);

        let info = trash_service
            .recover_trash(&f.ctx, "v", "trash", "k", "trash")
            .unwrap();
        assert_eq!(info.data_size, 20);
        // the older copy stays in trash
        let left = f
            .store
            .count_rows(&trash_name_prefix("v", "trash", "k"), 10)
            .unwrap();
        assert_eq!(left, 1);
    }

    #[test]
    fn test_recover_errors() {
        let f = fixture();
        let (trash_service, _) = service(&f);
        let code = |r: OmResult<KeyInfo>| r.unwrap_err().code();

        assert_eq!(
            code(trash_service.recover_trash(&f.ctx, "v", "trash", "k", "plain")),
            ResultCode::KeyNotFound
        );

        trash(&f, "trash", "k", 10);
        assert_eq!(
            code(trash_service.recover_trash(&f.ctx, "v", "trash", "k", "missing")),
            ResultCode::BucketNotFound
        );

        write_key(&f, "plain", "k", 10);
        assert_eq!(
            code(trash_service.recover_trash(&f.ctx, "v", "trash", "k", "plain")),
            ResultCode::KeyAlreadyExists
        );
        // nothing moved on failure
        assert!(f.store.has_children(TRASH_PREFIX).unwrap());
    }

    #[test]
    fn test_sweep_expires_and_purges() {
        let f = fixture();
        let (trash_service, metrics) = service(&f);
        trash(&f, "trash", "old", 100);
        f.keys
            .open_key(&f.ctx, &KeyArgs::new("v", "plain", "pending").with_size(100))
            .unwrap();
        assert_eq!(f.allocator.live_blocks(), 2);

        // nothing is old enough yet
        let report = trash_service.sweep(current_time_millis()).unwrap();
        assert_eq!(report, SweepReport::default());

        let later = current_time_millis() + 15 * DAY_MS;
        let report = trash_service.sweep(later).unwrap();
        assert_eq!(report.open_keys_expired, 1);
        assert_eq!(report.trash_purged, 1);
        assert!(!f.store.has_children(OPEN_KEY_PREFIX).unwrap());
        assert!(!f.store.has_children(TRASH_PREFIX).unwrap());
        assert_eq!(f.allocator.live_blocks(), 0);
        assert_eq!(metrics.event(Event::OpenKeysExpired), 1);
        assert_eq!(metrics.event(Event::TrashKeysPurged), 1);
    }

    #[test]
    fn test_sweep_skips_locked_keys() {
        let f = fixture();
        let locks = Arc::new(LockManager::new());
        let trash_service = TrashService::new(
            f.store.clone(),
            locks.clone(),
            f.releases.clone(),
            f.usage.clone(),
            Arc::new(MetricsRegistry::new()),
            TrashSettings {
                lock_timeout: Duration::from_millis(10),
                ..TrashSettings::default()
            },
        );
        f.keys
            .open_key(&f.ctx, &KeyArgs::new("v", "plain", "busy").with_size(10))
            .unwrap();
        let held = locks
            .acquire(
                vec![LockRequest::exclusive(LockScope::key("v", "plain", "busy"))],
                Instant::now() + Duration::from_secs(1),
            )
            .unwrap();

        let later = current_time_millis() + 8 * DAY_MS;
        assert_eq!(trash_service.expire_open_keys(later).unwrap(), 0);
        drop(held);
        assert_eq!(trash_service.expire_open_keys(later).unwrap(), 1);
    }

    #[test]
    fn test_sweep_pages_through_a_large_backlog() {
        let f = fixture();
        let trash_service = TrashService::new(
            f.store.clone(),
            Arc::new(LockManager::new()),
            f.releases.clone(),
            f.usage.clone(),
            Arc::new(MetricsRegistry::new()),
            TrashSettings {
                batch_size: 2,
                ..TrashSettings::default()
            },
        );
        for i in 0..5 {
            trash(&f, "trash", &format!("t{i}"), 10);
            f.keys
                .open_key(&f.ctx, &KeyArgs::new("v", "plain", &format!("o{i}")).with_size(10))
                .unwrap();
        }
        let later = current_time_millis() + 15 * DAY_MS;
        let report = trash_service.sweep(later).unwrap();
        assert_eq!(report.open_keys_expired, 5);
        assert_eq!(report.trash_purged, 5);
        assert!(!f.store.has_children(OPEN_KEY_PREFIX).unwrap());
        assert!(!f.store.has_children(TRASH_PREFIX).unwrap());
        assert_eq!(f.allocator.live_blocks(), 0);
        assert_eq!(f.releases.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_trash_row_without_key_is_skipped_and_marked() {
        let f = fixture();
        let degraded = Arc::new(DegradedRanges::new());
        let (trash_service, _) = service(&f);
        let trash_service = trash_service.with_degraded(degraded.clone());
        trash(&f, "trash", "good", 10);
        let broken = omm_store::keys::trash_key("v", "trash", "broken", 1);
        f.store
            .put_row(
                &broken,
                &TrashRow {
                    key: None,
                    deleted_at: 1,
                },
            )
            .unwrap();

        let later = current_time_millis() + 15 * DAY_MS;
        assert_eq!(trash_service.purge_trash(later).unwrap(), 1);
        assert!(f.store.exists(&broken).unwrap());
        assert_eq!(
            degraded.list(),
            [broken.strip_prefix(TRASH_PREFIX).unwrap().to_string()]
        );
        // a second pass neither purges nor fails on it
        assert_eq!(trash_service.purge_trash(later).unwrap(), 0);
        assert_eq!(degraded.list().len(), 1);
    }
}
