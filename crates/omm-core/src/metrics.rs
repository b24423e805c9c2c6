//! Metadata manager metrics
//!
//! Per-operation attempt and failure counters, background event counters,
//! and the namespace gauges. Counter names are part of the exposed surface
//! and must not change. Counters are process-local; gauges are snapshotted
//! to `/meta/gauges` so a restart restores them without a full scan.

use omm_common::current_time_millis;
use omm_store::keys::GAUGES_KEY;
use omm_store::rows::GaugeRow;
use omm_store::{OmStore, SCHEMA_VERSION, StoreResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::warn;

/// Generation stamped on gauge snapshots; a mismatch forces a rescan
pub const GAUGE_GENERATION: u64 = SCHEMA_VERSION;

/// Operation families whose attempt counters roll up into an aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpFamily {
    Volume,
    Bucket,
    Key,
}

impl OpFamily {
    pub const ALL: [Self; 3] = [Self::Volume, Self::Bucket, Self::Key];

    #[must_use]
    pub const fn aggregate_name(self) -> &'static str {
        match self {
            Self::Volume => "NumVolumeOps",
            Self::Bucket => "NumBucketOps",
            Self::Key => "NumKeyOps",
        }
    }
}

/// Operations exposed by the facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OmOperation {
    CreateVolume,
    SetVolumeProperty,
    GetVolumeInfo,
    DeleteVolume,
    ListVolumes,
    CreateBucket,
    SetBucketProperty,
    GetBucketInfo,
    DeleteBucket,
    ListBuckets,
    OpenKey,
    CommitKey,
    AbortKey,
    LookupKey,
    DeleteKey,
    ListKeys,
    ListTrash,
    RecoverTrash,
    InitiateMultipartUpload,
    CommitMultipartUploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    ListMultipartUploadParts,
    AllocateBlock,
}

const OP_COUNT: usize = OmOperation::ALL.len();

impl OmOperation {
    pub const ALL: [Self; 24] = [
        Self::CreateVolume,
        Self::SetVolumeProperty,
        Self::GetVolumeInfo,
        Self::DeleteVolume,
        Self::ListVolumes,
        Self::CreateBucket,
        Self::SetBucketProperty,
        Self::GetBucketInfo,
        Self::DeleteBucket,
        Self::ListBuckets,
        Self::OpenKey,
        Self::CommitKey,
        Self::AbortKey,
        Self::LookupKey,
        Self::DeleteKey,
        Self::ListKeys,
        Self::ListTrash,
        Self::RecoverTrash,
        Self::InitiateMultipartUpload,
        Self::CommitMultipartUploadPart,
        Self::CompleteMultipartUpload,
        Self::AbortMultipartUpload,
        Self::ListMultipartUploadParts,
        Self::AllocateBlock,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateVolume => "CreateVolume",
            Self::SetVolumeProperty => "SetVolumeProperty",
            Self::GetVolumeInfo => "GetVolumeInfo",
            Self::DeleteVolume => "DeleteVolume",
            Self::ListVolumes => "ListVolumes",
            Self::CreateBucket => "CreateBucket",
            Self::SetBucketProperty => "SetBucketProperty",
            Self::GetBucketInfo => "GetBucketInfo",
            Self::DeleteBucket => "DeleteBucket",
            Self::ListBuckets => "ListBuckets",
            Self::OpenKey => "OpenKey",
            Self::CommitKey => "CommitKey",
            Self::AbortKey => "AbortKey",
            Self::LookupKey => "LookupKey",
            Self::DeleteKey => "DeleteKey",
            Self::ListKeys => "ListKeys",
            Self::ListTrash => "ListTrash",
            Self::RecoverTrash => "RecoverTrash",
            Self::InitiateMultipartUpload => "InitiateMultipartUpload",
            Self::CommitMultipartUploadPart => "CommitMultipartUploadPart",
            Self::CompleteMultipartUpload => "CompleteMultipartUpload",
            Self::AbortMultipartUpload => "AbortMultipartUpload",
            Self::ListMultipartUploadParts => "ListMultipartUploadParts",
            Self::AllocateBlock => "AllocateBlock",
        }
    }

    /// Name of the attempt counter
    pub const fn attempt_name(self) -> &'static str {
        match self {
            Self::CreateVolume => "NumVolumeCreates",
            Self::SetVolumeProperty => "NumVolumeUpdates",
            Self::GetVolumeInfo => "NumVolumeInfos",
            Self::DeleteVolume => "NumVolumeDeletes",
            Self::ListVolumes => "NumVolumeLists",
            Self::CreateBucket => "NumBucketCreates",
            Self::SetBucketProperty => "NumBucketUpdates",
            Self::GetBucketInfo => "NumBucketInfos",
            Self::DeleteBucket => "NumBucketDeletes",
            Self::ListBuckets => "NumBucketLists",
            Self::OpenKey => "NumKeyAllocate",
            Self::CommitKey => "NumKeyCommits",
            Self::AbortKey => "NumKeyAborts",
            Self::LookupKey => "NumKeyLookup",
            Self::DeleteKey => "NumKeyDeletes",
            Self::ListKeys => "NumKeyLists",
            Self::ListTrash => "NumTrashKeyLists",
            Self::RecoverTrash => "NumTrashRecovers",
            Self::InitiateMultipartUpload => "NumInitiateMultipartUploads",
            Self::CommitMultipartUploadPart => "NumCommitMultipartUploadParts",
            Self::CompleteMultipartUpload => "NumCompleteMultipartUploads",
            Self::AbortMultipartUpload => "NumAbortMultipartUploads",
            Self::ListMultipartUploadParts => "NumListMultipartUploadParts",
            Self::AllocateBlock => "NumBlockAllocateCalls",
        }
    }

    /// Name of the failure counter
    pub const fn failure_name(self) -> &'static str {
        match self {
            Self::CreateVolume => "NumVolumeCreateFails",
            Self::SetVolumeProperty => "NumVolumeUpdateFails",
            Self::GetVolumeInfo => "NumVolumeInfoFails",
            Self::DeleteVolume => "NumVolumeDeleteFails",
            Self::ListVolumes => "NumVolumeListFails",
            Self::CreateBucket => "NumBucketCreateFails",
            Self::SetBucketProperty => "NumBucketUpdateFails",
            Self::GetBucketInfo => "NumBucketInfoFails",
            Self::DeleteBucket => "NumBucketDeleteFails",
            Self::ListBuckets => "NumBucketListFails",
            Self::OpenKey => "NumKeyAllocateFails",
            Self::CommitKey => "NumKeyCommitFails",
            Self::AbortKey => "NumKeyAbortFails",
            Self::LookupKey => "NumKeyLookupFails",
            Self::DeleteKey => "NumKeyDeleteFails",
            Self::ListKeys => "NumKeyListFails",
            Self::ListTrash => "NumTrashKeyListFails",
            Self::RecoverTrash => "NumTrashRecoverFails",
            Self::InitiateMultipartUpload => "NumInitiateMultipartUploadFails",
            Self::CommitMultipartUploadPart => "NumCommitMultipartUploadPartFails",
            Self::CompleteMultipartUpload => "NumCompleteMultipartUploadFails",
            Self::AbortMultipartUpload => "NumAbortMultipartUploadFails",
            Self::ListMultipartUploadParts => "NumListMultipartUploadPartFails",
            Self::AllocateBlock => "NumBlockAllocateCallFails",
        }
    }

    /// Aggregate this operation's attempts roll into, if any
    pub const fn family(self) -> Option<OpFamily> {
        match self {
            Self::CreateVolume
            | Self::SetVolumeProperty
            | Self::GetVolumeInfo
            | Self::DeleteVolume
            | Self::ListVolumes => Some(OpFamily::Volume),
            Self::CreateBucket
            | Self::SetBucketProperty
            | Self::GetBucketInfo
            | Self::DeleteBucket
            | Self::ListBuckets => Some(OpFamily::Bucket),
            Self::AllocateBlock => None,
            _ => Some(OpFamily::Key),
        }
    }

    /// Mutating operations are audited at info level
    pub const fn is_write(self) -> bool {
        !matches!(
            self,
            Self::GetVolumeInfo
                | Self::ListVolumes
                | Self::GetBucketInfo
                | Self::ListBuckets
                | Self::LookupKey
                | Self::ListKeys
                | Self::ListTrash
                | Self::ListMultipartUploadParts
        )
    }
}

/// Background events that are not client operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    OpenKeysExpired,
    TrashKeysPurged,
    BlockReleases,
    BlockReleaseFails,
    GaugeSnapshotFails,
}

const EVENT_COUNT: usize = Event::ALL.len();

impl Event {
    pub const ALL: [Self; 5] = [
        Self::OpenKeysExpired,
        Self::TrashKeysPurged,
        Self::BlockReleases,
        Self::BlockReleaseFails,
        Self::GaugeSnapshotFails,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenKeysExpired => "NumOpenKeysExpired",
            Self::TrashKeysPurged => "NumTrashKeysPurged",
            Self::BlockReleases => "NumBlockReleases",
            Self::BlockReleaseFails => "NumBlockReleaseFails",
            Self::GaugeSnapshotFails => "NumGaugeSnapshotFails",
        }
    }
}

/// Namespace size gauges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gauge {
    NumVolumes,
    NumBuckets,
    NumKeys,
}

const GAUGE_COUNT: usize = Gauge::ALL.len();

impl Gauge {
    pub const ALL: [Self; 3] = [Self::NumVolumes, Self::NumBuckets, Self::NumKeys];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NumVolumes => "NumVolumes",
            Self::NumBuckets => "NumBuckets",
            Self::NumKeys => "NumKeys",
        }
    }
}

/// Point-in-time copy of every metric, keyed by exposed name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<&'static str, u64>,
    pub gauges: BTreeMap<&'static str, i64>,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn gauge(&self, name: &str) -> i64 {
        self.gauges.get(name).copied().unwrap_or(0)
    }
}

/// Metrics registry shared by the facade and the background tasks
#[derive(Debug)]
pub struct MetricsRegistry {
    attempts: [AtomicU64; OP_COUNT],
    failures: [AtomicU64; OP_COUNT],
    events: [AtomicU64; EVENT_COUNT],
    gauges: [AtomicI64; GAUGE_COUNT],
    /// Serializes gauge snapshot writes
    snapshot_lock: Mutex<()>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            attempts: [const { AtomicU64::new(0) }; OP_COUNT],
            failures: [const { AtomicU64::new(0) }; OP_COUNT],
            events: [const { AtomicU64::new(0) }; EVENT_COUNT],
            gauges: [const { AtomicI64::new(0) }; GAUGE_COUNT],
            snapshot_lock: Mutex::new(()),
        }
    }

    pub fn record_attempt(&self, op: OmOperation) {
        self.attempts[op as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, op: OmOperation) {
        self.failures[op as usize].fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn attempts(&self, op: OmOperation) -> u64 {
        self.attempts[op as usize].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self, op: OmOperation) -> u64 {
        self.failures[op as usize].load(Ordering::Relaxed)
    }

    /// Sum of the family's attempt counters
    #[must_use]
    pub fn aggregate(&self, family: OpFamily) -> u64 {
        OmOperation::ALL
            .iter()
            .filter(|op| op.family() == Some(family))
            .map(|op| self.attempts(*op))
            .sum()
    }

    pub fn inc(&self, event: Event) {
        self.add(event, 1);
    }

    pub fn add(&self, event: Event, n: u64) {
        self.events[event as usize].fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn event(&self, event: Event) -> u64 {
        self.events[event as usize].load(Ordering::Relaxed)
    }

    pub fn set(&self, gauge: Gauge, value: i64) {
        self.gauges[gauge as usize].store(value, Ordering::Relaxed);
    }

    pub fn adjust(&self, gauge: Gauge, delta: i64) {
        self.gauges[gauge as usize].fetch_add(delta, Ordering::Relaxed);
    }

    #[must_use]
    pub fn gauge(&self, gauge: Gauge) -> i64 {
        self.gauges[gauge as usize].load(Ordering::Relaxed)
    }

    /// Look up any counter by its exposed name, aggregates included
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        if let Some(family) = OpFamily::ALL.iter().find(|f| f.aggregate_name() == name) {
            return Some(self.aggregate(*family));
        }
        for op in OmOperation::ALL {
            if op.attempt_name() == name {
                return Some(self.attempts(op));
            }
            if op.failure_name() == name {
                return Some(self.failures(op));
            }
        }
        Event::ALL
            .iter()
            .find(|e| e.as_str() == name)
            .map(|e| self.event(*e))
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::default();
        for family in OpFamily::ALL {
            snapshot
                .counters
                .insert(family.aggregate_name(), self.aggregate(family));
        }
        for op in OmOperation::ALL {
            snapshot.counters.insert(op.attempt_name(), self.attempts(op));
            snapshot.counters.insert(op.failure_name(), self.failures(op));
        }
        for event in Event::ALL {
            snapshot.counters.insert(event.as_str(), self.event(event));
        }
        for gauge in Gauge::ALL {
            snapshot.gauges.insert(gauge.as_str(), self.gauge(gauge));
        }
        snapshot
    }

    /// Restore gauges from a persisted snapshot row.
    ///
    /// Callers pass only rows left by a graceful stop; see
    /// [`MetricsRegistry::save_gauges`] for why periodic rows are unclean.
    pub fn restore_gauges(&self, row: &GaugeRow) {
        self.set(Gauge::NumVolumes, row.num_volumes);
        self.set(Gauge::NumBuckets, row.num_buckets);
        self.set(Gauge::NumKeys, row.num_keys);
    }

    /// Persist the current gauges to `/meta/gauges`.
    ///
    /// `clean_shutdown` is only set by a graceful stop. Periodic saves pass
    /// `false`: keys committed after the save are not in the row, so a crash
    /// would leave it behind, and the next startup recounts instead.
    pub fn save_gauges(&self, store: &OmStore, clean_shutdown: bool) -> StoreResult<GaugeRow> {
        let _guard = self.snapshot_lock.lock();
        let row = GaugeRow {
            generation: GAUGE_GENERATION,
            num_volumes: self.gauge(Gauge::NumVolumes),
            num_buckets: self.gauge(Gauge::NumBuckets),
            num_keys: self.gauge(Gauge::NumKeys),
            saved_at: current_time_millis(),
            clean_shutdown,
        };
        store.put_row(GAUGES_KEY, &row)?;
        Ok(row)
    }

    /// Snapshot gauges, counting a failed write instead of returning it
    pub fn persist_gauges(&self, store: &OmStore, clean_shutdown: bool) -> bool {
        match self.save_gauges(store, clean_shutdown) {
            Ok(_) => true,
            Err(e) => {
                self.inc(Event::GaugeSnapshotFails);
                warn!("Failed to snapshot gauges: {}", e);
                false
            }
        }
    }

    /// Export metrics in Prometheus text format
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::with_capacity(8 * 1024);
        for (name, value) in &snapshot.counters {
            let metric = prometheus_name(name);
            let _ = writeln!(output, "# HELP {metric} {name}");
            let _ = writeln!(output, "# TYPE {metric} counter");
            let _ = writeln!(output, "{metric} {value}");
        }
        for (name, value) in &snapshot.gauges {
            let metric = prometheus_name(name);
            let _ = writeln!(output, "# HELP {metric} {name}");
            let _ = writeln!(output, "# TYPE {metric} gauge");
            let _ = writeln!(output, "{metric} {value}");
        }
        output
    }
}

/// `NumBucketCreates` -> `omm_num_bucket_creates`
fn prometheus_name(name: &str) -> String {
    let mut out = String::from("omm_");
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use omm_store::MemoryKvStore;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_counter_names_are_unique() {
        let mut names = HashSet::new();
        for op in OmOperation::ALL {
            assert!(names.insert(op.attempt_name()));
            assert!(names.insert(op.failure_name()));
        }
        for event in Event::ALL {
            assert!(names.insert(event.as_str()));
        }
        for family in OpFamily::ALL {
            assert!(names.insert(family.aggregate_name()));
        }
    }

    #[test]
    fn test_aggregates_derive_from_attempts() {
        let metrics = MetricsRegistry::new();
        metrics.record_attempt(OmOperation::CreateBucket);
        metrics.record_attempt(OmOperation::ListBuckets);
        metrics.record_attempt(OmOperation::OpenKey);
        metrics.record_attempt(OmOperation::AllocateBlock);
        metrics.record_failure(OmOperation::CreateBucket);

        assert_eq!(metrics.aggregate(OpFamily::Bucket), 2);
        assert_eq!(metrics.aggregate(OpFamily::Key), 1);
        assert_eq!(metrics.counter("NumBucketOps"), Some(2));
        assert_eq!(metrics.counter("NumBucketCreateFails"), Some(1));
        assert_eq!(metrics.counter("NumBlockAllocateCalls"), Some(1));
        assert_eq!(metrics.counter("NoSuchCounter"), None);
    }

    #[test]
    fn test_gauges() {
        let metrics = MetricsRegistry::new();
        metrics.adjust(Gauge::NumBuckets, 3);
        metrics.adjust(Gauge::NumBuckets, -1);
        metrics.set(Gauge::NumKeys, 9);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.gauge("NumBuckets"), 2);
        assert_eq!(snapshot.gauge("NumKeys"), 9);
    }

    #[test]
    fn test_save_and_restore_gauges() {
        let store = OmStore::new(Arc::new(MemoryKvStore::new()));
        let metrics = MetricsRegistry::new();
        metrics.set(Gauge::NumVolumes, 1);
        metrics.set(Gauge::NumBuckets, 2);
        let saved = metrics.save_gauges(&store, true).unwrap();
        assert_eq!(saved.generation, GAUGE_GENERATION);

        let row: GaugeRow = store.get_row(GAUGES_KEY).unwrap().unwrap();
        let restored = MetricsRegistry::new();
        restored.restore_gauges(&row);
        assert_eq!(restored.gauge(Gauge::NumBuckets), 2);
        assert!(row.clean_shutdown);
    }

    #[test]
    fn test_failed_snapshot_is_counted() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = OmStore::new(kv.clone());
        let metrics = MetricsRegistry::new();
        kv.set_unavailable(true);
        assert!(!metrics.persist_gauges(&store, false));
        assert_eq!(metrics.event(Event::GaugeSnapshotFails), 1);
        kv.set_unavailable(false);
        assert!(metrics.persist_gauges(&store, false));
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();
        metrics.record_attempt(OmOperation::CreateVolume);
        metrics.set(Gauge::NumVolumes, 1);
        let output = metrics.export_prometheus();
        assert!(output.contains("# TYPE omm_num_volume_creates counter"));
        assert!(output.contains("omm_num_volume_creates 1"));
        assert!(output.contains("# TYPE omm_num_volumes gauge"));
        assert_eq!(prometheus_name("NumKeyOps"), "omm_num_key_ops");
    }
}
