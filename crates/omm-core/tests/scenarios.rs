//! End-to-end facade scenarios: counters, gauges, restart, two-phase
//! writes and trash recovery.

mod common;

use common::{Cluster, namespace, put_key};
use omm_common::{
    BucketArgs, BucketInfo, BucketUpdate, CompletedPart, KeyArgs, ListArgs, OmConfig, OmError,
    OmResult, ResultCode, RowChange, VolumeArgs, total_length,
};
use omm_core::{
    BucketOps, Gauge, GaugeSource, OmOperation, OzoneManager, RequestContext,
};
use omm_store::keys::{TRASH_PREFIX, key_prefix};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tokio_util::sync::CancellationToken;

/// Bucket manager that stores nothing and can be told to fail every call
#[derive(Default)]
struct NoopBucketOps {
    failing: AtomicBool,
}

impl NoopBucketOps {
    fn outcome<T>(&self, value: T) -> OmResult<T> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(OmError::KvUnavailable("injected failure".into()));
        }
        Ok(value)
    }
}

impl BucketOps for NoopBucketOps {
    fn create_bucket(&self, _ctx: &RequestContext, _args: &BucketArgs) -> OmResult<RowChange> {
        self.outcome(RowChange::Inserted)
    }

    fn delete_bucket(&self, _ctx: &RequestContext, _volume: &str, _bucket: &str) -> OmResult<()> {
        self.outcome(())
    }

    fn get_bucket_info(
        &self,
        _ctx: &RequestContext,
        _volume: &str,
        _bucket: &str,
    ) -> OmResult<BucketInfo> {
        self.outcome(BucketInfo::default())
    }

    fn set_bucket_property(
        &self,
        _ctx: &RequestContext,
        _update: &BucketUpdate,
    ) -> OmResult<BucketInfo> {
        self.outcome(BucketInfo::default())
    }

    fn list_buckets(
        &self,
        _ctx: &RequestContext,
        _volume: &str,
        _args: &ListArgs,
    ) -> OmResult<Vec<BucketInfo>> {
        self.outcome(Vec::new())
    }
}

fn with_noop_buckets(cluster: &Cluster, ops: Arc<NoopBucketOps>) -> OzoneManager {
    OzoneManager::builder(
        OmConfig::default(),
        cluster.kv.clone(),
        cluster.allocator.clone(),
    )
    .with_bucket_ops(ops)
    .open()
    .unwrap()
}

/// create, delete, info, update, list; returns how many failed
fn five_bucket_ops(om: &OzoneManager) -> usize {
    let ctx = RequestContext::new();
    [
        om.create_bucket(&ctx, &BucketArgs::new("vol", "bucket")).err(),
        om.delete_bucket(&ctx, "vol", "bucket").err(),
        om.get_bucket_info(&ctx, "vol", "bucket").err(),
        om.set_bucket_property(&ctx, &BucketUpdate::new("vol", "bucket"))
            .err(),
        om.list_buckets(&ctx, "vol", &ListArgs::default()).err(),
    ]
    .iter()
    .filter(|e| e.is_some())
    .count()
}

fn counter(om: &OzoneManager, name: &str) -> u64 {
    om.metrics().counter(name).unwrap()
}

#[test]
fn test_bucket_counters_gauges_and_restart() {
    let cluster = Cluster::new();
    let ops = Arc::new(NoopBucketOps::default());
    let om = with_noop_buckets(&cluster, ops.clone());
    let ctx = RequestContext::new();

    // mixed operations against a no-op manager
    assert_eq!(five_bucket_ops(&om), 0);
    assert_eq!(counter(&om, "NumBucketOps"), 5);
    for name in [
        "NumBucketCreates",
        "NumBucketUpdates",
        "NumBucketInfos",
        "NumBucketDeletes",
        "NumBucketLists",
    ] {
        assert_eq!(counter(&om, name), 1, "{name}");
    }
    assert_eq!(om.metrics().gauge(Gauge::NumBuckets), 0);

    // gauge movement
    for name in ["b0", "b1", "b2"] {
        om.create_bucket(&ctx, &BucketArgs::new("vol", name)).unwrap();
    }
    om.delete_bucket(&ctx, "vol", "b0").unwrap();
    assert_eq!(om.metrics().gauge(Gauge::NumBuckets), 2);

    // every call fails
    ops.failing.store(true, Ordering::Relaxed);
    assert_eq!(five_bucket_ops(&om), 5);
    assert_eq!(counter(&om, "NumBucketOps"), 14);
    for (name, attempts) in [
        ("NumBucketCreates", 5),
        ("NumBucketUpdates", 2),
        ("NumBucketInfos", 2),
        ("NumBucketDeletes", 3),
        ("NumBucketLists", 2),
    ] {
        assert_eq!(counter(&om, name), attempts, "{name}");
    }
    for name in [
        "NumBucketCreateFails",
        "NumBucketUpdateFails",
        "NumBucketInfoFails",
        "NumBucketDeleteFails",
        "NumBucketListFails",
    ] {
        assert_eq!(counter(&om, name), 1, "{name}");
    }
    assert_eq!(om.metrics().gauge(Gauge::NumBuckets), 2);

    // restart: the clean snapshot is trusted, no rescan
    om.shutdown();
    drop(om);
    let om = with_noop_buckets(&cluster, Arc::new(NoopBucketOps::default()));
    assert_eq!(om.recovery_report().gauges, GaugeSource::Snapshot);
    assert_eq!(om.metrics().gauge(Gauge::NumBuckets), 2);
    // counters are process-local
    assert_eq!(counter(&om, "NumBucketOps"), 0);
}

#[test]
fn test_key_two_phase_commits_replace_one_row() {
    let cluster = Cluster::new();
    let om = cluster.open();
    namespace(&om);
    let ctx = RequestContext::new();

    for size in [10, 20, 30] {
        put_key(&om, "plain", "k", size).unwrap();
    }
    assert_eq!(counter(&om, "NumKeyAllocate"), 3);
    assert_eq!(counter(&om, "NumKeyCommits"), 3);
    assert_eq!(om.metrics().gauge(Gauge::NumKeys), 1);

    let info = om.lookup_key(&ctx, &KeyArgs::new("v", "plain", "k")).unwrap();
    assert_eq!(info.version, 2);
    assert_eq!(info.data_size, 30);
    // replaced blocks went back to the block layer
    assert_eq!(cluster.allocator.live_blocks(), 1);

    om.delete_key(&ctx, &KeyArgs::new("v", "plain", "k")).unwrap();
    assert_eq!(counter(&om, "NumKeyDeletes"), 1);
    assert_eq!(om.metrics().gauge(Gauge::NumKeys), 0);
    assert_eq!(cluster.allocator.live_blocks(), 0);
    assert_eq!(
        om.lookup_key(&ctx, &KeyArgs::new("v", "plain", "k"))
            .unwrap_err()
            .code(),
        ResultCode::KeyNotFound
    );
}

#[test]
fn test_open_key_invisible_until_commit() {
    let cluster = Cluster::new();
    let om = cluster.open();
    namespace(&om);
    let ctx = RequestContext::new();
    let args = KeyArgs::new("v", "plain", "pending").with_size(250);

    let session = om.open_key(&ctx, &args).unwrap();
    assert_eq!(session.key_info.locations.len(), 3);
    assert_eq!(
        om.lookup_key(&ctx, &args).unwrap_err().code(),
        ResultCode::KeyNotFound
    );

    om.allocate_block(&ctx, &args, session.client_id).unwrap();
    om.commit_key(&ctx, &args, session.client_id, 120).unwrap();
    let info = om.lookup_key(&ctx, &args).unwrap();
    assert_eq!(total_length(&info.locations), 120);
    // blocks past the committed size were released
    assert_eq!(cluster.allocator.live_blocks(), 2);
    assert_eq!(counter(&om, "NumBlockAllocateCalls"), 1);
    // block allocations are not key operations
    assert_eq!(counter(&om, "NumKeyOps"), 4);
}

#[test]
fn test_trash_recovery_single_call() {
    let cluster = Cluster::new();
    let om = cluster.open();
    namespace(&om);
    let ctx = RequestContext::new();
    put_key(&om, "trash", "k", 50).unwrap();

    om.delete_key(&ctx, &KeyArgs::new("v", "trash", "k")).unwrap();
    assert_eq!(om.metrics().gauge(Gauge::NumKeys), 0);
    let trash = om
        .list_trash(&ctx, "v", "trash", &ListArgs::default())
        .unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].versions.len(), 1);

    // a missing destination is reported by the one call
    let err = om
        .recover_trash(&ctx, "v", "trash", "k", "missing")
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::BucketNotFound);
    assert_eq!(counter(&om, "NumTrashRecoverFails"), 1);

    let restored = om.recover_trash(&ctx, "v", "trash", "k", "plain").unwrap();
    assert_eq!(restored.bucket, "plain");
    assert_eq!(restored.data_size, 50);
    assert_eq!(
        om.lookup_key(&ctx, &KeyArgs::new("v", "plain", "k"))
            .unwrap()
            .data_size,
        50
    );
    assert!(!cluster.store().has_children(TRASH_PREFIX).unwrap());
    assert_eq!(om.metrics().gauge(Gauge::NumKeys), 1);
    assert_eq!(counter(&om, "NumTrashRecovers"), 2);

    // nothing left to recover
    assert_eq!(
        om.recover_trash(&ctx, "v", "trash", "k", "plain")
            .unwrap_err()
            .code(),
        ResultCode::KeyNotFound
    );
}

#[test]
fn test_recover_refuses_live_destination() {
    let cluster = Cluster::new();
    let om = cluster.open();
    namespace(&om);
    let ctx = RequestContext::new();
    put_key(&om, "trash", "k", 5).unwrap();
    put_key(&om, "plain", "k", 7).unwrap();
    om.delete_key(&ctx, &KeyArgs::new("v", "trash", "k")).unwrap();

    let err = om.recover_trash(&ctx, "v", "trash", "k", "plain").unwrap_err();
    assert_eq!(err.code(), ResultCode::KeyAlreadyExists);
    assert_eq!(
        om.lookup_key(&ctx, &KeyArgs::new("v", "plain", "k"))
            .unwrap()
            .data_size,
        7
    );
}

#[test]
fn test_multipart_through_facade() {
    let cluster = Cluster::new();
    let om = cluster.open();
    namespace(&om);
    let ctx = RequestContext::new();
    let args = KeyArgs::new("v", "plain", "video");

    let upload = om.initiate_multipart_upload(&ctx, &args).unwrap();
    let mut parts = Vec::new();
    for (n, size) in [(1, 100), (2, 40)] {
        let part = om
            .commit_multipart_part(&ctx, &args.clone().with_size(size), &upload.upload_id, n)
            .unwrap();
        parts.push(CompletedPart::from(&part));
    }
    assert_eq!(
        om.list_multipart_parts(&ctx, &args, &upload.upload_id)
            .unwrap()
            .len(),
        2
    );
    om.complete_multipart_upload(&ctx, &args, &upload.upload_id, &parts)
        .unwrap();
    assert_eq!(om.lookup_key(&ctx, &args).unwrap().data_size, 140);
    assert_eq!(om.metrics().gauge(Gauge::NumKeys), 1);

    let err = om
        .abort_multipart_upload(&ctx, &args, &upload.upload_id)
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::NoSuchMultipartUpload);
    assert_eq!(counter(&om, "NumInitiateMultipartUploads"), 1);
    assert_eq!(counter(&om, "NumAbortMultipartUploadFails"), 1);
}

#[test]
fn test_referential_checks() {
    let cluster = Cluster::new();
    let om = cluster.open();
    namespace(&om);
    let ctx = RequestContext::new();
    put_key(&om, "plain", "k", 1).unwrap();

    assert_eq!(
        om.create_bucket(&ctx, &BucketArgs::new("nope", "b"))
            .unwrap_err()
            .code(),
        ResultCode::VolumeNotFound
    );
    assert_eq!(
        om.delete_volume(&ctx, "v").unwrap_err().code(),
        ResultCode::VolumeNotEmpty
    );
    assert_eq!(
        om.delete_bucket(&ctx, "v", "plain").unwrap_err().code(),
        ResultCode::BucketNotEmpty
    );
    assert_eq!(
        om.create_volume(&ctx, &VolumeArgs::new("v", "bob"))
            .unwrap_err()
            .code(),
        ResultCode::VolumeAlreadyExists
    );

    // idempotent re-create leaves the gauge alone
    om.create_bucket(&ctx, &BucketArgs::new("v", "plain")).unwrap();
    assert_eq!(om.metrics().gauge(Gauge::NumBuckets), 3);
    assert_eq!(
        om.create_bucket(&ctx, &BucketArgs::new("v", "plain").with_trash(true))
            .unwrap_err()
            .code(),
        ResultCode::BucketAlreadyExists
    );
}

#[test]
fn test_cancelled_request_writes_nothing() {
    let cluster = Cluster::new();
    let om = cluster.open();
    let token = CancellationToken::new();
    token.cancel();
    let ctx = RequestContext::new().with_cancel(token);

    let err = om
        .create_volume(&ctx, &VolumeArgs::new("v", "alice"))
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::Cancelled);
    assert_eq!(om.metrics().gauge(Gauge::NumVolumes), 0);
    assert_eq!(om.metrics().failures(OmOperation::CreateVolume), 1);
    assert_eq!(
        om.get_volume_info(&RequestContext::new(), "v")
            .unwrap_err()
            .code(),
        ResultCode::VolumeNotFound
    );
}

#[test]
fn test_quota_across_buckets() {
    let cluster = Cluster::new();
    let om = cluster.open();
    let ctx = RequestContext::new();
    om.create_volume(&ctx, &VolumeArgs::new("v", "alice").with_quota(1000))
        .unwrap();
    for bucket in ["a", "b", "c", "d"] {
        om.create_bucket(&ctx, &BucketArgs::new("v", bucket)).unwrap();
    }

    let om = Arc::new(om);
    let writers: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|bucket| {
            let om = Arc::clone(&om);
            thread::spawn(move || {
                (0..5)
                    .filter(|i| put_key(&om, bucket, &format!("k{i}"), 60).is_ok())
                    .count()
            })
        })
        .collect();
    let committed: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();

    // 20 writes of 60 bytes, only 16 fit
    assert_eq!(committed, 16);
    let used = om.get_volume_info(&ctx, "v").unwrap().bytes_used;
    assert_eq!(used, 960);
    let rows: u64 = ["a", "b", "c", "d"]
        .iter()
        .map(|b| cluster.store().count_rows(&key_prefix("v", b), 10).unwrap())
        .sum();
    assert_eq!(rows, 16);
    assert_eq!(counter(&om, "NumKeyCommitFails"), 4);
}

#[test]
fn test_unclean_stop_rescans() {
    let cluster = Cluster::new();
    let om = cluster.open();
    namespace(&om);
    put_key(&om, "plain", "a", 1).unwrap();
    // simulate a crash: skip the graceful shutdown
    std::mem::forget(om);

    let om = cluster.open();
    assert_eq!(om.recovery_report().gauges, GaugeSource::Rescan);
    assert_eq!(om.metrics().gauge(Gauge::NumVolumes), 1);
    assert_eq!(om.metrics().gauge(Gauge::NumBuckets), 3);
    assert_eq!(om.metrics().gauge(Gauge::NumKeys), 1);
}

#[test]
fn test_oversized_open_key_fails_fast() {
    let cluster = Cluster::new();
    let om = Arc::new(cluster.open());
    namespace(&om);

    let (tx, rx) = std::sync::mpsc::channel();
    let client = Arc::clone(&om);
    thread::spawn(move || {
        let ctx = RequestContext::new();
        for size in [u64::MAX, 1 << 40] {
            let args = KeyArgs::new("v", "plain", "huge").with_size(size);
            let code = client.open_key(&ctx, &args).map_err(|e| e.code());
            tx.send(code.map(|_| ())).unwrap();
        }
    });

    let wait = std::time::Duration::from_secs(5);
    // beyond block.max_request_bytes
    assert_eq!(rx.recv_timeout(wait).unwrap(), Err(ResultCode::InvalidArgument));
    // within the byte cap but past the allocator's per-request block limit
    assert_eq!(
        rx.recv_timeout(wait).unwrap(),
        Err(ResultCode::BlockAllocationFailure)
    );
    assert_eq!(cluster.allocator.live_blocks(), 0);

    // the allocator is still serving
    put_key(&om, "plain", "small", 10).unwrap();
    assert_eq!(counter(&om, "NumKeyAllocateFails"), 2);
}
