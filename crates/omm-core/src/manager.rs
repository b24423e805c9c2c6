//! The `OzoneManager` facade.
//!
//! Every client operation enters here. The facade counts the attempt,
//! validates names, takes the operation's lock set, checks access,
//! dispatches to the owning manager and moves the gauges on success. A
//! failure counts once against the operation and fatal kinds mark the
//! request's resource as degraded.

use crate::acl::{AccessChecker, AccessTarget};
use crate::background::BackgroundWorker;
use crate::block::BlockAllocator;
use crate::bucket::{BucketManager, BucketOps};
use crate::context::RequestContext;
use crate::health::DegradedRanges;
use crate::key::{KeyManager, KeyOps};
use crate::lock::{LockManager, LockRequest, LockScope};
use crate::metrics::{Gauge, MetricsRegistry, OmOperation};
use crate::recovery::{RecoveryReport, RestartRecovery};
use crate::release::ReleaseQueue;
use crate::trash::{SweepReport, TrashOps, TrashService, TrashSettings};
use crate::volume::{VolumeManager, VolumeOps, VolumeUsage};
use omm_common::{
    BlockLocation, BucketArgs, BucketInfo, BucketUpdate, CompletedPart, KeyArgs, KeyInfo,
    ListArgs, MultipartUploadInfo, NameKind, OmConfig, OmError, OmResult, OpenKeySession,
    PartInfo, RowChange, TrashEntry, VolumeArgs, VolumeInfo, VolumeProperty,
    current_time_millis, validate_fragment, validate_name,
};
use omm_store::{KvStore, OmStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

const AUDIT_TARGET: &str = "omm::audit";

/// Everything the facade needs to know about one call before dispatch
struct Call<'a> {
    op: OmOperation,
    /// `vol`, `vol/buk` or `vol/buk/key`; audit subject and degraded range
    resource: String,
    names: Vec<(NameKind, &'a str)>,
    fragments: Vec<(NameKind, &'a str)>,
    locks: Vec<LockRequest>,
    access: Vec<AccessTarget<'a>>,
    gauge: Option<Gauge>,
}

impl<'a> Call<'a> {
    fn new(op: OmOperation, resource: impl Into<String>) -> Self {
        Self {
            op,
            resource: resource.into(),
            names: Vec::new(),
            fragments: Vec::new(),
            locks: Vec::new(),
            access: Vec::new(),
            gauge: None,
        }
    }

    fn name(mut self, kind: NameKind, name: &'a str) -> Self {
        self.names.push((kind, name));
        self
    }

    fn listing(mut self, args: &'a ListArgs) -> Self {
        self.fragments.push((NameKind::Prefix, &args.prefix));
        if let Some(start_after) = &args.start_after {
            self.fragments.push((NameKind::StartAfter, start_after));
        }
        self
    }

    fn lock(mut self, request: LockRequest) -> Self {
        self.locks.push(request);
        self
    }

    fn access(mut self, target: AccessTarget<'a>) -> Self {
        self.access.push(target);
        self
    }

    fn gauge(mut self, gauge: Gauge) -> Self {
        self.gauge = Some(gauge);
        self
    }

    fn volume(op: OmOperation, volume: &'a str) -> Self {
        Self::new(op, volume).name(NameKind::Volume, volume)
    }

    fn bucket(op: OmOperation, volume: &'a str, bucket: &'a str) -> Self {
        Self::new(op, format!("{volume}/{bucket}"))
            .name(NameKind::Volume, volume)
            .name(NameKind::Bucket, bucket)
    }

    /// A key call; writers hold the key exclusively, readers share it
    fn key(op: OmOperation, args: &'a KeyArgs, exclusive: bool) -> Self {
        let scope = LockScope::key(&args.volume, &args.bucket, &args.key);
        Self::new(op, args.path())
            .name(NameKind::Volume, &args.volume)
            .name(NameKind::Bucket, &args.bucket)
            .name(NameKind::Key, &args.key)
            .lock(LockRequest::shared(LockScope::volume(&args.volume)))
            .lock(LockRequest::shared(LockScope::bucket(&args.volume, &args.bucket)))
            .lock(if exclusive {
                LockRequest::exclusive(scope)
            } else {
                LockRequest::shared(scope)
            })
            .access(AccessTarget::Bucket(&args.volume, &args.bucket))
    }
}

/// Gauge movement for a create-or-replace outcome
fn inserted(change: RowChange) -> i64 {
    i64::from(change == RowChange::Inserted)
}

/// Assembles an [`OzoneManager`]; any manager may be swapped for a double
pub struct OzoneManagerBuilder {
    config: OmConfig,
    kv: Arc<dyn KvStore>,
    allocator: Arc<dyn BlockAllocator>,
    volumes: Option<Arc<dyn VolumeOps>>,
    buckets: Option<Arc<dyn BucketOps>>,
    keys: Option<Arc<dyn KeyOps>>,
    trash: Option<Arc<dyn TrashOps>>,
}

impl OzoneManagerBuilder {
    pub fn new(config: OmConfig, kv: Arc<dyn KvStore>, allocator: Arc<dyn BlockAllocator>) -> Self {
        Self {
            config,
            kv,
            allocator,
            volumes: None,
            buckets: None,
            keys: None,
            trash: None,
        }
    }

    #[must_use]
    pub fn with_volume_ops(mut self, ops: Arc<dyn VolumeOps>) -> Self {
        self.volumes = Some(ops);
        self
    }

    #[must_use]
    pub fn with_bucket_ops(mut self, ops: Arc<dyn BucketOps>) -> Self {
        self.buckets = Some(ops);
        self
    }

    #[must_use]
    pub fn with_key_ops(mut self, ops: Arc<dyn KeyOps>) -> Self {
        self.keys = Some(ops);
        self
    }

    #[must_use]
    pub fn with_trash_ops(mut self, ops: Arc<dyn TrashOps>) -> Self {
        self.trash = Some(ops);
        self
    }

    /// Run startup recovery and return a manager ready to serve
    pub fn open(self) -> OmResult<OzoneManager> {
        self.config
            .validate()
            .map_err(|e| OmError::invalid_argument(e.to_string()))?;
        let config = self.config;
        let store = OmStore::new(self.kv);
        let metrics = Arc::new(MetricsRegistry::new());
        let locks = Arc::new(LockManager::new());
        let releases = Arc::new(ReleaseQueue::new(
            store.clone(),
            Arc::clone(&self.allocator),
            Arc::clone(&metrics),
        ));
        let usage = Arc::new(VolumeUsage::new(store.clone()));
        let degraded = Arc::new(DegradedRanges::new());
        let sweeper = Arc::new(
            TrashService::new(
                store.clone(),
                Arc::clone(&locks),
                Arc::clone(&releases),
                Arc::clone(&usage),
                Arc::clone(&metrics),
                TrashSettings::from_config(&config),
            )
            .with_degraded(Arc::clone(&degraded)),
        );

        let recovery = RestartRecovery::new(
            &store,
            &metrics,
            &sweeper,
            &releases,
            config.trash.sweep_batch_size,
        )
        .run(current_time_millis())?;

        let volumes: Arc<dyn VolumeOps> = self
            .volumes
            .unwrap_or_else(|| Arc::new(VolumeManager::new(store.clone())));
        let buckets: Arc<dyn BucketOps> = self.buckets.unwrap_or_else(|| {
            Arc::new(BucketManager::new(store.clone(), Arc::clone(&releases)))
        });
        let keys: Arc<dyn KeyOps> = self.keys.unwrap_or_else(|| {
            Arc::new(KeyManager::new(
                store.clone(),
                Arc::clone(&self.allocator),
                Arc::clone(&releases),
                Arc::clone(&usage),
            )
            .with_max_request_bytes(config.block.max_request_bytes))
        });
        let trash = self
            .trash
            .unwrap_or_else(|| Arc::clone(&sweeper) as Arc<dyn TrashOps>);

        info!(
            "Metadata manager '{}' open (gauges from {:?})",
            config.node.name, recovery.gauges
        );
        Ok(OzoneManager {
            access: AccessChecker::new(store.clone(), &config.security),
            config,
            store,
            locks,
            metrics,
            volumes,
            buckets,
            keys,
            trash,
            sweeper,
            recovery,
            degraded,
            workers: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }
}

/// Single entry point for every namespace operation
pub struct OzoneManager {
    config: OmConfig,
    store: OmStore,
    locks: Arc<LockManager>,
    metrics: Arc<MetricsRegistry>,
    access: AccessChecker,
    volumes: Arc<dyn VolumeOps>,
    buckets: Arc<dyn BucketOps>,
    keys: Arc<dyn KeyOps>,
    trash: Arc<dyn TrashOps>,
    sweeper: Arc<TrashService>,
    recovery: RecoveryReport,
    degraded: Arc<DegradedRanges>,
    workers: Mutex<Vec<BackgroundWorker>>,
    stopped: AtomicBool,
}

impl OzoneManager {
    pub fn builder(
        config: OmConfig,
        kv: Arc<dyn KvStore>,
        allocator: Arc<dyn BlockAllocator>,
    ) -> OzoneManagerBuilder {
        OzoneManagerBuilder::new(config, kv, allocator)
    }

    /// Open with the store-backed managers
    pub fn open(
        config: OmConfig,
        kv: Arc<dyn KvStore>,
        allocator: Arc<dyn BlockAllocator>,
    ) -> OmResult<Self> {
        Self::builder(config, kv, allocator).open()
    }

    #[must_use]
    pub const fn config(&self) -> &OmConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// What startup recovery did
    #[must_use]
    pub const fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Resources that hit a corruption or internal fault, sorted
    #[must_use]
    pub fn degraded_ranges(&self) -> Vec<String> {
        self.degraded.list()
    }

    fn run<T>(
        &self,
        ctx: &RequestContext,
        call: Call<'_>,
        dispatch: impl FnOnce() -> OmResult<(T, i64)>,
    ) -> OmResult<T> {
        let op = call.op;
        self.metrics.record_attempt(op);
        let result = self.execute(ctx, &call, dispatch);

        match &result {
            Ok(_) if op.is_write() => info!(
                target: AUDIT_TARGET,
                op = op.as_str(),
                resource = %call.resource,
                user = ctx.user_name(),
                result = "SUCCESS"
            ),
            Ok(_) => debug!(
                target: AUDIT_TARGET,
                op = op.as_str(),
                resource = %call.resource,
                user = ctx.user_name(),
                result = "SUCCESS"
            ),
            Err(e) => {
                self.metrics.record_failure(op);
                if e.is_fatal() {
                    error!("{} on '{}' failed: {}", op.as_str(), call.resource, e);
                    self.degraded.mark(call.resource.clone());
                }
                info!(
                    target: AUDIT_TARGET,
                    op = op.as_str(),
                    resource = %call.resource,
                    user = ctx.user_name(),
                    result = %e.code()
                );
            }
        }
        result
    }

    fn execute<T>(
        &self,
        ctx: &RequestContext,
        call: &Call<'_>,
        dispatch: impl FnOnce() -> OmResult<(T, i64)>,
    ) -> OmResult<T> {
        for (kind, name) in &call.names {
            validate_name(*kind, name)?;
        }
        for (kind, fragment) in &call.fragments {
            validate_fragment(*kind, fragment)?;
        }

        let _held = self.locks.acquire(
            call.locks.clone(),
            ctx.lock_deadline(self.config.om.lock_timeout()),
        )?;
        self.access.check(ctx, call.op, &call.access)?;

        let (value, delta) = dispatch()?;
        if delta != 0
            && let Some(gauge) = call.gauge
        {
            self.metrics.adjust(gauge, delta);
        }
        Ok(value)
    }

    /// Paging arguments with the limit clamped to `om.max_list_limit`
    fn clamp(&self, args: &ListArgs) -> ListArgs {
        ListArgs {
            limit: args.limit.min(self.config.om.max_list_limit),
            ..args.clone()
        }
    }

    // ---- Volumes ----

    pub fn create_volume(&self, ctx: &RequestContext, args: &VolumeArgs) -> OmResult<()> {
        let call = Call::volume(OmOperation::CreateVolume, &args.name)
            .lock(LockRequest::exclusive(LockScope::volume(&args.name)))
            .access(AccessTarget::Cluster)
            .gauge(Gauge::NumVolumes);
        self.run(ctx, call, || {
            let change = self.volumes.create_volume(ctx, args)?;
            Ok(((), inserted(change)))
        })
    }

    pub fn delete_volume(&self, ctx: &RequestContext, volume: &str) -> OmResult<()> {
        let call = Call::volume(OmOperation::DeleteVolume, volume)
            .lock(LockRequest::exclusive(LockScope::volume(volume)))
            .access(AccessTarget::Volume(volume))
            .gauge(Gauge::NumVolumes);
        self.run(ctx, call, || {
            self.volumes.delete_volume(ctx, volume)?;
            Ok(((), -1))
        })
    }

    pub fn get_volume_info(&self, ctx: &RequestContext, volume: &str) -> OmResult<VolumeInfo> {
        let call = Call::volume(OmOperation::GetVolumeInfo, volume)
            .lock(LockRequest::shared(LockScope::volume(volume)))
            .access(AccessTarget::Volume(volume));
        self.run(ctx, call, || Ok((self.volumes.get_volume_info(ctx, volume)?, 0)))
    }

    pub fn set_volume_property(
        &self,
        ctx: &RequestContext,
        volume: &str,
        property: &VolumeProperty,
    ) -> OmResult<VolumeInfo> {
        let call = Call::volume(OmOperation::SetVolumeProperty, volume)
            .lock(LockRequest::exclusive(LockScope::volume(volume)))
            .access(AccessTarget::Volume(volume));
        self.run(ctx, call, || {
            Ok((self.volumes.set_volume_property(ctx, volume, property)?, 0))
        })
    }

    pub fn list_volumes(&self, ctx: &RequestContext, args: &ListArgs) -> OmResult<Vec<VolumeInfo>> {
        let call = Call::new(OmOperation::ListVolumes, "/")
            .listing(args)
            .access(AccessTarget::Cluster);
        let args = self.clamp(args);
        self.run(ctx, call, || Ok((self.volumes.list_volumes(ctx, &args)?, 0)))
    }

    // ---- Buckets ----

    fn bucket_write<'a>(op: OmOperation, volume: &'a str, bucket: &'a str) -> Call<'a> {
        Call::bucket(op, volume, bucket)
            .lock(LockRequest::shared(LockScope::volume(volume)))
            .lock(LockRequest::exclusive(LockScope::bucket(volume, bucket)))
    }

    pub fn create_bucket(&self, ctx: &RequestContext, args: &BucketArgs) -> OmResult<()> {
        let call = Self::bucket_write(OmOperation::CreateBucket, &args.volume, &args.name)
            .access(AccessTarget::Volume(&args.volume))
            .gauge(Gauge::NumBuckets);
        self.run(ctx, call, || {
            let change = self.buckets.create_bucket(ctx, args)?;
            Ok(((), inserted(change)))
        })
    }

    pub fn delete_bucket(&self, ctx: &RequestContext, volume: &str, bucket: &str) -> OmResult<()> {
        let call = Self::bucket_write(OmOperation::DeleteBucket, volume, bucket)
            .access(AccessTarget::Bucket(volume, bucket))
            .gauge(Gauge::NumBuckets);
        self.run(ctx, call, || {
            self.buckets.delete_bucket(ctx, volume, bucket)?;
            Ok(((), -1))
        })
    }

    pub fn get_bucket_info(
        &self,
        ctx: &RequestContext,
        volume: &str,
        bucket: &str,
    ) -> OmResult<BucketInfo> {
        let call = Call::bucket(OmOperation::GetBucketInfo, volume, bucket)
            .lock(LockRequest::shared(LockScope::volume(volume)))
            .lock(LockRequest::shared(LockScope::bucket(volume, bucket)))
            .access(AccessTarget::Bucket(volume, bucket));
        self.run(ctx, call, || {
            Ok((self.buckets.get_bucket_info(ctx, volume, bucket)?, 0))
        })
    }

    pub fn set_bucket_property(
        &self,
        ctx: &RequestContext,
        update: &BucketUpdate,
    ) -> OmResult<BucketInfo> {
        let call = Self::bucket_write(OmOperation::SetBucketProperty, &update.volume, &update.name)
            .access(AccessTarget::Bucket(&update.volume, &update.name));
        self.run(ctx, call, || {
            Ok((self.buckets.set_bucket_property(ctx, update)?, 0))
        })
    }

    pub fn list_buckets(
        &self,
        ctx: &RequestContext,
        volume: &str,
        args: &ListArgs,
    ) -> OmResult<Vec<BucketInfo>> {
        let call = Call::volume(OmOperation::ListBuckets, volume)
            .listing(args)
            .lock(LockRequest::shared(LockScope::volume(volume)))
            .access(AccessTarget::Volume(volume));
        let args = self.clamp(args);
        self.run(ctx, call, || {
            Ok((self.buckets.list_buckets(ctx, volume, &args)?, 0))
        })
    }

    // ---- Keys ----

    pub fn open_key(&self, ctx: &RequestContext, args: &KeyArgs) -> OmResult<OpenKeySession> {
        let call = Call::key(OmOperation::OpenKey, args, true);
        self.run(ctx, call, || Ok((self.keys.open_key(ctx, args)?, 0)))
    }

    pub fn allocate_block(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        client_id: u64,
    ) -> OmResult<BlockLocation> {
        let call = Call::key(OmOperation::AllocateBlock, args, true);
        self.run(ctx, call, || {
            Ok((self.keys.allocate_block(ctx, args, client_id)?, 0))
        })
    }

    pub fn commit_key(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        client_id: u64,
        final_size: u64,
    ) -> OmResult<()> {
        let call = Call::key(OmOperation::CommitKey, args, true).gauge(Gauge::NumKeys);
        self.run(ctx, call, || {
            let change = self.keys.commit_key(ctx, args, client_id, final_size)?;
            Ok(((), inserted(change)))
        })
    }

    pub fn abort_key(&self, ctx: &RequestContext, args: &KeyArgs, client_id: u64) -> OmResult<()> {
        let call = Call::key(OmOperation::AbortKey, args, true);
        self.run(ctx, call, || Ok((self.keys.abort_key(ctx, args, client_id)?, 0)))
    }

    pub fn lookup_key(&self, ctx: &RequestContext, args: &KeyArgs) -> OmResult<KeyInfo> {
        let call = Call::key(OmOperation::LookupKey, args, false);
        self.run(ctx, call, || Ok((self.keys.lookup_key(ctx, args)?, 0)))
    }

    pub fn delete_key(&self, ctx: &RequestContext, args: &KeyArgs) -> OmResult<()> {
        let call = Call::key(OmOperation::DeleteKey, args, true).gauge(Gauge::NumKeys);
        self.run(ctx, call, || {
            self.keys.delete_key(ctx, args)?;
            Ok(((), -1))
        })
    }

    pub fn list_keys(
        &self,
        ctx: &RequestContext,
        volume: &str,
        bucket: &str,
        args: &ListArgs,
    ) -> OmResult<Vec<KeyInfo>> {
        let call = Call::bucket(OmOperation::ListKeys, volume, bucket)
            .listing(args)
            .lock(LockRequest::shared(LockScope::bucket(volume, bucket)))
            .access(AccessTarget::Bucket(volume, bucket));
        let args = self.clamp(args);
        self.run(ctx, call, || {
            Ok((self.keys.list_keys(ctx, volume, bucket, &args)?, 0))
        })
    }

    pub fn list_trash(
        &self,
        ctx: &RequestContext,
        volume: &str,
        bucket: &str,
        args: &ListArgs,
    ) -> OmResult<Vec<TrashEntry>> {
        let call = Call::bucket(OmOperation::ListTrash, volume, bucket)
            .listing(args)
            .lock(LockRequest::shared(LockScope::bucket(volume, bucket)))
            .access(AccessTarget::Bucket(volume, bucket));
        let args = self.clamp(args);
        self.run(ctx, call, || {
            Ok((self.keys.list_trash(ctx, volume, bucket, &args)?, 0))
        })
    }

    /// Restore the newest trashed copy of a key into `dest_bucket`.
    ///
    /// One call, one result code: a missing destination surfaces as
    /// `BUCKET_NOT_FOUND` from this call.
    pub fn recover_trash(
        &self,
        ctx: &RequestContext,
        volume: &str,
        bucket: &str,
        key: &str,
        dest_bucket: &str,
    ) -> OmResult<KeyInfo> {
        let call = Call::new(
            OmOperation::RecoverTrash,
            format!("{volume}/{bucket}/{key}"),
        )
        .name(NameKind::Volume, volume)
        .name(NameKind::Bucket, bucket)
        .name(NameKind::Key, key)
        .name(NameKind::Bucket, dest_bucket)
        .lock(LockRequest::shared(LockScope::volume(volume)))
        .lock(LockRequest::shared(LockScope::bucket(volume, bucket)))
        .lock(LockRequest::shared(LockScope::bucket(volume, dest_bucket)))
        .lock(LockRequest::exclusive(LockScope::key(volume, bucket, key)))
        .lock(LockRequest::exclusive(LockScope::key(volume, dest_bucket, key)))
        .access(AccessTarget::Bucket(volume, bucket))
        .access(AccessTarget::Bucket(volume, dest_bucket))
        .gauge(Gauge::NumKeys);
        self.run(ctx, call, || {
            let info = self
                .trash
                .recover_trash(ctx, volume, bucket, key, dest_bucket)?;
            Ok((info, 1))
        })
    }

    // ---- Multipart ----

    pub fn initiate_multipart_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
    ) -> OmResult<MultipartUploadInfo> {
        let call = Call::key(OmOperation::InitiateMultipartUpload, args, true);
        self.run(ctx, call, || {
            Ok((self.keys.initiate_multipart_upload(ctx, args)?, 0))
        })
    }

    pub fn commit_multipart_part(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
        part_number: u32,
    ) -> OmResult<PartInfo> {
        let call = Call::key(OmOperation::CommitMultipartUploadPart, args, true);
        self.run(ctx, call, || {
            let part = self
                .keys
                .commit_multipart_part(ctx, args, upload_id, part_number)?;
            Ok((part, 0))
        })
    }

    pub fn complete_multipart_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> OmResult<()> {
        let call =
            Call::key(OmOperation::CompleteMultipartUpload, args, true).gauge(Gauge::NumKeys);
        self.run(ctx, call, || {
            let change = self
                .keys
                .complete_multipart_upload(ctx, args, upload_id, parts)?;
            Ok(((), inserted(change)))
        })
    }

    pub fn abort_multipart_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
    ) -> OmResult<()> {
        let call = Call::key(OmOperation::AbortMultipartUpload, args, true);
        self.run(ctx, call, || {
            Ok((self.keys.abort_multipart_upload(ctx, args, upload_id)?, 0))
        })
    }

    pub fn list_multipart_parts(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
    ) -> OmResult<Vec<PartInfo>> {
        let call = Call::key(OmOperation::ListMultipartUploadParts, args, false);
        self.run(ctx, call, || {
            Ok((self.keys.list_multipart_parts(ctx, args, upload_id)?, 0))
        })
    }

    // ---- Background work ----

    /// Run one trash sweep now
    pub fn sweep_now(&self) -> OmResult<SweepReport> {
        self.sweeper.sweep(current_time_millis())
    }

    /// Start the gauge saver and the trash sweep; a second call is a no-op
    pub fn start_background(&self) -> OmResult<()> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }

        let metrics = Arc::clone(&self.metrics);
        let store = self.store.clone();
        workers.push(BackgroundWorker::spawn(
            "gauge-saver",
            self.config.metrics.save_interval(),
            move || {
                metrics.persist_gauges(&store, false);
            },
        )?);

        let sweeper = Arc::clone(&self.sweeper);
        workers.push(BackgroundWorker::spawn(
            "trash-sweep",
            self.config.trash.sweep_interval(),
            move || match sweeper.sweep(current_time_millis()) {
                Ok(report) => debug!("Sweep finished: {:?}", report),
                Err(e) => warn!("Trash sweep failed: {}", e),
            },
        )?);
        Ok(())
    }

    /// Stop background work and record a clean gauge snapshot
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in &workers {
            worker.shutdown();
        }
        if self.metrics.persist_gauges(&self.store, true) {
            info!("Metadata manager '{}' stopped cleanly", self.config.node.name);
        }
    }
}

impl Drop for OzoneManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
