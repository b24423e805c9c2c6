//! Bucket management
//!
//! Buckets live under an existing volume and carry the versioning and
//! trash policy applied to their keys.

use crate::context::RequestContext;
use crate::release::ReleaseQueue;
use crate::volume::load_volume;
use omm_common::{
    Acl, BlockLocation, BucketArgs, BucketInfo, BucketUpdate, ListArgs, OmError, OmResult, RowChange,
    current_time_millis,
};
use omm_store::keys::{
    bucket_key, bucket_prefix, key_prefix, multipart_bucket_prefix, trash_bucket_prefix,
};
use omm_store::rows::{
    AclRow, BucketRow, KeyRow, MultipartRow, StorageTypeCode, TrashRow, to_acl_rows, to_acls,
};
use omm_store::{OmStore, Row, RowBatch, encode_row};
use std::sync::Arc;
use tracing::info;

/// Rows removed per batch when a deleted bucket's leftovers are purged
const PURGE_PAGE: usize = 128;

/// Bucket operations dispatched by the facade
pub trait BucketOps: Send + Sync {
    fn create_bucket(&self, ctx: &RequestContext, args: &BucketArgs) -> OmResult<RowChange>;

    fn delete_bucket(&self, ctx: &RequestContext, volume: &str, bucket: &str) -> OmResult<()>;

    fn get_bucket_info(
        &self,
        ctx: &RequestContext,
        volume: &str,
        bucket: &str,
    ) -> OmResult<BucketInfo>;

    fn set_bucket_property(
        &self,
        ctx: &RequestContext,
        update: &BucketUpdate,
    ) -> OmResult<BucketInfo>;

    fn list_buckets(
        &self,
        ctx: &RequestContext,
        volume: &str,
        args: &ListArgs,
    ) -> OmResult<Vec<BucketInfo>>;
}

/// Read a bucket row or fail with `BUCKET_NOT_FOUND`
pub(crate) fn load_bucket(store: &OmStore, volume: &str, bucket: &str) -> OmResult<BucketRow> {
    store
        .get_row::<BucketRow>(&bucket_key(volume, bucket))?
        .ok_or_else(|| OmError::bucket_not_found(volume, bucket))
}

fn bucket_row(args: &BucketArgs, created_at: u64) -> BucketRow {
    BucketRow {
        volume: args.volume.clone(),
        name: args.name.clone(),
        versioning: args.versioning,
        storage_type: StorageTypeCode::from(args.storage_type) as i32,
        trash_enabled: args.trash_enabled,
        acls: to_acl_rows(&args.acls),
        metadata: args.metadata.clone(),
        created_at,
    }
}

/// Merge `add` into `acls`, unioning rights for an existing grantee
fn add_acl(acls: &mut Vec<AclRow>, add: &Acl) {
    let row = AclRow::from(add);
    match acls
        .iter_mut()
        .find(|a| a.identity == row.identity && a.name == row.name)
    {
        Some(existing) => existing.rights |= row.rights,
        None => acls.push(row),
    }
}

/// Store-backed bucket manager
pub struct BucketManager {
    store: OmStore,
    releases: Arc<ReleaseQueue>,
}

impl BucketManager {
    pub fn new(store: OmStore, releases: Arc<ReleaseQueue>) -> Self {
        Self { store, releases }
    }

    /// Remove the trash rows and unfinished uploads left in a bucket that
    /// holds no keys, releasing their blocks. Each page commits on its own
    /// and the bucket row goes last, so a stop part way leaves a bucket
    /// with fewer leftovers rather than orphaned rows.
    fn purge_leftovers(&self, ctx: &RequestContext, volume: &str, bucket: &str) -> OmResult<u64> {
        let trash = self.purge_rows::<TrashRow>(ctx, &trash_bucket_prefix(volume, bucket), |row| {
            row.key
                .as_ref()
                .map(KeyRow::all_locations)
                .unwrap_or_default()
        })?;
        let uploads = self.purge_rows::<MultipartRow>(
            ctx,
            &multipart_bucket_prefix(volume, bucket),
            MultipartRow::all_locations,
        )?;
        Ok(trash + uploads)
    }

    fn purge_rows<R: Row>(
        &self,
        ctx: &RequestContext,
        prefix: &str,
        locations: impl Fn(&R) -> Vec<BlockLocation>,
    ) -> OmResult<u64> {
        self.store
            .for_each_page::<R, OmError>(prefix, PURGE_PAGE, |page| {
                let mut batch = RowBatch::new();
                let mut pending = Vec::new();
                for (row_key, row) in page {
                    pending.extend(self.releases.record(
                        &mut batch,
                        locations(&row),
                        "bucket deleted",
                    ));
                    batch.delete(row_key);
                }
                ctx.check_cancelled()?;
                self.store.commit(batch)?;
                self.releases.dispatch(pending);
                Ok(())
            })
    }
}

impl BucketOps for BucketManager {
    fn create_bucket(&self, ctx: &RequestContext, args: &BucketArgs) -> OmResult<RowChange> {
        load_volume(&self.store, &args.volume)?;
        let key = bucket_key(&args.volume, &args.name);

        if let Some(stored) = self.store.kv().get(&key)? {
            let existing = load_bucket(&self.store, &args.volume, &args.name)?;
            let requested = encode_row(&bucket_row(args, existing.created_at));
            if requested == stored {
                return Ok(RowChange::Unchanged);
            }
            return Err(OmError::BucketAlreadyExists {
                volume: args.volume.clone(),
                bucket: args.name.clone(),
            });
        }

        let mut batch = RowBatch::new();
        batch.put(key, &bucket_row(args, current_time_millis()));
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        info!(
            "Created bucket '{}/{}' (trash={}, versioning={})",
            args.volume, args.name, args.trash_enabled, args.versioning
        );
        Ok(RowChange::Inserted)
    }

    fn delete_bucket(&self, ctx: &RequestContext, volume: &str, bucket: &str) -> OmResult<()> {
        load_bucket(&self.store, volume, bucket)?;
        if self.store.has_children(&key_prefix(volume, bucket))? {
            return Err(OmError::BucketNotEmpty {
                volume: volume.to_string(),
                bucket: bucket.to_string(),
            });
        }
        let purged = self.purge_leftovers(ctx, volume, bucket)?;
        let mut batch = RowBatch::new();
        batch.delete(bucket_key(volume, bucket));
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        info!(
            "Deleted bucket '{}/{}' ({} trash rows and uploads purged)",
            volume, bucket, purged
        );
        Ok(())
    }

    fn get_bucket_info(
        &self,
        _ctx: &RequestContext,
        volume: &str,
        bucket: &str,
    ) -> OmResult<BucketInfo> {
        Ok(BucketInfo::from(&load_bucket(&self.store, volume, bucket)?))
    }

    fn set_bucket_property(
        &self,
        ctx: &RequestContext,
        update: &BucketUpdate,
    ) -> OmResult<BucketInfo> {
        let mut row = load_bucket(&self.store, &update.volume, &update.name)?;
        if let Some(versioning) = update.versioning {
            row.versioning = versioning;
        }
        if let Some(storage_type) = update.storage_type {
            row.storage_type = StorageTypeCode::from(storage_type) as i32;
        }
        if let Some(trash_enabled) = update.trash_enabled {
            row.trash_enabled = trash_enabled;
        }
        if !update.remove_acls.is_empty() {
            let mut acls = to_acls(&row.acls);
            acls.retain(|a| !update.remove_acls.contains(a));
            row.acls = to_acl_rows(&acls);
        }
        for acl in &update.add_acls {
            add_acl(&mut row.acls, acl);
        }

        let mut batch = RowBatch::new();
        batch.put(bucket_key(&update.volume, &update.name), &row);
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        Ok(BucketInfo::from(&row))
    }

    fn list_buckets(
        &self,
        _ctx: &RequestContext,
        volume: &str,
        args: &ListArgs,
    ) -> OmResult<Vec<BucketInfo>> {
        load_volume(&self.store, volume)?;
        let parent = bucket_prefix(volume);
        let prefix = format!("{parent}{}", args.prefix);
        let start_after = args
            .start_after
            .as_ref()
            .map(|name| format!("{parent}{name}"));
        Ok(self
            .store
            .scan_rows::<BucketRow>(&prefix, start_after.as_deref(), args.limit)?
            .iter()
            .map(|(_, row)| BucketInfo::from(row))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::LocalBlockAllocator;
    use crate::metrics::MetricsRegistry;
    use crate::volume::{VolumeManager, VolumeOps};
    use omm_common::{AclRights, ResultCode, StorageType, VolumeArgs};
    use omm_store::MemoryKvStore;
    use omm_store::keys::key_key;

    fn setup() -> (OmStore, BucketManager, RequestContext) {
        let store = OmStore::new(Arc::new(MemoryKvStore::new()));
        let ctx = RequestContext::new();
        VolumeManager::new(store.clone())
            .create_volume(&ctx, &VolumeArgs::new("v", "alice"))
            .unwrap();
        let releases = Arc::new(ReleaseQueue::new(
            store.clone(),
            Arc::new(LocalBlockAllocator::new(100)),
            Arc::new(MetricsRegistry::new()),
        ));
        (store.clone(), BucketManager::new(store, releases), ctx)
    }

    #[test]
    fn test_create_requires_volume() {
        let (_, buckets, ctx) = setup();
        let err = buckets
            .create_bucket(&ctx, &BucketArgs::new("missing", "b"))
            .unwrap_err();
        assert_eq!(err.code(), ResultCode::VolumeNotFound);
    }

    #[test]
    fn test_create_is_idempotent_for_identical_request() {
        let (_, buckets, ctx) = setup();
        let args = BucketArgs::new("v", "b").with_trash(true);
        assert_eq!(
            buckets.create_bucket(&ctx, &args).unwrap(),
            RowChange::Inserted
        );
        assert_eq!(
            buckets.create_bucket(&ctx, &args).unwrap(),
            RowChange::Unchanged
        );

        let different = BucketArgs::new("v", "b").with_trash(false);
        assert_eq!(
            buckets.create_bucket(&ctx, &different).unwrap_err().code(),
            ResultCode::BucketAlreadyExists
        );
    }

    #[test]
    fn test_delete_requires_empty_bucket() {
        let (store, buckets, ctx) = setup();
        buckets
            .create_bucket(&ctx, &BucketArgs::new("v", "b"))
            .unwrap();
        store
            .put_row(&key_key("v", "b", "k"), &KeyRow::default())
            .unwrap();
        assert_eq!(
            buckets.delete_bucket(&ctx, "v", "b").unwrap_err().code(),
            ResultCode::BucketNotEmpty
        );
        store.delete_row(&key_key("v", "b", "k")).unwrap();
        buckets.delete_bucket(&ctx, "v", "b").unwrap();
        assert_eq!(
            buckets.get_bucket_info(&ctx, "v", "b").unwrap_err().code(),
            ResultCode::BucketNotFound
        );
    }

    #[test]
    fn test_set_property_merges_acls() {
        let (_, buckets, ctx) = setup();
        buckets
            .create_bucket(&ctx, &BucketArgs::new("v", "b"))
            .unwrap();

        let mut update = BucketUpdate::new("v", "b");
        update.trash_enabled = Some(true);
        update.storage_type = Some(StorageType::Ssd);
        update.add_acls = vec![Acl::user("bob", AclRights::READ)];
        buckets.set_bucket_property(&ctx, &update).unwrap();

        let mut update = BucketUpdate::new("v", "b");
        update.add_acls = vec![Acl::user("bob", AclRights::WRITE)];
        let info = buckets.set_bucket_property(&ctx, &update).unwrap();

        assert!(info.trash_enabled);
        assert_eq!(info.storage_type, StorageType::Ssd);
        assert_eq!(info.acls.len(), 1);
        assert!(info.acls[0].rights.contains(AclRights::READ.union(AclRights::WRITE)));

        let mut update = BucketUpdate::new("v", "b");
        update.remove_acls = info.acls.clone();
        assert!(buckets.set_bucket_property(&ctx, &update).unwrap().acls.is_empty());
    }

    #[test]
    fn test_list_buckets_is_scoped_to_volume() {
        let (_, buckets, ctx) = setup();
        VolumeManager::new(buckets.store.clone())
            .create_volume(&ctx, &VolumeArgs::new("v2", "alice"))
            .unwrap();
        for (vol, name) in [("v", "b1"), ("v", "b2"), ("v2", "b3")] {
            buckets
                .create_bucket(&ctx, &BucketArgs::new(vol, name))
                .unwrap();
        }
        let names: Vec<_> = buckets
            .list_buckets(&ctx, "v", &ListArgs::new(10))
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, ["b1", "b2"]);
        assert_eq!(
            buckets
                .list_buckets(&ctx, "nope", &ListArgs::new(10))
                .unwrap_err()
                .code(),
            ResultCode::VolumeNotFound
        );
    }
}
