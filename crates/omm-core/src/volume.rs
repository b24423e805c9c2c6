//! Volume management
//!
//! Volumes are the top of the namespace and carry ownership and quota.

use crate::context::RequestContext;
use omm_common::{
    ListArgs, OmError, OmResult, RowChange, VolumeArgs, VolumeInfo, VolumeProperty,
    current_time_millis,
};
use omm_store::keys::{VOLUME_PREFIX, bucket_prefix, volume_key};
use omm_store::rows::{VolumeRow, to_acl_rows};
use omm_store::{OmStore, RowBatch};
use parking_lot::{Mutex, MutexGuard};
use tracing::info;

/// Volume operations dispatched by the facade
pub trait VolumeOps: Send + Sync {
    fn create_volume(&self, ctx: &RequestContext, args: &VolumeArgs) -> OmResult<RowChange>;

    fn delete_volume(&self, ctx: &RequestContext, volume: &str) -> OmResult<()>;

    fn get_volume_info(&self, ctx: &RequestContext, volume: &str) -> OmResult<VolumeInfo>;

    fn set_volume_property(
        &self,
        ctx: &RequestContext,
        volume: &str,
        property: &VolumeProperty,
    ) -> OmResult<VolumeInfo>;

    fn list_volumes(&self, ctx: &RequestContext, args: &ListArgs) -> OmResult<Vec<VolumeInfo>>;
}

/// Read a volume row or fail with `VOLUME_NOT_FOUND`
pub(crate) fn load_volume(store: &OmStore, volume: &str) -> OmResult<VolumeRow> {
    store
        .get_row::<VolumeRow>(&volume_key(volume))?
        .ok_or_else(|| OmError::VolumeNotFound(volume.to_string()))
}

/// Serializes read-modify-write of volume `bytes_used`.
///
/// Key commits on different buckets only share a volume lock, so usage
/// updates need their own mutual exclusion. Hold the guard from
/// [`VolumeUsage::charge`] until the batch carrying the new row commits.
pub struct VolumeUsage {
    store: OmStore,
    lock: Mutex<()>,
}

impl VolumeUsage {
    pub fn new(store: OmStore) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Volume row with `added` bytes charged and `freed` bytes returned.
    ///
    /// Growth past the quota fails with `QUOTA_EXCEEDED`; shrinking never
    /// fails. The caller must hold [`VolumeUsage::lock`].
    pub fn charge(&self, volume: &str, added: u64, freed: u64) -> OmResult<VolumeRow> {
        let mut row = load_volume(&self.store, volume)?;
        let used = row.bytes_used.saturating_sub(freed).saturating_add(added);
        if added > freed
            && let Some(quota) = row.quota_bytes
            && used > quota
        {
            return Err(OmError::QuotaExceeded {
                volume: volume.to_string(),
                quota,
                requested: used,
            });
        }
        row.bytes_used = used;
        Ok(row)
    }
}

/// Store-backed volume manager
pub struct VolumeManager {
    store: OmStore,
}

impl VolumeManager {
    pub fn new(store: OmStore) -> Self {
        Self { store }
    }
}

impl VolumeOps for VolumeManager {
    fn create_volume(&self, ctx: &RequestContext, args: &VolumeArgs) -> OmResult<RowChange> {
        let key = volume_key(&args.name);
        if self.store.exists(&key)? {
            return Err(OmError::VolumeAlreadyExists(args.name.clone()));
        }
        let now = current_time_millis();
        let row = VolumeRow {
            name: args.name.clone(),
            owner: args.owner.clone(),
            admin: args.admin.clone(),
            quota_bytes: args.quota_bytes,
            bytes_used: 0,
            acls: to_acl_rows(&args.acls),
            metadata: args.metadata.clone(),
            created_at: now,
            modified_at: now,
        };
        let mut batch = RowBatch::new();
        batch.put(key, &row);
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        info!("Created volume '{}' owned by '{}'", args.name, args.owner);
        Ok(RowChange::Inserted)
    }

    fn delete_volume(&self, ctx: &RequestContext, volume: &str) -> OmResult<()> {
        load_volume(&self.store, volume)?;
        if self.store.has_children(&bucket_prefix(volume))? {
            return Err(OmError::VolumeNotEmpty(volume.to_string()));
        }
        let mut batch = RowBatch::new();
        batch.delete(volume_key(volume));
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        info!("Deleted volume '{}'", volume);
        Ok(())
    }

    fn get_volume_info(&self, _ctx: &RequestContext, volume: &str) -> OmResult<VolumeInfo> {
        Ok(VolumeInfo::from(&load_volume(&self.store, volume)?))
    }

    fn set_volume_property(
        &self,
        ctx: &RequestContext,
        volume: &str,
        property: &VolumeProperty,
    ) -> OmResult<VolumeInfo> {
        let mut row = load_volume(&self.store, volume)?;
        match property {
            VolumeProperty::Owner(owner) => {
                if owner.is_empty() {
                    return Err(OmError::invalid_argument("volume owner must not be empty"));
                }
                row.owner.clone_from(owner);
            }
            VolumeProperty::QuotaBytes(quota) => {
                if let Some(quota) = *quota
                    && quota < row.bytes_used
                {
                    return Err(OmError::QuotaExceeded {
                        volume: volume.to_string(),
                        quota,
                        requested: row.bytes_used,
                    });
                }
                row.quota_bytes = *quota;
            }
            VolumeProperty::Acls(acls) => row.acls = to_acl_rows(acls),
        }
        row.modified_at = current_time_millis();
        let mut batch = RowBatch::new();
        batch.put(volume_key(volume), &row);
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        Ok(VolumeInfo::from(&row))
    }

    fn list_volumes(&self, _ctx: &RequestContext, args: &ListArgs) -> OmResult<Vec<VolumeInfo>> {
        let prefix = format!("{VOLUME_PREFIX}{}", args.prefix);
        let start_after = args
            .start_after
            .as_ref()
            .map(|name| format!("{VOLUME_PREFIX}{name}"));
        Ok(self
            .store
            .scan_rows::<VolumeRow>(&prefix, start_after.as_deref(), args.limit)?
            .iter()
            .map(|(_, row)| VolumeInfo::from(row))
            .collect())
    }
}
