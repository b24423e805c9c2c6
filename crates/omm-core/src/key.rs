//! Key management.
//!
//! A key is written in two phases. `open_key` allocates blocks and records
//! them in an OpenKey row that lookups never see; `commit_key` turns it into
//! the Key row in one batch that also removes the OpenKey row. Locations the
//! committed key no longer references go through the [`ReleaseQueue`] in the
//! same batch.

mod multipart;

pub use multipart::MAX_PART_NUMBER;

use crate::block::BlockAllocator;
use crate::bucket::load_bucket;
use crate::context::RequestContext;
use crate::release::ReleaseQueue;
use crate::volume::{VolumeUsage, load_volume};
use omm_common::{
    BlockLocation, CompletedPart, DEFAULT_MAX_REQUEST_BYTES, KeyArgs, KeyInfo, ListArgs, MultipartUploadInfo, OmError,
    OmResult, OpenKeySession, PartInfo, RowChange, TrashEntry, TrashedKey, current_time_millis,
    total_length,
};
use omm_store::keys::{
    bucket_key, key_key, key_prefix, open_key_key, parse_trash_key, trash_bucket_prefix,
    trash_group_end, trash_key, volume_key,
};
use omm_store::rows::{
    BucketRow, KeyRow, KeyVersionRow, OpenKeyRow, TrashRow, VolumeRow, to_location_rows,
    to_locations,
};
use omm_store::{OmStore, RowBatch};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Trash rows fetched per scan while grouping a listing
const TRASH_LIST_PAGE: usize = 256;

/// Key, open-key, trash-listing and multipart operations
pub trait KeyOps: Send + Sync {
    /// Allocate blocks for `args.data_size` bytes and record an OpenKey row
    fn open_key(&self, ctx: &RequestContext, args: &KeyArgs) -> OmResult<OpenKeySession>;

    /// Append one more block to an open key
    fn allocate_block(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        client_id: u64,
    ) -> OmResult<BlockLocation>;

    /// Make an open key visible with `final_size` bytes
    fn commit_key(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        client_id: u64,
        final_size: u64,
    ) -> OmResult<RowChange>;

    /// Drop an open key and release its blocks
    fn abort_key(&self, ctx: &RequestContext, args: &KeyArgs, client_id: u64) -> OmResult<()>;

    fn lookup_key(&self, ctx: &RequestContext, args: &KeyArgs) -> OmResult<KeyInfo>;

    /// Remove a key, moving it to trash when the bucket keeps deleted keys
    fn delete_key(&self, ctx: &RequestContext, args: &KeyArgs) -> OmResult<()>;

    fn list_keys(
        &self,
        ctx: &RequestContext,
        volume: &str,
        bucket: &str,
        args: &ListArgs,
    ) -> OmResult<Vec<KeyInfo>>;

    /// Trashed keys grouped by name; `limit` counts names.
    ///
    /// Entries come back in stored row order, where each name's rows sit
    /// under `<name>/`. A name that continues with `-` or `.` therefore
    /// sorts before the name itself (`a-b`, `a.c`, `a`, `ab`), unlike
    /// [`KeyOps::list_keys`]. `start_after` resumes in that same order.
    fn list_trash(
        &self,
        ctx: &RequestContext,
        volume: &str,
        bucket: &str,
        args: &ListArgs,
    ) -> OmResult<Vec<TrashEntry>>;

    fn initiate_multipart_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
    ) -> OmResult<MultipartUploadInfo>;

    /// Allocate and record part `part_number` of `args.data_size` bytes
    fn commit_multipart_part(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
        part_number: u32,
    ) -> OmResult<PartInfo>;

    fn complete_multipart_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> OmResult<RowChange>;

    fn abort_multipart_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
    ) -> OmResult<()>;

    fn list_multipart_parts(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
    ) -> OmResult<Vec<PartInfo>>;
}

/// Contents of a Key row about to be installed
struct KeyContent {
    data_size: u64,
    locations: Vec<BlockLocation>,
    metadata: BTreeMap<String, String>,
}

/// Keep the leading locations that cover `size` bytes, trimming the last
/// one; the rest are returned as unused.
fn split_to_size(
    opened: Vec<BlockLocation>,
    size: u64,
) -> (Vec<BlockLocation>, Vec<BlockLocation>) {
    let mut kept = Vec::new();
    let mut unused = Vec::new();
    let mut remaining = size;
    for mut location in opened {
        if remaining == 0 {
            unused.push(location);
            continue;
        }
        location.length = location.length.min(remaining);
        remaining -= location.length;
        kept.push(location);
    }
    (kept, unused)
}

/// Use the writer's location list, which must name opened blocks only
fn select_reported(
    opened: Vec<BlockLocation>,
    reported: &[BlockLocation],
) -> OmResult<(Vec<BlockLocation>, Vec<BlockLocation>)> {
    if let Some(stray) = reported
        .iter()
        .find(|r| !opened.iter().any(|o| o.block_id() == r.block_id()))
    {
        return Err(OmError::invalid_argument(format!(
            "block {stray} was not allocated to this key"
        )));
    }
    let unused = opened
        .into_iter()
        .filter(|o| !reported.iter().any(|r| r.block_id() == o.block_id()))
        .collect();
    Ok((reported.to_vec(), unused))
}

fn open_key_info(row: &OpenKeyRow) -> KeyInfo {
    KeyInfo {
        volume: row.volume.clone(),
        bucket: row.bucket.clone(),
        name: row.name.clone(),
        data_size: row.expected_size,
        locations: to_locations(&row.locations),
        metadata: row.metadata.clone(),
        created_at: row.opened_at,
        modified_at: row.opened_at,
        ..KeyInfo::default()
    }
}

/// Store-backed key manager
pub struct KeyManager {
    store: OmStore,
    allocator: Arc<dyn BlockAllocator>,
    releases: Arc<ReleaseQueue>,
    usage: Arc<VolumeUsage>,
    max_request_bytes: u64,
}

impl KeyManager {
    pub fn new(
        store: OmStore,
        allocator: Arc<dyn BlockAllocator>,
        releases: Arc<ReleaseQueue>,
        usage: Arc<VolumeUsage>,
    ) -> Self {
        Self {
            store,
            allocator,
            releases,
            usage,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }

    /// Cap on the bytes one open, commit or part may ask blocks for
    #[must_use]
    pub const fn with_max_request_bytes(mut self, bytes: u64) -> Self {
        self.max_request_bytes = bytes;
        self
    }

    /// Refuse a size no commit could ever accept, before any block is
    /// allocated. Remaining quota is still enforced at commit.
    fn check_request_size(&self, volume: &VolumeRow, bytes: u64) -> OmResult<()> {
        if bytes > self.max_request_bytes {
            return Err(OmError::invalid_argument(format!(
                "request of {bytes} bytes exceeds the {} byte limit",
                self.max_request_bytes
            )));
        }
        if let Some(quota) = volume.quota_bytes
            && bytes > quota
        {
            return Err(OmError::QuotaExceeded {
                volume: volume.name.clone(),
                quota,
                requested: bytes,
            });
        }
        Ok(())
    }

    fn load_key(&self, args: &KeyArgs) -> OmResult<KeyRow> {
        self.store
            .get_row::<KeyRow>(&key_key(&args.volume, &args.bucket, &args.key))?
            .ok_or_else(|| OmError::KeyNotFound(args.path()))
    }

    fn load_open(&self, args: &KeyArgs, client_id: u64) -> OmResult<(String, OpenKeyRow)> {
        let row_key = open_key_key(&args.volume, &args.bucket, &args.key, client_id);
        match self.store.get_row::<OpenKeyRow>(&row_key)? {
            Some(row) => Ok((row_key, row)),
            None => Err(OmError::KeyNotFound(format!(
                "{} (open session {client_id:016x})",
                args.path()
            ))),
        }
    }

    fn fresh_client_id(&self, args: &KeyArgs) -> OmResult<u64> {
        loop {
            let id = rand::random::<u64>();
            let row_key = open_key_key(&args.volume, &args.bucket, &args.key, id);
            if !self.store.exists(&row_key)? {
                return Ok(id);
            }
        }
    }

    /// Hand back blocks that never made it into a committed row
    fn release_uncommitted(&self, locations: &[BlockLocation]) {
        if locations.is_empty() {
            return;
        }
        if let Err(e) = self.allocator.release(locations) {
            warn!(
                "Failed to release {} uncommitted blocks: {}",
                locations.len(),
                e
            );
        }
    }

    /// Remove an OpenKey row and release everything it allocated
    fn abandon_open(
        &self,
        ctx: &RequestContext,
        row_key: &str,
        row: &OpenKeyRow,
        reason: &str,
    ) -> OmResult<()> {
        let mut batch = RowBatch::new();
        batch.delete(row_key);
        let pending = self
            .releases
            .record(&mut batch, to_locations(&row.locations), reason);
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        self.releases.dispatch(pending);
        debug!("Abandoned open key {} ({})", row_key, reason);
        Ok(())
    }

    /// Write `content` as the Key row `name` in `bucket`, together with
    /// whatever `batch` already holds.
    ///
    /// A replaced row keeps its `created_at` and bumps `version`. Its
    /// locations move into the version history when the bucket is
    /// versioned and are released otherwise. Volume usage is charged in the
    /// same batch.
    fn install_key(
        &self,
        ctx: &RequestContext,
        bucket: &BucketRow,
        name: &str,
        content: KeyContent,
        mut batch: RowBatch,
        mut orphans: Vec<BlockLocation>,
        reason: &str,
    ) -> OmResult<RowChange> {
        let row_key = key_key(&bucket.volume, &bucket.name, name);
        let existing = self.store.get_row::<KeyRow>(&row_key)?;
        let now = current_time_millis();
        let size = content.data_size;
        let mut row = KeyRow {
            volume: bucket.volume.clone(),
            bucket: bucket.name.clone(),
            name: name.to_string(),
            version: 0,
            data_size: size,
            locations: to_location_rows(&content.locations),
            metadata: content.metadata,
            created_at: now,
            modified_at: now,
            previous_versions: Vec::new(),
        };

        let mut freed = 0;
        let change = match existing {
            Some(old) => {
                freed = old.data_size;
                row.version = old.version + 1;
                row.created_at = old.created_at;
                row.previous_versions = old.previous_versions;
                if bucket.versioning {
                    row.previous_versions.push(KeyVersionRow {
                        version: old.version,
                        data_size: old.data_size,
                        locations: old.locations,
                    });
                } else {
                    orphans.extend(to_locations(&old.locations));
                }
                RowChange::Replaced
            }
            None => RowChange::Inserted,
        };

        let usage_guard = self.usage.lock();
        let volume = self.usage.charge(&bucket.volume, size, freed)?;
        batch.put(row_key, &row);
        batch.put(volume_key(&bucket.volume), &volume);
        let pending = self.releases.record(&mut batch, orphans, reason);
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        drop(usage_guard);

        self.releases.dispatch(pending);
        info!(
            "Committed key '{}/{}/{}' version {} ({} bytes)",
            bucket.volume, bucket.name, name, row.version, size
        );
        Ok(change)
    }

    /// First free trash row key for `name` at or after `deleted_at`
    fn free_trash_key(&self, args: &KeyArgs, mut deleted_at: u64) -> OmResult<(String, u64)> {
        loop {
            let row_key = trash_key(&args.volume, &args.bucket, &args.key, deleted_at);
            if !self.store.exists(&row_key)? {
                return Ok((row_key, deleted_at));
            }
            deleted_at += 1;
        }
    }
}

impl KeyOps for KeyManager {
    fn open_key(&self, ctx: &RequestContext, args: &KeyArgs) -> OmResult<OpenKeySession> {
        let volume = load_volume(&self.store, &args.volume)?;
        load_bucket(&self.store, &args.volume, &args.bucket)?;
        self.check_request_size(&volume, args.data_size)?;
        let locations = self.allocator.allocate(args.data_size)?;
        let client_id = self.fresh_client_id(args)?;
        let now = current_time_millis();
        let row = OpenKeyRow {
            volume: args.volume.clone(),
            bucket: args.bucket.clone(),
            name: args.key.clone(),
            client_id,
            locations: to_location_rows(&locations),
            expected_size: args.data_size,
            opened_at: now,
            metadata: args.metadata.clone(),
        };

        let mut batch = RowBatch::new();
        batch.put(
            open_key_key(&args.volume, &args.bucket, &args.key, client_id),
            &row,
        );
        let committed = ctx
            .check_cancelled()
            .and_then(|()| self.store.commit(batch).map_err(OmError::from));
        if let Err(e) = committed {
            self.release_uncommitted(&locations);
            return Err(e);
        }

        debug!(
            "Opened key '{}' for client {:016x} with {} blocks",
            args.path(),
            client_id,
            locations.len()
        );
        Ok(OpenKeySession {
            client_id,
            key_info: open_key_info(&row),
            opened_at: now,
        })
    }

    fn allocate_block(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        client_id: u64,
    ) -> OmResult<BlockLocation> {
        let (row_key, mut row) = self.load_open(args, client_id)?;
        let allocated = self.allocator.allocate(self.allocator.block_size())?;
        let Some(location) = allocated.first().copied() else {
            return Err(OmError::BlockAllocation(
                "allocator returned no blocks".to_string(),
            ));
        };
        row.locations.extend(to_location_rows(&allocated));

        let mut batch = RowBatch::new();
        batch.put(row_key, &row);
        let committed = ctx
            .check_cancelled()
            .and_then(|()| self.store.commit(batch).map_err(OmError::from));
        if let Err(e) = committed {
            self.release_uncommitted(&allocated);
            return Err(e);
        }
        Ok(location)
    }

    fn commit_key(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        client_id: u64,
        final_size: u64,
    ) -> OmResult<RowChange> {
        let (open_key, open) = self.load_open(args, client_id)?;
        let Some(bucket) = self
            .store
            .get_row::<BucketRow>(&bucket_key(&args.volume, &args.bucket))?
        else {
            self.abandon_open(ctx, &open_key, &open, "bucket deleted before commit")?;
            return Err(OmError::bucket_not_found(&args.volume, &args.bucket));
        };
        let volume = load_volume(&self.store, &args.volume)?;
        self.check_request_size(&volume, final_size)?;

        let opened = to_locations(&open.locations);
        let (mut committed, orphans) = if args.locations.is_empty() {
            split_to_size(opened, final_size)
        } else {
            select_reported(opened, &args.locations)?
        };
        let covered = total_length(&committed);
        let extension = if covered < final_size {
            self.allocator.allocate(final_size - covered)?
        } else {
            Vec::new()
        };
        committed.extend_from_slice(&extension);

        let metadata = if args.metadata.is_empty() {
            open.metadata
        } else {
            args.metadata.clone()
        };
        let mut batch = RowBatch::new();
        batch.delete(open_key);
        let result = self.install_key(
            ctx,
            &bucket,
            &args.key,
            KeyContent {
                data_size: final_size,
                locations: committed,
                metadata,
            },
            batch,
            orphans,
            "commit",
        );
        if result.is_err() {
            self.release_uncommitted(&extension);
        }
        result
    }

    fn abort_key(&self, ctx: &RequestContext, args: &KeyArgs, client_id: u64) -> OmResult<()> {
        let (row_key, row) = self.load_open(args, client_id)?;
        self.abandon_open(ctx, &row_key, &row, "abort")
    }

    fn lookup_key(&self, _ctx: &RequestContext, args: &KeyArgs) -> OmResult<KeyInfo> {
        Ok(KeyInfo::from(&self.load_key(args)?))
    }

    fn delete_key(&self, ctx: &RequestContext, args: &KeyArgs) -> OmResult<()> {
        let bucket = load_bucket(&self.store, &args.volume, &args.bucket)?;
        let row = self.load_key(args)?;

        let mut batch = RowBatch::new();
        batch.delete(key_key(&args.volume, &args.bucket, &args.key));
        let orphans = if bucket.trash_enabled {
            let (trash, deleted_at) = self.free_trash_key(args, current_time_millis())?;
            batch.put(
                trash,
                &TrashRow {
                    key: Some(row.clone()),
                    deleted_at,
                },
            );
            Vec::new()
        } else {
            row.all_locations()
        };

        let usage_guard = self.usage.lock();
        let volume = self.usage.charge(&args.volume, 0, row.data_size)?;
        batch.put(volume_key(&args.volume), &volume);
        let pending = self.releases.record(&mut batch, orphans, "delete");
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        drop(usage_guard);

        self.releases.dispatch(pending);
        info!(
            "Deleted key '{}'{}",
            args.path(),
            if bucket.trash_enabled { " to trash" } else { "" }
        );
        Ok(())
    }

    fn list_keys(
        &self,
        _ctx: &RequestContext,
        volume: &str,
        bucket: &str,
        args: &ListArgs,
    ) -> OmResult<Vec<KeyInfo>> {
        load_bucket(&self.store, volume, bucket)?;
        let parent = key_prefix(volume, bucket);
        let prefix = format!("{parent}{}", args.prefix);
        let start_after = args
            .start_after
            .as_ref()
            .map(|name| format!("{parent}{name}"));
        Ok(self
            .store
            .scan_rows::<KeyRow>(&prefix, start_after.as_deref(), args.limit)?
            .iter()
            .map(|(_, row)| KeyInfo::from(row))
            .collect())
    }

    fn list_trash(
        &self,
        _ctx: &RequestContext,
        volume: &str,
        bucket: &str,
        args: &ListArgs,
    ) -> OmResult<Vec<TrashEntry>> {
        load_bucket(&self.store, volume, bucket)?;
        let mut entries: Vec<TrashEntry> = Vec::new();
        if args.limit == 0 {
            return Ok(entries);
        }
        let parent = trash_bucket_prefix(volume, bucket);
        let prefix = format!("{parent}{}", args.prefix);
        let mut cursor = args
            .start_after
            .as_ref()
            .map(|name| trash_group_end(volume, bucket, name));

        loop {
            let page =
                self.store
                    .scan_rows::<TrashRow>(&prefix, cursor.as_deref(), TRASH_LIST_PAGE)?;
            for (row_key, row) in &page {
                let Some((name, _)) = parse_trash_key(&parent, row_key) else {
                    warn!("Skipping malformed trash row key {}", row_key);
                    continue;
                };
                if entries.last().is_none_or(|e| e.name != name) {
                    if entries.len() == args.limit {
                        return Ok(entries);
                    }
                    entries.push(TrashEntry {
                        name: name.to_string(),
                        versions: Vec::new(),
                    });
                }
                if let Some(entry) = entries.last_mut() {
                    entry.versions.push(TrashedKey::from(row));
                }
            }
            if page.len() < TRASH_LIST_PAGE {
                return Ok(entries);
            }
            cursor = page.last().map(|(k, _)| k.clone());
        }
    }

    fn initiate_multipart_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
    ) -> OmResult<MultipartUploadInfo> {
        self.initiate_upload(ctx, args)
    }

    fn commit_multipart_part(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
        part_number: u32,
    ) -> OmResult<PartInfo> {
        self.commit_part(ctx, args, upload_id, part_number)
    }

    fn complete_multipart_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> OmResult<RowChange> {
        self.complete_upload(ctx, args, upload_id, parts)
    }

    fn abort_multipart_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
    ) -> OmResult<()> {
        self.abort_upload(ctx, args, upload_id)
    }

    fn list_multipart_parts(
        &self,
        _ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
    ) -> OmResult<Vec<PartInfo>> {
        self.list_parts(args, upload_id)
    }
}
