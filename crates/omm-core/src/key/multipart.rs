//! Multipart uploads.
//!
//! An upload is one row holding its parts keyed by part number. Completing
//! it installs the Key row and deletes the upload row in a single batch.

use super::{KeyContent, KeyManager};
use crate::bucket::load_bucket;
use crate::context::RequestContext;
use crate::volume::load_volume;
use omm_common::{
    CompletedPart, KeyArgs, MultipartUploadInfo, OmError, OmResult, PartInfo, RowChange,
    current_time_millis,
};
use omm_store::RowBatch;
use omm_store::keys::multipart_key;
use omm_store::rows::{MultipartRow, PartRow, to_location_rows, to_locations};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

pub const MAX_PART_NUMBER: u32 = 10_000;

fn invalid_part(part_number: u32, reason: &str) -> OmError {
    OmError::InvalidPart {
        part_number,
        reason: reason.to_string(),
    }
}

/// The caller's list must equal the uploaded parts, ascending by number
fn validate_parts(row: &MultipartRow, parts: &[CompletedPart]) -> OmResult<()> {
    if parts.is_empty() {
        return Err(invalid_part(0, "no parts listed"));
    }
    for pair in parts.windows(2) {
        if pair[0].part_number >= pair[1].part_number {
            return Err(invalid_part(
                pair[1].part_number,
                "parts must be listed in ascending order",
            ));
        }
    }
    for part in parts {
        match row.parts.get(&part.part_number) {
            None => return Err(invalid_part(part.part_number, "part was never uploaded")),
            Some(stored) if stored.part_name != part.part_name => {
                return Err(invalid_part(
                    part.part_number,
                    "part name does not match the uploaded part",
                ));
            }
            Some(_) => {}
        }
    }
    if let Some(missing) = row
        .parts
        .keys()
        .find(|n| !parts.iter().any(|p| p.part_number == **n))
    {
        return Err(invalid_part(*missing, "uploaded part missing from the list"));
    }
    Ok(())
}

impl KeyManager {
    /// Ids we never minted are unknown uploads, never row-key fragments
    fn load_upload(&self, args: &KeyArgs, upload_id: &str) -> OmResult<(String, MultipartRow)> {
        if Uuid::parse_str(upload_id).is_err() {
            return Err(OmError::NoSuchUpload {
                upload_id: upload_id.to_string(),
            });
        }
        let row_key = multipart_key(&args.volume, &args.bucket, &args.key, upload_id);
        match self.store.get_row::<MultipartRow>(&row_key)? {
            Some(row) => Ok((row_key, row)),
            None => Err(OmError::NoSuchUpload {
                upload_id: upload_id.to_string(),
            }),
        }
    }

    pub(super) fn initiate_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
    ) -> OmResult<MultipartUploadInfo> {
        load_bucket(&self.store, &args.volume, &args.bucket)?;
        let upload_id = Uuid::new_v4().to_string();
        let now = current_time_millis();
        let row = MultipartRow {
            volume: args.volume.clone(),
            bucket: args.bucket.clone(),
            name: args.key.clone(),
            upload_id: upload_id.clone(),
            initiated_at: now,
            parts: BTreeMap::new(),
            metadata: args.metadata.clone(),
        };

        let mut batch = RowBatch::new();
        batch.put(
            multipart_key(&args.volume, &args.bucket, &args.key, &upload_id),
            &row,
        );
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        info!("Initiated multipart upload {} for '{}'", upload_id, args.path());

        Ok(MultipartUploadInfo {
            volume: args.volume.clone(),
            bucket: args.bucket.clone(),
            key: args.key.clone(),
            upload_id,
            initiated_at: now,
        })
    }

    pub(super) fn commit_part(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
        part_number: u32,
    ) -> OmResult<PartInfo> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(invalid_part(
                part_number,
                "part numbers run from 1 to 10000",
            ));
        }
        let volume = load_volume(&self.store, &args.volume)?;
        load_bucket(&self.store, &args.volume, &args.bucket)?;
        let (row_key, mut row) = self.load_upload(args, upload_id)?;
        self.check_request_size(&volume, args.data_size)?;

        let locations = self.allocator.allocate(args.data_size)?;
        let part = PartRow {
            part_number,
            part_name: format!("{upload_id}-{}", Uuid::new_v4().simple()),
            size: args.data_size,
            locations: to_location_rows(&locations),
            modified_at: current_time_millis(),
        };
        let replaced = row.parts.insert(part_number, part.clone());

        let mut batch = RowBatch::new();
        batch.put(row_key, &row);
        let orphans = replaced
            .map(|old| to_locations(&old.locations))
            .unwrap_or_default();
        let pending = self.releases.record(&mut batch, orphans, "part replaced");
        let committed = ctx
            .check_cancelled()
            .and_then(|()| self.store.commit(batch).map_err(OmError::from));
        if let Err(e) = committed {
            self.release_uncommitted(&locations);
            return Err(e);
        }
        self.releases.dispatch(pending);

        debug!(
            "Committed part {} of upload {} ({} bytes)",
            part_number, upload_id, args.data_size
        );
        Ok(PartInfo::from(&part))
    }

    pub(super) fn complete_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> OmResult<RowChange> {
        let bucket = load_bucket(&self.store, &args.volume, &args.bucket)?;
        let (row_key, row) = self.load_upload(args, upload_id)?;
        validate_parts(&row, parts)?;

        // parts iterate in part-number order
        let locations = row.all_locations();
        let data_size = row.parts.values().map(|p| p.size).sum();
        let metadata = if args.metadata.is_empty() {
            row.metadata
        } else {
            args.metadata.clone()
        };

        let mut batch = RowBatch::new();
        batch.delete(row_key);
        let change = self.install_key(
            ctx,
            &bucket,
            &args.key,
            KeyContent {
                data_size,
                locations,
                metadata,
            },
            batch,
            Vec::new(),
            "multipart complete",
        )?;
        info!(
            "Completed multipart upload {} into '{}' ({} parts)",
            upload_id,
            args.path(),
            parts.len()
        );
        Ok(change)
    }

    pub(super) fn abort_upload(
        &self,
        ctx: &RequestContext,
        args: &KeyArgs,
        upload_id: &str,
    ) -> OmResult<()> {
        let (row_key, row) = self.load_upload(args, upload_id)?;
        let mut batch = RowBatch::new();
        batch.delete(row_key);
        let pending = self
            .releases
            .record(&mut batch, row.all_locations(), "multipart abort");
        ctx.check_cancelled()?;
        self.store.commit(batch)?;
        self.releases.dispatch(pending);
        info!("Aborted multipart upload {} for '{}'", upload_id, args.path());
        Ok(())
    }

    pub(super) fn list_parts(&self, args: &KeyArgs, upload_id: &str) -> OmResult<Vec<PartInfo>> {
        let (_, row) = self.load_upload(args, upload_id)?;
        Ok(row.parts.values().map(PartInfo::from).collect())
    }
}
