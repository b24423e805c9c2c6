//! Shared helpers for the facade tests

#![allow(dead_code)]

use omm_common::{BucketArgs, KeyArgs, OmConfig, OmResult, VolumeArgs};
use omm_core::{LocalBlockAllocator, OzoneManager, RequestContext};
use omm_store::{MemoryKvStore, OmStore};
use std::sync::Arc;

pub const BLOCK_SIZE: u64 = 100;

pub struct Cluster {
    pub kv: Arc<MemoryKvStore>,
    pub allocator: Arc<LocalBlockAllocator>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            kv: Arc::new(MemoryKvStore::new()),
            allocator: Arc::new(LocalBlockAllocator::new(BLOCK_SIZE)),
        }
    }

    /// Open (or reopen) a manager over the same store and block layer
    pub fn open(&self) -> OzoneManager {
        OzoneManager::open(OmConfig::default(), self.kv.clone(), self.allocator.clone()).unwrap()
    }

    /// Direct view of the rows, for checking what a scan sees
    pub fn store(&self) -> OmStore {
        OmStore::new(self.kv.clone())
    }
}

/// Volume `v` with a trash bucket, a plain bucket and a versioned bucket
pub fn namespace(om: &OzoneManager) {
    let ctx = RequestContext::new();
    om.create_volume(&ctx, &VolumeArgs::new("v", "alice")).unwrap();
    for args in [
        BucketArgs::new("v", "trash").with_trash(true),
        BucketArgs::new("v", "plain"),
        BucketArgs::new("v", "versioned").with_versioning(true),
    ] {
        om.create_bucket(&ctx, &args).unwrap();
    }
}

/// Open then commit `size` bytes under `v/bucket/key`
pub fn put_key(om: &OzoneManager, bucket: &str, key: &str, size: u64) -> OmResult<()> {
    let ctx = RequestContext::new();
    let args = KeyArgs::new("v", bucket, key).with_size(size);
    let session = om.open_key(&ctx, &args)?;
    om.commit_key(&ctx, &args, session.client_id, size)
}
