//! Block layer contract.
//!
//! The manager only stores block handles; the block layer owns the blocks.
//! `release` is best-effort and must tolerate handles it no longer knows.

use omm_common::BlockLocation;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum AllocatorError {
    #[error("no capacity for {requested} bytes")]
    NoCapacity { requested: u64 },
    #[error("block service unavailable: {0}")]
    Unavailable(String),
    #[error("release failed: {0}")]
    ReleaseFailed(String),
}

impl From<AllocatorError> for omm_common::OmError {
    fn from(e: AllocatorError) -> Self {
        Self::BlockAllocation(e.to_string())
    }
}

/// Consumed block placement service
pub trait BlockAllocator: Send + Sync {
    /// Reserve blocks covering `bytes`; zero bytes yields no blocks
    fn allocate(&self, bytes: u64) -> Result<Vec<BlockLocation>, AllocatorError>;

    /// Hand blocks back to the block layer
    fn release(&self, locations: &[BlockLocation]) -> Result<(), AllocatorError>;

    /// Size of one block
    fn block_size(&self) -> u64;
}

/// In-process allocator handing out sequential container/local ids
pub struct LocalBlockAllocator {
    block_size: u64,
    blocks_per_container: u64,
    max_blocks_per_request: u64,
    next_block: AtomicU64,
    live: Mutex<HashSet<(u64, u64)>>,
}

impl LocalBlockAllocator {
    pub const DEFAULT_BLOCKS_PER_CONTAINER: u64 = 1024;
    pub const DEFAULT_MAX_BLOCKS_PER_REQUEST: u64 = 1 << 20;

    #[must_use]
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size: block_size.max(1),
            blocks_per_container: Self::DEFAULT_BLOCKS_PER_CONTAINER,
            max_blocks_per_request: Self::DEFAULT_MAX_BLOCKS_PER_REQUEST,
            next_block: AtomicU64::new(0),
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Refuse single requests needing more than `blocks` blocks
    #[must_use]
    pub const fn with_max_blocks_per_request(mut self, blocks: u64) -> Self {
        self.max_blocks_per_request = blocks;
        self
    }

    /// Blocks allocated and not yet released
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live.lock().len()
    }

    #[must_use]
    pub fn is_live(&self, location: &BlockLocation) -> bool {
        self.live.lock().contains(&location.block_id())
    }
}

impl BlockAllocator for LocalBlockAllocator {
    fn allocate(&self, bytes: u64) -> Result<Vec<BlockLocation>, AllocatorError> {
        let count = bytes.div_ceil(self.block_size);
        if count > self.max_blocks_per_request {
            return Err(AllocatorError::NoCapacity { requested: bytes });
        }
        let mut remaining = bytes;
        let mut locations = Vec::new();
        let mut live = self.live.lock();
        for _ in 0..count {
            let seq = self.next_block.fetch_add(1, Ordering::Relaxed);
            let length = remaining.min(self.block_size);
            remaining -= length;
            let location = BlockLocation {
                container_id: seq / self.blocks_per_container + 1,
                local_id: seq % self.blocks_per_container + 1,
                offset: 0,
                length,
                create_version: 0,
            };
            live.insert(location.block_id());
            locations.push(location);
        }
        debug!("Allocated {} blocks for {} bytes", locations.len(), bytes);
        Ok(locations)
    }

    fn release(&self, locations: &[BlockLocation]) -> Result<(), AllocatorError> {
        let mut live = self.live.lock();
        for location in locations {
            live.remove(&location.block_id());
        }
        Ok(())
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }
}
