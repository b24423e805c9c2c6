//! OMM Core - the metadata manager
//!
//! Volume, bucket and key managers behind the [`OzoneManager`] facade,
//! together with the lock manager, metrics registry, deferred block
//! release, trash sweep and startup recovery they rely on.

pub mod acl;
pub mod background;
pub mod block;
pub mod bucket;
pub mod context;
pub mod health;
pub mod key;
pub mod lock;
pub mod manager;
pub mod metrics;
pub mod recovery;
pub mod release;
pub mod trash;
pub mod volume;

pub use acl::{AccessChecker, AccessTarget};
pub use block::{AllocatorError, BlockAllocator, LocalBlockAllocator};
pub use bucket::{BucketManager, BucketOps};
pub use context::RequestContext;
pub use health::DegradedRanges;
pub use key::{KeyManager, KeyOps};
pub use lock::{LockManager, LockMode, LockRequest, LockScope};
pub use manager::{OzoneManager, OzoneManagerBuilder};
pub use metrics::{Event, Gauge, MetricsRegistry, MetricsSnapshot, OmOperation, OpFamily};
pub use recovery::{GaugeSource, RecoveryReport};
pub use release::{ReleaseQueue, ReleaseReport};
pub use trash::{SweepReport, TrashOps, TrashService, TrashSettings};
pub use volume::{VolumeManager, VolumeOps};
