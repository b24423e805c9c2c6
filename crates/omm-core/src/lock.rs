//! Hierarchical namespace locks.
//!
//! Locks are keyed by volume, bucket and key. A request names every scope
//! it needs up front; the set is sorted parent-first, acquired in that
//! order under a single deadline and released child-first. Because every
//! request acquires in the same global order, lock sets cannot deadlock.

use derive_more::Display;
use omm_common::{OmError, OmResult};
use dashmap::DashMap;
use parking_lot::RawRwLock;
use parking_lot::RwLock;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A lockable namespace node. Ordering is parent-first, then by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum LockScope {
    #[display("{_0}")]
    Volume(String),
    #[display("{_0}/{_1}")]
    Bucket(String, String),
    #[display("{_0}/{_1}/{_2}")]
    Key(String, String, String),
}

impl LockScope {
    pub fn volume(volume: &str) -> Self {
        Self::Volume(volume.to_string())
    }

    pub fn bucket(volume: &str, bucket: &str) -> Self {
        Self::Bucket(volume.to_string(), bucket.to_string())
    }

    pub fn key(volume: &str, bucket: &str, key: &str) -> Self {
        Self::Key(volume.to_string(), bucket.to_string(), key.to_string())
    }

    const fn depth(&self) -> u8 {
        match self {
            Self::Volume(_) => 0,
            Self::Bucket(..) => 1,
            Self::Key(..) => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// One entry of a lock request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRequest {
    pub scope: LockScope,
    pub mode: LockMode,
}

impl LockRequest {
    #[must_use]
    pub const fn shared(scope: LockScope) -> Self {
        Self {
            scope,
            mode: LockMode::Shared,
        }
    }

    #[must_use]
    pub const fn exclusive(scope: LockScope) -> Self {
        Self {
            scope,
            mode: LockMode::Exclusive,
        }
    }
}

enum HeldGuard {
    Shared(#[allow(dead_code)] ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(#[allow(dead_code)] ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Locks held by one request; dropping it releases them child-first
pub struct LockSet<'a> {
    manager: &'a LockManager,
    held: Vec<(LockScope, HeldGuard)>,
}

impl LockSet<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        while let Some((scope, guard)) = self.held.pop() {
            drop(guard);
            self.manager.reclaim(&scope);
        }
    }
}

/// Process-wide table of namespace locks
#[derive(Default)]
pub struct LockManager {
    locks: DashMap<LockScope, Arc<RwLock<()>>>,
}

impl LockManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort parent-first and merge duplicates, keeping the strongest mode
    fn normalize(mut requests: Vec<LockRequest>) -> Vec<LockRequest> {
        requests.sort_by(|a, b| {
            (a.scope.depth(), &a.scope)
                .cmp(&(b.scope.depth(), &b.scope))
                .then(b.mode.cmp(&a.mode))
        });
        requests.dedup_by(|later, earlier| later.scope == earlier.scope);
        requests
    }

    /// Acquire every requested lock before `deadline`, or none of them.
    pub fn acquire(&self, requests: Vec<LockRequest>, deadline: Instant) -> OmResult<LockSet<'_>> {
        let requests = Self::normalize(requests);
        let mut set = LockSet {
            manager: self,
            held: Vec::with_capacity(requests.len()),
        };
        for request in requests {
            let lock = self
                .locks
                .entry(request.scope.clone())
                .or_insert_with(|| Arc::new(RwLock::new(())))
                .clone();
            let guard = match request.mode {
                LockMode::Shared => lock.try_read_arc_until(deadline).map(HeldGuard::Shared),
                LockMode::Exclusive => lock
                    .try_write_arc_until(deadline)
                    .map(HeldGuard::Exclusive),
            };
            drop(lock);
            match guard {
                Some(guard) => set.held.push((request.scope, guard)),
                None => {
                    debug!("Lock timeout on {} ({:?})", request.scope, request.mode);
                    self.reclaim(&request.scope);
                    // partial locks are released when `set` drops
                    return Err(OmError::Timeout(format!(
                        "lock {} ({:?})",
                        request.scope, request.mode
                    )));
                }
            }
        }
        Ok(set)
    }

    /// Drop the table entry once nobody holds or waits on it
    fn reclaim(&self, scope: &LockScope) {
        self.locks
            .remove_if(scope, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of live lock entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
