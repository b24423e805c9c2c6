//! In-memory key-value store.
//!
//! Used by tests and tooling that need a throwaway namespace. Supports
//! simple fault injection so callers can exercise `KV_UNAVAILABLE` paths.

use crate::error::{StoreError, StoreResult};
use crate::kv::{BatchOp, KvStore, check_batch_size, scan_start};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryKvStore {
    rows: RwLock<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
    failing_batches: AtomicUsize,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` write batches without applying them
    pub fn fail_next_batches(&self, n: usize) {
        self.failing_batches.store(n, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected fault".into()));
        }
        Ok(())
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.rows.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check_available()?;
        self.rows.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_available()?;
        self.rows.write().remove(key);
        Ok(())
    }

    fn scan(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.check_available()?;
        let (start, exclusive) = scan_start(prefix, start_after);
        let lower = if exclusive {
            Bound::Excluded(start)
        } else {
            Bound::Included(start)
        };
        let rows = self.rows.read();
        Ok(rows
            .range::<str, _>((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        self.check_available()?;
        check_batch_size(&ops)?;
        let injected = self
            .failing_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::Unavailable("injected batch failure".into()));
        }
        let mut rows = self.rows.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    rows.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    rows.remove(&key);
                }
            }
        }
        Ok(())
    }
}
