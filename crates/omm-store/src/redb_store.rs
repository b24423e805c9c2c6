//! Persistent key-value store backed by redb.
//!
//! Every write is a single write transaction, so a batch commits or fails
//! as a whole. Reads open their own read transaction and never block writers.

use crate::error::StoreResult;
use crate::kv::{BatchOp, KvStore, check_batch_size, scan_start};
use crate::tables;
use redb::{Database, ReadableTable};
use std::ops::Bound;
use std::path::Path;
use tracing::info;

pub struct RedbKvStore {
    db: Database,
}

impl RedbKvStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create the table eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::OM_ROWS)?;
        }
        write_txn.commit()?;

        info!("Opened metadata database at {}", path.display());
        Ok(Self { db })
    }
}

impl KvStore for RedbKvStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::OM_ROWS)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(tables::OM_ROWS)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(tables::OM_ROWS)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn scan(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let mut result = Vec::new();
        if limit == 0 {
            return Ok(result);
        }
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::OM_ROWS)?;
        let (start, exclusive) = scan_start(prefix, start_after);
        let lower = if exclusive {
            Bound::Excluded(start)
        } else {
            Bound::Included(start)
        };
        for entry in table.range::<&str>((lower, Bound::Unbounded))? {
            let (key, value) = entry?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            result.push((key.to_string(), value.value().to_vec()));
            if result.len() >= limit {
                break;
            }
        }
        Ok(result)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        check_batch_size(&ops)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(tables::OM_ROWS)?;
            for op in &ops {
                match op {
                    BatchOp::Put { key, value } => {
                        table.insert(key.as_str(), value.as_slice())?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_str())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}
