//! Typed view over the key-value store.
//!
//! Managers read and write decoded rows through [`OmStore`]; every
//! multi-row mutation is assembled in a [`RowBatch`] and committed at once.

use crate::codec::{Row, decode_row, encode_row};
use crate::error::{StoreError, StoreResult};
use crate::kv::{BatchOp, KvStore};
use std::sync::Arc;

/// A set of row mutations committed atomically
#[derive(Debug, Default)]
pub struct RowBatch {
    ops: Vec<BatchOp>,
}

impl RowBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<R: Row>(&mut self, key: impl Into<String>, row: &R) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: encode_row(row),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

#[derive(Clone)]
pub struct OmStore {
    kv: Arc<dyn KvStore>,
}

impl OmStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    #[must_use]
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn get_row<R: Row>(&self, key: &str) -> StoreResult<Option<R>> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(decode_row(key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.kv.get(key)?.is_some())
    }

    /// True if at least one row lives under `prefix` (a `limit=1` scan)
    pub fn has_children(&self, prefix: &str) -> StoreResult<bool> {
        Ok(!self.kv.scan(prefix, None, 1)?.is_empty())
    }

    pub fn scan_rows<R: Row>(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<(String, R)>> {
        self.kv
            .scan(prefix, start_after, limit)?
            .into_iter()
            .map(|(key, bytes)| {
                let row = decode_row(&key, &bytes)?;
                Ok((key, row))
            })
            .collect()
    }

    /// Visit every row under `prefix`, fetching `page_size` rows at a time
    pub fn for_each_row<R: Row>(
        &self,
        prefix: &str,
        page_size: usize,
        mut f: impl FnMut(String, R) -> StoreResult<()>,
    ) -> StoreResult<u64> {
        self.for_each_page::<R, StoreError>(prefix, page_size, |page| {
            for (key, row) in page {
                f(key, row)?;
            }
            Ok(())
        })
    }

    /// Hand the rows under `prefix` to `f` one page at a time.
    ///
    /// At most `page_size` rows are held at once; each scan resumes after
    /// the last key of the previous page, so `f` may delete the rows it is
    /// given.
    pub fn for_each_page<R: Row, E: From<StoreError>>(
        &self,
        prefix: &str,
        page_size: usize,
        mut f: impl FnMut(Vec<(String, R)>) -> Result<(), E>,
    ) -> Result<u64, E> {
        let page_size = page_size.max(1);
        let mut visited = 0u64;
        let mut cursor: Option<String> = None;
        loop {
            let page = self.scan_rows::<R>(prefix, cursor.as_deref(), page_size)?;
            let Some((last, _)) = page.last() else {
                return Ok(visited);
            };
            cursor = Some(last.clone());
            let full = page.len() >= page_size;
            visited += page.len() as u64;
            f(page)?;
            if !full {
                return Ok(visited);
            }
        }
    }

    /// Number of rows under `prefix`; values are not decoded
    pub fn count_rows(&self, prefix: &str, page_size: usize) -> StoreResult<u64> {
        let mut count = 0u64;
        let mut cursor: Option<String> = None;
        loop {
            let page = self.kv.scan(prefix, cursor.as_deref(), page_size.max(1))?;
            count += page.len() as u64;
            if page.len() < page_size.max(1) {
                return Ok(count);
            }
            cursor = page.last().map(|(k, _)| k.clone());
        }
    }

    pub fn put_row<R: Row>(&self, key: &str, row: &R) -> StoreResult<()> {
        self.kv.put(key, &encode_row(row))
    }

    pub fn delete_row(&self, key: &str) -> StoreResult<()> {
        self.kv.delete(key)
    }

    pub fn commit(&self, batch: RowBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.kv.write_batch(batch.into_ops())
    }
}
