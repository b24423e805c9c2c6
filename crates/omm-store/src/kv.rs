//! Ordered key-value store contract consumed by the metadata manager.

use crate::error::{StoreError, StoreResult};

/// Largest write batch that must commit atomically (64 MiB)
pub const MAX_BATCH_BYTES: usize = 64 * 1024 * 1024;

/// One mutation inside an atomic write batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl BatchOp {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }

    /// Bytes this op contributes to the batch size limit
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Put { key, value } => key.len() + value.len(),
            Self::Delete { key } => key.len(),
        }
    }
}

/// Reject batches over [`MAX_BATCH_BYTES`]
pub fn check_batch_size(ops: &[BatchOp]) -> StoreResult<()> {
    let size: usize = ops.iter().map(BatchOp::encoded_len).sum();
    if size > MAX_BATCH_BYTES {
        return Err(StoreError::BatchTooLarge {
            size,
            max: MAX_BATCH_BYTES,
        });
    }
    Ok(())
}

/// Process-wide ordered store. Implementations are internally thread-safe.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Up to `limit` entries whose key starts with `prefix`, in key order,
    /// beginning strictly after `start_after` when given.
    fn scan(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Apply every op or none of them.
    fn write_batch(&self, ops: Vec<BatchOp>) -> StoreResult<()>;
}

/// Lower scan bound: the later of the prefix itself and `start_after`.
///
/// Returns `(key, exclusive)`.
pub(crate) fn scan_start<'a>(prefix: &'a str, start_after: Option<&'a str>) -> (&'a str, bool) {
    match start_after {
        Some(after) if after >= prefix => (after, true),
        _ => (prefix, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_start() {
        assert_eq!(scan_start("/key/v/b/", None), ("/key/v/b/", false));
        assert_eq!(
            scan_start("/key/v/b/", Some("/key/v/b/a")),
            ("/key/v/b/a", true)
        );
        // a marker before the prefix range does not widen the scan
        assert_eq!(scan_start("/key/v/b/", Some("/buk/")), ("/key/v/b/", false));
    }

    #[test]
    fn test_batch_size_limit() {
        let ops = vec![BatchOp::Put {
            key: "k".into(),
            value: vec![0; 16],
        }];
        assert!(check_batch_size(&ops).is_ok());

        let huge = vec![BatchOp::Put {
            key: "k".into(),
            value: vec![0; MAX_BATCH_BYTES],
        }];
        assert!(matches!(
            check_batch_size(&huge),
            Err(StoreError::BatchTooLarge { .. })
        ));
    }
}
