//! Namespace ranges that hit corruption or an internal fault.
//!
//! Marking a range never stops the manager; the rest of the namespace keeps
//! serving and `/health` reports what was marked.

use parking_lot::Mutex;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct DegradedRanges {
    ranges: Mutex<BTreeSet<String>>,
}

impl DegradedRanges {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `range`; true the first time it is seen
    pub fn mark(&self, range: impl Into<String>) -> bool {
        self.ranges.lock().insert(range.into())
    }

    #[must_use]
    pub fn contains(&self, range: &str) -> bool {
        self.ranges.lock().contains(range)
    }

    /// Marked ranges, sorted
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.ranges.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_once_and_list_sorted() {
        let ranges = DegradedRanges::new();
        assert!(ranges.is_empty());
        assert!(ranges.mark("v/b"));
        assert!(ranges.mark("a/b/k"));
        assert!(!ranges.mark("v/b"));
        assert!(ranges.contains("v/b"));
        assert_eq!(ranges.list(), ["a/b/k", "v/b"]);
    }
}
