//! In-memory ordered index from key to the location of its most recent
//! record.

use std::collections::BTreeMap;
use std::ops::Bound;

/// Locates a live record: which segment it lives in, its byte offset, the
/// combined key+value payload size, and the timestamp it was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDirEntry {
    /// Id of the segment holding the record.
    pub segment_id: u64,
    /// Byte offset of the record's CRC field within its segment file.
    pub offset: u64,
    /// `key_size + value_size` for the record.
    pub payload_size: u32,
    /// Timestamp the record was written with.
    pub timestamp: u32,
}

/// Ordered mapping from key to [`KeyDirEntry`].
///
/// Backed by a `BTreeMap`, giving O(log n) point operations and O(log n + k)
/// range iteration, as required for lexicographic key ordering.
#[derive(Debug, Default)]
pub struct KeyDir {
    entries: BTreeMap<String, KeyDirEntry>,
}

impl KeyDir {
    /// Creates an empty key directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Looks up the entry for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<KeyDirEntry> {
        self.entries.get(key).copied()
    }

    /// Inserts or overwrites the entry for `key`.
    pub fn set(&mut self, key: impl Into<String>, entry: KeyDirEntry) {
        self.entries.insert(key.into(), entry);
    }

    /// Removes the entry for `key`, if present.
    pub fn delete(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Returns a snapshot of all live keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the key directory holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns every key `k` with `start <= k <= end`, in ascending order.
    /// Both endpoints are inclusive. If `end < start`, or no key satisfies
    /// the bound, the result is empty.
    #[must_use]
    pub fn range(&self, start: &str, end: &str) -> Vec<String> {
        if end < start {
            return Vec::new();
        }
        self.entries
            .range((Bound::Included(start), Bound::Included(end)))
            .map(|(k, _)| k.clone())
            .collect()
    }
}
