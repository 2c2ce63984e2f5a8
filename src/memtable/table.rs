//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency and `Arc` snapshots
//! for cursors.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::MemTableEntry;
use crate::wal::Operation;

/// Shared, immutable view of the memtable at one point in time
pub type MemTableSnapshot = Arc<BTreeMap<Vec<u8>, MemTableEntry>>;

/// In-memory table for recent writes
pub struct MemTable {
    data: RwLock<MemTableSnapshot>,
    /// Approximate size in bytes: keys + values (tombstone = key only)
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Arc::new(BTreeMap::new())),
            size: AtomicUsize::new(0),
        }
    }

    /// Get a value by key (read lock)
    ///
    /// `Some(Tombstone)` means the key was deleted here and older data must not
    /// be consulted.
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.data.read().get(key).cloned()
    }

    /// Put a key-value pair (write lock), returning the new size
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> usize {
        let mut data = self.data.write();
        let map = Arc::make_mut(&mut data);
        Self::insert(map, &self.size, key, MemTableEntry::Value(value));
        self.size.load(Ordering::SeqCst)
    }

    /// Delete a key (write lock, inserts tombstone), returning the new size
    pub fn delete(&self, key: Vec<u8>) -> usize {
        let mut data = self.data.write();
        let map = Arc::make_mut(&mut data);
        Self::insert(map, &self.size, key, MemTableEntry::Tombstone);
        self.size.load(Ordering::SeqCst)
    }

    /// Apply logged operations under a single write lock
    ///
    /// Readers see either none or all of them.
    pub fn apply(&self, ops: &[Operation]) -> usize {
        let mut data = self.data.write();
        let map = Arc::make_mut(&mut data);
        for op in ops {
            Self::apply_one(map, &self.size, op);
        }
        self.size.load(Ordering::SeqCst)
    }

    fn apply_one(map: &mut BTreeMap<Vec<u8>, MemTableEntry>, size: &AtomicUsize, op: &Operation) {
        match op {
            Operation::Put { key, value } => {
                Self::insert(map, size, key.clone(), MemTableEntry::Value(value.clone()))
            }
            Operation::Delete { key } => {
                Self::insert(map, size, key.clone(), MemTableEntry::Tombstone)
            }
            Operation::Batch { ops } => {
                for op in ops {
                    Self::apply_one(map, size, op);
                }
            }
        }
    }

    fn insert(
        map: &mut BTreeMap<Vec<u8>, MemTableEntry>,
        size: &AtomicUsize,
        key: Vec<u8>,
        entry: MemTableEntry,
    ) {
        let key_len = key.len();
        let value_len = entry.value_size();
        match map.insert(key, entry) {
            Some(old) => {
                // Key bytes were already counted; swap the value contribution
                size.fetch_sub(old.value_size(), Ordering::SeqCst);
                size.fetch_add(value_len, Ordering::SeqCst);
            }
            None => {
                size.fetch_add(key_len + value_len, Ordering::SeqCst);
            }
        }
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Get entry count (tombstones included)
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Sorted copy of all entries, tombstones included (for flush)
    pub fn iter(&self) -> Vec<(Vec<u8>, MemTableEntry)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Point-in-time view shared with the live table until the next write
    pub fn snapshot(&self) -> MemTableSnapshot {
        Arc::clone(&self.data.read())
    }

    /// Clear all entries (after successful flush)
    ///
    /// Outstanding snapshots keep the old contents.
    pub fn clear(&self) {
        let mut data = self.data.write();
        *data = Arc::new(BTreeMap::new());
        self.size.store(0, Ordering::SeqCst);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy ordered walk over a snapshot between two bounds
///
/// Each step is a fresh `range` lookup starting after the last key returned,
/// so no borrow of the snapshot outlives a call to `next`.
pub struct MemTableRange {
    snapshot: MemTableSnapshot,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    done: bool,
}

impl MemTableRange {
    /// Walk `[start, end)`; `None` bounds are open
    pub fn new(snapshot: MemTableSnapshot, start: Option<&[u8]>, end: Option<&[u8]>) -> Self {
        let done = matches!((start, end), (Some(s), Some(e)) if s >= e);
        Self {
            snapshot,
            lower: start.map_or(Bound::Unbounded, |s| Bound::Included(s.to_vec())),
            upper: end.map_or(Bound::Unbounded, |e| Bound::Excluded(e.to_vec())),
            done,
        }
    }
}

impl Iterator for MemTableRange {
    type Item = (Vec<u8>, MemTableEntry);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let next = self
            .snapshot
            .range::<Vec<u8>, _>((self.lower.clone(), self.upper.clone()))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));

        match &next {
            Some((key, _)) => self.lower = Bound::Excluded(key.clone()),
            None => self.done = true,
        }
        next
    }
}
