//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Track size for flush triggers
//! - Ordered iteration for SSTable creation and range scans
//!
//! ## Data Structure Choice
//! A BTreeMap behind an `Arc`, wrapped in a RwLock:
//! - Ordered keys (required for SSTable generation and range scans)
//! - Cursors hold a cloned `Arc` as a point-in-time snapshot; the next
//!   writer copies the map (`Arc::make_mut`) instead of blocking on them

mod table;

pub use table::{MemTable, MemTableRange, MemTableSnapshot};

/// Entry stored in the MemTable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl MemTableEntry {
    /// Bytes this entry contributes to the memtable size (excluding its key)
    pub fn value_size(&self) -> usize {
        match self {
            MemTableEntry::Value(v) => v.len(),
            MemTableEntry::Tombstone => 0,
        }
    }

    /// The value, or `None` for a tombstone
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            MemTableEntry::Value(v) => Some(v),
            MemTableEntry::Tombstone => None,
        }
    }
}
