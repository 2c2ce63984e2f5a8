//! Storage Module
//!
//! Persistent storage layer using SSTable-like format.
//!
//! ## Responsibilities
//! - Persist data to disk in sorted format
//! - Efficient range scans and point lookups
//! - Immutable files, so readers never coordinate with writers
//!
//! Flushes publish a new SSTable. Once too many exist they are merged into
//! one, dropping shadowed versions and tombstones.

mod manager;
mod sstable;

pub use manager::StorageManager;
pub use sstable::{SSTable, SSTableBuilder, SSTableIterator, SSTableReader};
