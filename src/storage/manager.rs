//! Storage Manager
//!
//! Manages multiple SSTables and coordinates reads/writes.
//!
//! ## Responsibilities
//! - Discover existing SSTables on startup
//! - Search SSTables newest → oldest for reads
//! - Create new SSTables from MemTable flushes
//! - Merge every table into one when asked (compaction)
//! - Hand out immutable SSTable lists for range scans

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{KvlogError, Result};
use crate::memtable::{MemTable, MemTableEntry};

use super::{SSTable, SSTableBuilder, SSTableReader};

/// Manages the storage layer
///
/// ## Concurrency:
/// - `sstables`: Protected by RwLock (many concurrent readers, exclusive writer)
/// - Readers are `Arc`-shared, so a scan keeps using the tables it started
///   with while flushes publish new ones
/// - `next_sstable_id`: Atomic counter (lock-free)
pub struct StorageManager {
    /// Directory where SSTables are stored
    data_dir: PathBuf,

    /// Open SSTable readers, ordered newest → oldest
    sstables: RwLock<Vec<Arc<SSTableReader>>>,

    /// Next ID for creating new SSTables (atomic, lock-free)
    next_sstable_id: AtomicU64,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove leftovers of interrupted flushes
    /// 3. Order by ID descending (newest first)
    /// 4. Open readers for each SSTable (loads indexes into RAM), deleting
    ///    tables already merged into a newer one
    pub fn open(path: &Path, verify_checksums: bool) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut sstable_ids: Vec<u64> = Vec::new();

        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            if !file_path.is_file() {
                continue;
            }

            if file_path.extension().is_some_and(|ext| ext == "tmp") {
                debug!(path = %file_path.display(), "removing unfinished SSTable");
                fs::remove_file(&file_path)?;
                continue;
            }

            if let Some(id) = Self::parse_sstable_id(&file_path) {
                sstable_ids.push(id);
            }
        }

        // Newest first (highest ID first)
        sstable_ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut sstables = Vec::with_capacity(sstable_ids.len());
        let mut compacted_through = 0;
        for &id in &sstable_ids {
            let sstable_path = Self::sstable_path_with_dir(path, id);
            if id <= compacted_through {
                debug!(id, "removing SSTable left over from compaction");
                fs::remove_file(&sstable_path)?;
                continue;
            }

            let reader = SSTableReader::open(&sstable_path, verify_checksums)?;
            compacted_through = compacted_through.max(reader.compacted_through());
            sstables.push(Arc::new(reader));
        }

        let next_id = sstable_ids.first().map(|&id| id + 1).unwrap_or(1);

        info!(
            dir = %path.display(),
            sstables = sstables.len(),
            "storage opened"
        );

        Ok(Self {
            data_dir: path.to_path_buf(),
            sstables: RwLock::new(sstables),
            next_sstable_id: AtomicU64::new(next_id),
        })
    }

    /// Get a value by key (searches all SSTables newest → oldest)
    ///
    /// Returns:
    /// - `Ok(Some(value))` — key found with value
    /// - `Ok(None)` — key not found, or found tombstone (deleted)
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let sstables = self.sstables.read();

        for reader in sstables.iter() {
            if !reader.might_contain(key) {
                continue;
            }

            match reader.get(key) {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => return Ok(None),               // Tombstone = deleted
                Err(KvlogError::KeyNotFound) => continue, // Not in this SSTable
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Flush a MemTable to a new SSTable
    ///
    /// Creates a new SSTable file from the MemTable's sorted entries,
    /// opens a reader for it, and adds it to the front of the list.
    pub fn flush(&self, memtable: &MemTable) -> Result<SSTable> {
        if memtable.is_empty() {
            return Err(KvlogError::Storage(
                "Cannot flush empty MemTable".to_string(),
            ));
        }

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let path = self.sstable_path(id);

        // Entries come out of the BTreeMap already sorted
        let mut builder = SSTableBuilder::new(&path)?;
        for (key, entry) in memtable.iter() {
            match entry {
                MemTableEntry::Value(v) => builder.add(&key, &v)?,
                MemTableEntry::Tombstone => builder.add_tombstone(&key)?,
            }
        }
        let metadata = builder.finish()?;

        // A table we just wrote needs no checksum pass
        let reader = SSTableReader::open(&path, false)?;

        self.sstables.write().insert(0, Arc::new(reader));

        debug!(
            id,
            entries = metadata.entry_count,
            bytes = metadata.file_size,
            "memtable flushed to SSTable"
        );

        Ok(metadata)
    }

    /// Replace every current table with one built from `merged`
    ///
    /// `inputs` must be the current table list (as returned by `snapshot`)
    /// and `merged` their live entries in ascending key order, newest version
    /// only. Since nothing older remains, tombstones are not carried over.
    ///
    /// The inputs are deleted once no scan holds them any more. If the
    /// process dies first, `open` removes them using the new table's
    /// `compacted_through` marker.
    pub fn compact<I>(&self, inputs: &[Arc<SSTableReader>], merged: I) -> Result<SSTable>
    where
        I: IntoIterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
    {
        let through = inputs
            .iter()
            .filter_map(|table| Self::parse_sstable_id(table.path()))
            .max()
            .ok_or_else(|| KvlogError::Storage("Nothing to compact".to_string()))?;

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let path = self.sstable_path(id);

        let mut builder = SSTableBuilder::new(&path)?.compacted_through(through);
        for entry in merged {
            let (key, value) = entry?;
            builder.add(&key, &value)?;
        }
        let metadata = builder.finish()?;
        let reader = Arc::new(SSTableReader::open(&path, false)?);

        {
            let mut sstables = self.sstables.write();
            let unchanged = sstables.len() == inputs.len()
                && sstables.iter().zip(inputs).all(|(a, b)| Arc::ptr_eq(a, b));
            if !unchanged {
                reader.mark_obsolete();
                return Err(KvlogError::Storage(
                    "SSTable list changed during compaction".to_string(),
                ));
            }
            *sstables = vec![reader];
        }

        for table in inputs {
            table.mark_obsolete();
        }

        info!(
            id,
            merged_tables = inputs.len(),
            entries = metadata.entry_count,
            bytes = metadata.file_size,
            "SSTables compacted"
        );

        Ok(metadata)
    }

    /// Current SSTables, newest first
    pub fn snapshot(&self) -> Vec<Arc<SSTableReader>> {
        self.sstables.read().clone()
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.sstables.read().len()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next SSTable ID (for testing/debugging)
    pub fn next_sstable_id(&self) -> u64 {
        self.next_sstable_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn sstable_path(&self, id: u64) -> PathBuf {
        Self::sstable_path_with_dir(&self.data_dir, id)
    }

    fn sstable_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("sstable_{:06}.sst", id))
    }

    /// "sstable_000042.sst" → Some(42)
    fn parse_sstable_id(path: &Path) -> Option<u64> {
        if path.extension()? != "sst" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        name.strip_prefix("sstable_")?.parse().ok()
    }
}
