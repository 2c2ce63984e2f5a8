//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, and Storage
//! - Hold the data directory lock for the lifetime of the handle
//! - Handle concurrent read/write access
//! - Trigger flushes when MemTable is full
//! - Merge SSTables once too many accumulate
//! - Manage crash recovery on startup
//! - Hand out point-in-time range cursors

use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::batch::WriteBatch;
use crate::config::Config;
use crate::cursor::{Cursor, ScanRange};
use crate::error::{KvlogError, Result};
use crate::memtable::{MemTable, MemTableEntry, MemTableSnapshot};
use crate::storage::StorageManager;
use crate::wal::{Operation, WalRecovery, WalWriter};

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/write/flush): Serialized by `write_lock`
///   - Only ONE write operation at a time
///   - Must acquire: write_lock → WAL → memtable → storage (write)
///
/// - **Reads** (get): No write_lock needed
///   - MemTable uses internal RwLock (many concurrent readers)
///   - SSTable readers use interior mutability, so storage lookups share a
///     read lock
///
/// - **Scans**: Snapshot taken under `write_lock`, then read without locks
///   - MemTable snapshot is an `Arc` of the map; writers copy on write
///   - SSTable list is a clone of `Arc` readers
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Directory for all data files (SSTables)
    storage_dir: PathBuf,

    /// Write-ahead log for durability (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// In-memory table for recent writes (internal RwLock)
    memtable: MemTable,

    /// Persistent storage manager (internal RwLock on sstables vec)
    storage: StorageManager,

    /// Serializes write operations (put/delete/write/flush)
    write_lock: Mutex<()>,

    /// Cursors that still hold resources
    open_cursors: AtomicUsize,

    /// Exclusive lock on `{data_dir}/LOCK`, released when dropped
    _dir_lock: File,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LOCK_FILENAME: &'static str = "LOCK";
    const WAL_FILENAME: &'static str = "wal.log";
    const SSTABLE_DIR: &'static str = "sstables";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config, create data directory if allowed
    /// 2. Take the directory lock
    /// 3. Load existing SSTables
    /// 4. Recover from WAL if it exists, flushing what it held
    /// 5. Compact if too many SSTables are left over
    /// 6. Ready to serve requests
    ///
    /// Every failure is reported as `KvlogError::Open` wrapping the cause.
    pub fn open(config: Config) -> Result<Self> {
        let data_dir = config.data_dir.clone();
        Self::open_inner(config).map_err(|e| KvlogError::open(data_dir, e))
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::with_data_dir(path))
    }

    fn open_inner(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Data directory
        let data_dir = &config.data_dir;
        let storage_dir = data_dir.join(Self::SSTABLE_DIR);
        let wal_path = data_dir.join(Self::WAL_FILENAME);

        if !data_dir.exists() {
            if !config.create_if_missing {
                return Err(KvlogError::Config(format!(
                    "{} does not exist and create_if_missing is off",
                    data_dir.display()
                )));
            }
        } else if config.error_if_exists && (wal_path.exists() || storage_dir.exists()) {
            return Err(KvlogError::Config(format!(
                "{} already holds a store and error_if_exists is on",
                data_dir.display()
            )));
        }
        fs::create_dir_all(data_dir)?;

        // Step 2: Exclusive access for this process
        let dir_lock = Self::acquire_lock(data_dir)?;

        // Step 3: Open storage manager (loads existing SSTables)
        let storage = StorageManager::open(&storage_dir, config.verify_checksums)?;

        // Step 4: Recover from WAL and flush to make it durable
        let memtable = MemTable::new();
        if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path)?;

            if recovery.entries_recovered > 0 || recovery.entries_corrupted > 0 {
                info!(
                    recovered = recovery.entries_recovered,
                    corrupted = recovery.entries_corrupted,
                    last_lsn = recovery.last_lsn,
                    "WAL recovery"
                );
            }

            let ops: Vec<Operation> = entries.into_iter().map(|e| e.operation).collect();
            memtable.apply(&ops);

            if !memtable.is_empty() {
                info!(entries = memtable.entry_count(), "flushing recovered entries to SSTable");
                storage.flush(&memtable)?;
                memtable.clear();
            }
        }

        // Recovered data is durable in SSTables; start the log empty
        let mut wal = WalWriter::open(&wal_path, config.wal_sync_strategy)?;
        wal.truncate()?;

        let engine = Self {
            config,
            storage_dir,
            wal: Mutex::new(wal),
            memtable,
            storage,
            write_lock: Mutex::new(()),
            open_cursors: AtomicUsize::new(0),
            _dir_lock: dir_lock,
        };
        engine.maybe_compact()?;

        info!(
            dir = %engine.config.data_dir.display(),
            sstables = engine.storage.sstable_count(),
            "store opened"
        );

        Ok(engine)
    }

    fn acquire_lock(data_dir: &Path) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(data_dir.join(Self::LOCK_FILENAME))?;

        match file.try_lock() {
            Ok(()) => Ok(file),
            Err(TryLockError::WouldBlock) => Err(KvlogError::Locked(data_dir.to_path_buf())),
            Err(TryLockError::Error(e)) => Err(e.into()),
        }
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. MemTable (most recent writes)
    /// 2. SSTables (newest to oldest)
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        // Step 1: Check MemTable first (most recent data)
        if let Some(entry) = self.memtable.get(key) {
            return match entry {
                MemTableEntry::Value(value) => Ok(Some(value)),
                MemTableEntry::Tombstone => Ok(None), // Key was deleted
            };
        }

        // Step 2: Check SSTables (newest to oldest) - StorageManager internally locks
        self.storage.get(key)
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Write to WAL (durability)
    /// 3. Write to MemTable
    /// 4. Check if flush needed
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.log_and_apply(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    /// Delete a key
    ///
    /// Writes a tombstone; deleting an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.log_and_apply(Operation::Delete { key: key.to_vec() })
    }

    /// Apply a batch atomically
    ///
    /// The batch is one WAL entry, so after a crash either all of it or none
    /// of it is recovered. Readers never observe part of it.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(ops = batch.len(), "applying write batch");
        self.log_and_apply(batch.into_operation())
    }

    fn log_and_apply(&self, operation: Operation) -> Result<()> {
        // Acquire write lock to serialize writes
        let _write_guard = self.write_lock.lock();

        // Step 1: Write to WAL first (durability guarantee)
        self.wal.lock().append(operation.clone())?;

        // Step 2: Write to MemTable
        let new_size = self.memtable.apply(std::slice::from_ref(&operation));

        // Step 3: Check if flush is needed
        if new_size >= self.config.memtable_size_limit {
            self.flush_internal()?;
        }

        Ok(())
    }

    /// Ordered cursor over the live keys in `range`
    ///
    /// The cursor sees the store as of this call; later writes are invisible
    /// to it. It borrows the engine, so the engine cannot be closed while a
    /// cursor is alive.
    pub fn scan(&self, range: ScanRange) -> Cursor<'_> {
        let (memtable, sstables) = {
            let _write_guard = self.write_lock.lock();
            (self.memtable.snapshot(), self.storage.snapshot())
        };

        Cursor::new(&range, memtable, sstables, &self.open_cursors)
    }

    /// Flush memtable to disk (public API)
    ///
    /// Forces a flush regardless of memtable size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.flush_internal()
    }

    /// Internal flush implementation (called with write lock held)
    fn flush_internal(&self) -> Result<()> {
        // Skip if memtable is empty
        if self.memtable.is_empty() {
            return Ok(());
        }

        // Step 1: Flush memtable to SSTable (StorageManager internally locks)
        self.storage.flush(&self.memtable)?;

        // Step 2: Clear memtable
        self.memtable.clear();

        // Step 3: Truncate WAL (entries are now durable in SSTable)
        self.wal.lock().truncate()?;

        // Step 4: Keep the table count bounded
        self.maybe_compact()
    }

    /// Merge every SSTable into one
    ///
    /// Runs on its own once `compaction_threshold` tables exist; calling it
    /// directly forces a merge. Scans already open keep reading the old
    /// tables, whose files go away when the last such scan finishes.
    pub fn compact(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.compact_internal()
    }

    /// Called with write lock held
    fn maybe_compact(&self) -> Result<()> {
        if self.storage.sstable_count() < self.config.compaction_threshold {
            return Ok(());
        }
        self.compact_internal()
    }

    /// Called with write lock held
    fn compact_internal(&self) -> Result<()> {
        let tables = self.storage.snapshot();
        if tables.len() < 2 {
            return Ok(());
        }

        // Same newest-wins merge as a scan, minus the memtable. The merge's
        // cursor is internal and not counted with the caller's.
        let live = AtomicUsize::new(0);
        let merged = Cursor::new(
            &ScanRange::all(),
            MemTableSnapshot::default(),
            tables.clone(),
            &live,
        );
        self.storage.compact(&tables, merged)?;

        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Flushes any pending data, syncs to disk and releases the directory lock
    pub fn close(self) -> Result<()> {
        self.flush()?;
        self.wal.lock().sync()?;

        info!(dir = %self.config.data_dir.display(), "store closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the storage directory path (where SSTables are stored)
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Get the current memtable size
    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.entry_count()
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.storage.sstable_count()
    }

    /// Number of cursors not yet exhausted or dropped
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
