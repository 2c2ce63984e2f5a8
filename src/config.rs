//! Configuration for kvlog
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{KvlogError, Result};

/// Main configuration for a kvlog store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (lock, WAL, SSTables)
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── LOCK             (held exclusively while open)
    ///     ├── wal.log          (write-ahead log)
    ///     └── sstables/        (SSTable files)
    pub data_dir: PathBuf,

    /// Create `data_dir` when it does not exist yet
    pub create_if_missing: bool,

    /// Refuse to open a directory that already holds a store
    pub error_if_exists: bool,

    /// Verify SSTable data checksums when opening them
    pub verify_checksums: bool,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Merge all SSTables into one once this many exist
    pub compaction_threshold: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./kvlog_data"),
            create_if_missing: true,
            error_if_exists: false,
            verify_checksums: false,
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            compaction_threshold: 8,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Default config rooted at `path`
    pub fn with_data_dir(path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: path.into(),
            ..Self::default()
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.memtable_size_limit == 0 {
            return Err(KvlogError::Config(
                "memtable_size_limit must be greater than zero".to_string(),
            ));
        }
        if self.compaction_threshold < 2 {
            return Err(KvlogError::Config(
                "compaction_threshold must be at least 2".to_string(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(KvlogError::Config(
                "EveryNEntries count must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.config.create_if_missing = create;
        self
    }

    pub fn error_if_exists(mut self, error: bool) -> Self {
        self.config.error_if_exists = error;
        self
    }

    /// Verify SSTable checksums on open (slower startup)
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.config.verify_checksums = verify;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set how many SSTables trigger a full merge
    pub fn compaction_threshold(mut self, tables: usize) -> Self {
        self.config.compaction_threshold = tables;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
