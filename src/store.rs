//! Store facade
//!
//! String-keyed front door over the engine: point operations, atomic batches
//! and lazy ordered iteration. Absence of a key is reported as
//! `KvlogError::KeyNotFound`; every other failure passes through unchanged.

use std::path::Path;

use crate::batch::WriteBatch;
use crate::config::Config;
use crate::cursor::{Cursor, ScanRange};
use crate::engine::Engine;
use crate::error::{KvlogError, Result};

/// Handle to an open store
///
/// `Send + Sync`; share across threads with `Arc`. Closing consumes the
/// handle, and iterators borrow it, so a store cannot be closed while one of
/// its iterators is alive.
pub struct Store {
    engine: Engine,
}

impl Store {
    /// Open or create a store rooted at `path`
    ///
    /// Fails with `KvlogError::Open` if the directory is locked by another
    /// handle, holds corrupt data, or cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(Config::with_data_dir(path.as_ref()))
    }

    /// Open with explicit configuration
    pub fn open_with_config(config: Config) -> Result<Self> {
        Ok(Self {
            engine: Engine::open(config)?,
        })
    }

    /// Flush, sync and release the directory lock
    pub fn close(self) -> Result<()> {
        self.engine.close()
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.engine.put(key.as_bytes(), value)
    }

    /// Current value of `key`, or `KvlogError::KeyNotFound`
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.engine
            .get(key.as_bytes())?
            .ok_or(KvlogError::KeyNotFound)
    }

    /// Remove `key`; absent keys are not an error
    pub fn delete(&self, key: &str) -> Result<()> {
        self.engine.delete(key.as_bytes())
    }

    /// Store every pair as one atomic write
    ///
    /// Pairs are applied in iteration order, so a repeated key keeps its last
    /// value. An empty input writes nothing.
    pub fn put_batch<I, K, V>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let batch: WriteBatch = entries
            .into_iter()
            .map(|(k, v)| (k.as_ref().as_bytes().to_vec(), v.as_ref().to_vec()))
            .collect();
        self.engine.write(batch)
    }

    /// Every entry in ascending key order
    pub fn entries(&self) -> Entries<'_> {
        Entries::new(self.engine.scan(ScanRange::all()))
    }

    /// Entries whose key starts with `prefix`
    pub fn entries_with_prefix(&self, prefix: &str) -> Entries<'_> {
        Entries::new(self.engine.scan(ScanRange::prefix(prefix.as_bytes())))
    }

    /// Entries with `start <= key < end`; empty when `start >= end`
    pub fn entries_between(&self, start: &str, end: &str) -> Entries<'_> {
        Entries::new(
            self.engine
                .scan(ScanRange::between(start.as_bytes(), end.as_bytes())),
        )
    }

    /// Persist the memtable now instead of waiting for the size limit
    pub fn flush(&self) -> Result<()> {
        self.engine.flush()
    }

    pub fn path(&self) -> &Path {
        self.engine.data_dir()
    }

    /// Iterators that have not been exhausted or dropped yet
    pub fn open_cursors(&self) -> usize {
        self.engine.open_cursors()
    }

    /// The underlying engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// Lazy ordered `(key, value)` sequence from a `Store`
///
/// Dropping it early releases the underlying cursor.
pub struct Entries<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Entries<'a> {
    fn new(cursor: Cursor<'a>) -> Self {
        Self { cursor }
    }
}

impl Iterator for Entries<'_> {
    type Item = Result<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = match self.cursor.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };

        Some(
            String::from_utf8(key)
                .map(|key| (key, value))
                .map_err(|e| KvlogError::InvalidKey(format!("key is not UTF-8: {}", e))),
        )
    }
}

impl std::iter::FusedIterator for Entries<'_> {}
