//! SSTable Builder
//!
//! Writes sorted key-value entries to a new SSTable file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};

use crate::error::{KvlogError, Result};

use super::{encode_entry, SSTable, ENTRY_HEADER_SIZE, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Builder for creating new SSTables from sorted entries
///
/// The file is written under a temporary name and renamed into place by
/// `finish`, so a crash mid-build never leaves a half-written table that
/// `StorageManager::open` would pick up.
pub struct SSTableBuilder {
    /// Final file path
    path: PathBuf,
    /// Path written to until `finish`
    tmp_path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Reused scratch buffer for one encoded entry
    scratch: BytesMut,
    /// Number of entries written
    entry_count: u64,
    /// Current write position (for index)
    current_offset: u64,
    /// Index: key → file offset of entry
    index: Vec<(Vec<u8>, u64)>,
    /// Running CRC hasher for data section
    data_hasher: crc32fast::Hasher,
    /// Highest table ID this one replaces (0 = none)
    compacted_through: u64,
}

impl SSTableBuilder {
    /// Create a new SSTable builder
    ///
    /// Writes header immediately; call `add()`/`add_tombstone()` in sorted order,
    /// then `finish()` to write index and footer.
    pub fn new(path: &Path) -> Result<Self> {
        let tmp_path = path.with_extension("sst.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut writer = BufWriter::new(file);

        // Entry count is patched in by finish()
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer,
            scratch: BytesMut::new(),
            entry_count: 0,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            data_hasher: crc32fast::Hasher::new(),
            compacted_through: 0,
        })
    }

    /// Mark this table as the merge of every table with ID `<= id`
    pub fn compacted_through(mut self, id: u64) -> Self {
        self.compacted_through = id;
        self
    }

    /// Add a key-value pair (must be called in sorted key order)
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_entry(key, Some(value))
    }

    /// Add a tombstone (must be called in sorted key order)
    pub fn add_tombstone(&mut self, key: &[u8]) -> Result<()> {
        self.write_entry(key, None)
    }

    fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if let Some((last, _)) = self.index.last() {
            if key <= last.as_slice() {
                return Err(KvlogError::Storage(format!(
                    "SSTable keys out of order: {:?} after {:?}",
                    key, last
                )));
            }
        }

        if let Some(v) = value.filter(|v| v.len() >= TOMBSTONE_MARKER as usize) {
            return Err(KvlogError::Storage(format!(
                "value of {} bytes is too large for an SSTable entry",
                v.len()
            )));
        }

        self.scratch.clear();
        self.scratch.reserve(ENTRY_HEADER_SIZE + key.len() + value.map_or(0, <[u8]>::len));
        encode_entry(&mut self.scratch, key, value);

        self.writer.write_all(&self.scratch)?;
        self.data_hasher.update(&self.scratch);

        self.index.push((key.to_vec(), self.current_offset));
        self.current_offset += self.scratch.len() as u64;
        self.entry_count += 1;

        Ok(())
    }

    /// Finish building: write index block, footer, and return metadata
    pub fn finish(mut self) -> Result<SSTable> {
        let index_offset = self.current_offset;

        let mut index_block = BytesMut::new();
        for (key, offset) in &self.index {
            index_block.put_u32_le(key.len() as u32);
            index_block.put_u64_le(*offset);
            index_block.put_slice(key);
        }
        self.writer.write_all(&index_block)?;

        let mut footer = BytesMut::with_capacity(FOOTER_SIZE as usize);
        footer.put_u64_le(index_offset);
        footer.put_u64_le(self.compacted_through);
        footer.put_u32_le(crc32fast::hash(&index_block));
        footer.put_u32_le(self.data_hasher.finalize());
        self.writer.write_all(&footer)?;
        self.writer.flush()?;

        let mut file = self.writer.into_inner().map_err(|e| {
            KvlogError::Storage(format!("Failed to flush SSTable: {}", e))
        })?;
        file.seek(SeekFrom::Start(6))?; // After magic + version
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();
        drop(file);

        std::fs::rename(&self.tmp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            File::open(dir)?.sync_all()?;
        }

        let min_key = self.index.first().map(|(k, _)| k.clone()).unwrap_or_default();
        let max_key = self.index.last().map(|(k, _)| k.clone()).unwrap_or_default();

        Ok(SSTable {
            path: self.path,
            entry_count: self.entry_count,
            min_key,
            max_key,
            file_size,
        })
    }
}
