//! SSTable Reader
//!
//! Opens SSTable files and provides O(log n) key lookups via in-memory index.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Buf;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{KvlogError, Result};

use super::iterator::SSTableIterator;
use super::{
    corrupt, split_body, EntryHeader, ENTRY_HEADER_SIZE, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION,
};

/// Reader for SSTable files with in-memory index for O(log n) lookups
///
/// Point lookups share one file handle behind a mutex, so `get` takes `&self`
/// and many readers can hold the table at once. Range iterators open their
/// own handle and keep the reader alive through an `Arc`.
///
/// A reader marked obsolete deletes its file once the last `Arc` to it is
/// dropped, so scans that started before a compaction finish undisturbed.
pub struct SSTableReader {
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    /// key → file offset
    index: BTreeMap<Vec<u8>, u64>,
    entry_count: u64,
    /// End of the data block
    index_offset: u64,
    compacted_through: u64,
    obsolete: AtomicBool,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Loads the index into memory and checks it against its CRC. With
    /// `verify_checksum`, the whole data block is also read once and checked
    /// against the footer; without it, entries are still checked one by one
    /// as they are read.
    pub fn open(path: &Path, verify_checksum: bool) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt(path, format!("file too small ({} bytes)", file_size)));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(corrupt(path, format!("invalid magic {:?}", &header[0..4])));
        }

        let mut fields = &header[4..];
        let version = fields.get_u16_le();
        if version != VERSION {
            return Err(KvlogError::Storage(format!(
                "Unsupported SSTable version {} in {}",
                version,
                path.display()
            )));
        }
        let entry_count = fields.get_u64_le();

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let mut fields = &footer[..];
        let index_offset = fields.get_u64_le();
        let compacted_through = fields.get_u64_le();
        let index_crc = fields.get_u32_le();
        let data_crc = fields.get_u32_le();

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(corrupt(path, format!("index offset {} out of bounds", index_offset)));
        }

        if verify_checksum {
            file.seek(SeekFrom::Start(HEADER_SIZE))?;
            let computed = crc_of(&mut file, index_offset - HEADER_SIZE)?;
            if computed != data_crc {
                return Err(corrupt(
                    path,
                    format!("data CRC mismatch: stored {:#010x}, computed {:#010x}", data_crc, computed),
                ));
            }
        }

        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_data = vec![0u8; (file_size - FOOTER_SIZE - index_offset) as usize];
        file.read_exact(&mut index_data)?;

        if crc32fast::hash(&index_data) != index_crc {
            return Err(corrupt(path, "index CRC mismatch"));
        }

        let mut index = BTreeMap::new();
        let mut remaining = &index_data[..];
        while remaining.has_remaining() {
            if remaining.remaining() < 12 {
                return Err(corrupt(path, "truncated index entry"));
            }
            let key_len = remaining.get_u32_le() as usize;
            let offset = remaining.get_u64_le();
            if remaining.remaining() < key_len || offset >= index_offset {
                return Err(corrupt(path, "malformed index entry"));
            }
            index.insert(remaining[..key_len].to_vec(), offset);
            remaining.advance(key_len);
        }

        if index.len() as u64 != entry_count {
            return Err(corrupt(
                path,
                format!("header counts {} entries, index holds {}", entry_count, index.len()),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            entry_count,
            index_offset,
            compacted_through,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Get a value by key — O(log n) lookup via in-memory index
    ///
    /// Returns:
    /// - `Ok(Some(value))` — key found with value
    /// - `Ok(None)` — key found but is a tombstone (deleted)
    /// - `Err(KeyNotFound)` — key not in this SSTable
    /// - `Err(Storage)` — the entry on disk fails its CRC
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Err(KvlogError::KeyNotFound),
        };

        let (header, body) = {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;

            let mut header = [0u8; ENTRY_HEADER_SIZE];
            file.read_exact(&mut header)?;
            let header = EntryHeader::decode(&header);

            if offset + ENTRY_HEADER_SIZE as u64 + header.body_len() > self.index_offset {
                return Err(corrupt(&self.path, format!("entry at {} runs past the data block", offset)));
            }
            let mut body = vec![0u8; header.body_len() as usize];
            file.read_exact(&mut body)?;
            (header, body)
        };

        header
            .verify(&body)
            .map_err(|reason| corrupt(&self.path, format!("{} at offset {}", reason, offset)))?;

        let (stored_key, value) = split_body(&header, body);
        if stored_key != key {
            return Err(corrupt(&self.path, format!("index points at the wrong entry for offset {}", offset)));
        }

        Ok(value)
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.keys().next_back().map(|k| k.as_slice())
    }

    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false,
        }
    }

    /// Check whether `[start, end)` can overlap this table's keys
    pub fn overlaps(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => {
                start.map_or(true, |s| s <= max) && end.map_or(true, |e| e > min)
            }
            _ => false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest table ID merged into this one; 0 for a plain flush
    pub fn compacted_through(&self) -> u64 {
        self.compacted_through
    }

    /// Delete the file once the last handle to this reader is gone
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    /// Iterate over all entries, tombstones included
    pub fn iter(self: &Arc<Self>) -> SSTableIterator {
        self.range_iter(None, None)
    }

    /// Iterate over entries with keys in `[start, end)`
    ///
    /// The iterator opens its own file handle on first use.
    pub fn range_iter(self: &Arc<Self>, start: Option<&[u8]>, end: Option<&[u8]>) -> SSTableIterator {
        let first_offset = match start {
            Some(s) => self
                .index
                .range::<[u8], _>((Bound::Included(s), Bound::Unbounded))
                .next()
                .map(|(_, &off)| off),
            None => self.index.values().next().copied(),
        };

        SSTableIterator::new(
            Arc::clone(self),
            first_offset.unwrap_or(self.index_offset),
            self.index_offset,
            end.map(<[u8]>::to_vec),
        )
    }
}

impl Drop for SSTableReader {
    fn drop(&mut self) {
        if !self.obsolete.load(Ordering::Acquire) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed obsolete SSTable"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove obsolete SSTable"),
        }
    }
}

fn crc_of(file: &mut File, len: u64) -> Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    let mut remaining = len;
    let mut buf = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        file.read_exact(&mut buf[..chunk])?;
        hasher.update(&buf[..chunk]);
        remaining -= chunk as u64;
    }
    Ok(hasher.finalize())
}
