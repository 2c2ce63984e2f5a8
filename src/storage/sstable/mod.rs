//! SSTable Module
//!
//! Immutable, sorted on-disk tables. Every entry carries its own CRC, so a
//! damaged byte surfaces as an error on the read that touches it.
//!
//! ## File Format (version 2)
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                            │
//! │   Magic "KVLG" (4) | Version u16 (2) | EntryCount u64 (8)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Data Block, ascending key order                              │
//! │   [CRC u32][KeyLen u32][ValLen u32][Key][Value]              │
//! │   CRC covers KeyLen..Value; ValLen = u32::MAX is a tombstone │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Index Block                                                  │
//! │   [KeyLen u32][Offset u64][Key]                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer (24 bytes)                                            │
//! │   IndexOffset u64 | CompactedThrough u64                     │
//! │   IndexCRC u32    | DataCRC u32                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `CompactedThrough` is the highest table ID merged into this one (0 for a
//! plain flush). Tables at or below it are stale leftovers of an interrupted
//! compaction.

mod builder;
mod iterator;
mod reader;

use std::path::PathBuf;

use bytes::{Buf, BufMut};

use crate::error::KvlogError;

pub use builder::SSTableBuilder;
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

pub(crate) const MAGIC: &[u8; 4] = b"KVLG";
pub(crate) const VERSION: u16 = 2;

pub(crate) const HEADER_SIZE: u64 = 14;
pub(crate) const FOOTER_SIZE: u64 = 24;

/// CRC (4) + KeyLen (4) + ValLen (4)
pub(crate) const ENTRY_HEADER_SIZE: usize = 12;

pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Summary of a finished SSTable, returned by `SSTableBuilder::finish`
#[derive(Debug, Clone)]
pub struct SSTable {
    pub path: PathBuf,
    /// Tombstones included
    pub entry_count: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub file_size: u64,
}

impl SSTable {
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// False only when `key` is outside `[min_key, max_key]`
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.entry_count > 0 && key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }
}

// =============================================================================
// Entry Framing (shared by builder, reader and iterator)
// =============================================================================

/// Decoded fixed part of a data-block entry
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryHeader {
    pub crc: u32,
    pub key_len: u32,
    pub val_len: u32,
}

impl EntryHeader {
    pub fn decode(bytes: &[u8; ENTRY_HEADER_SIZE]) -> Self {
        let mut fields = &bytes[..];
        Self {
            crc: fields.get_u32_le(),
            key_len: fields.get_u32_le(),
            val_len: fields.get_u32_le(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.val_len == TOMBSTONE_MARKER
    }

    /// Bytes after the header: key plus value
    pub fn body_len(&self) -> u64 {
        let value = if self.is_tombstone() { 0 } else { u64::from(self.val_len) };
        u64::from(self.key_len) + value
    }

    /// Check `body` (key then value) against the stored CRC
    pub fn verify(&self, body: &[u8]) -> std::result::Result<(), String> {
        let computed = entry_crc(self.key_len, self.val_len, &[body]);
        if computed == self.crc {
            Ok(())
        } else {
            Err(format!(
                "entry CRC mismatch: stored {:#010x}, computed {:#010x}",
                self.crc, computed
            ))
        }
    }
}

/// Append one framed entry to `buf`
pub(crate) fn encode_entry(buf: &mut impl BufMut, key: &[u8], value: Option<&[u8]>) {
    let key_len = key.len() as u32;
    let val_len = value.map_or(TOMBSTONE_MARKER, |v| v.len() as u32);

    buf.put_u32_le(entry_crc(key_len, val_len, &[key, value.unwrap_or_default()]));
    buf.put_u32_le(key_len);
    buf.put_u32_le(val_len);
    buf.put_slice(key);
    if let Some(v) = value {
        buf.put_slice(v);
    }
}

fn entry_crc(key_len: u32, val_len: u32, body: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&key_len.to_le_bytes());
    hasher.update(&val_len.to_le_bytes());
    for part in body {
        hasher.update(part);
    }
    hasher.finalize()
}

pub(crate) fn corrupt(path: &std::path::Path, reason: impl std::fmt::Display) -> KvlogError {
    KvlogError::Storage(format!("Corrupt SSTable {}: {}", path.display(), reason))
}

/// Split a verified entry body into key and value
pub(crate) fn split_body(header: &EntryHeader, mut body: Vec<u8>) -> (Vec<u8>, Option<Vec<u8>>) {
    let value = body.split_off(header.key_len as usize);
    (body, (!header.is_tombstone()).then_some(value))
}
