//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their framing.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{KvlogError, Result};

/// Frame header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Several operations logged as one frame, replayed all-or-nothing
    Batch { ops: Vec<Operation> },
}

impl Operation {
    /// Number of key-level operations this carries
    pub fn op_count(&self) -> usize {
        match self {
            Operation::Put { .. } | Operation::Delete { .. } => 1,
            Operation::Batch { ops } => ops.iter().map(Operation::op_count).sum(),
        }
    }
}

/// Payload serialized with bincode (everything except the LSN)
#[derive(Deserialize)]
struct Payload {
    operation: Operation,
    timestamp: u64,
}

/// Borrowed twin of `Payload`; bincode encodes both identically
#[derive(Serialize)]
struct PayloadRef<'a> {
    operation: &'a Operation,
    timestamp: u64,
}

impl WalEntry {
    /// Create an entry stamped with the current wall-clock time
    pub fn new(lsn: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            lsn,
            operation,
            timestamp,
        }
    }

    /// Encode into an on-disk frame: `[lsn][crc][len][data]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let data = self.encode_payload()?;
        let crc = Self::checksum(self.lsn, &data)?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len());
        buf.put_u64_le(self.lsn);
        buf.put_u32_le(crc);
        buf.put_u32_le(data.len() as u32);
        buf.put_slice(&data);

        Ok(buf.to_vec())
    }

    /// Decode a frame, validating length and CRC
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(KvlogError::WalCorruption(format!(
                "frame too short: {} bytes",
                bytes.len()
            )));
        }

        let mut header = &bytes[..HEADER_SIZE];
        let lsn = header.get_u64_le();
        let stored_crc = header.get_u32_le();
        let len = header.get_u32_le() as usize;

        let data = bytes.get(HEADER_SIZE..HEADER_SIZE + len).ok_or_else(|| {
            KvlogError::WalCorruption(format!(
                "frame truncated: expected {} data bytes, got {}",
                len,
                bytes.len() - HEADER_SIZE
            ))
        })?;

        Self::decode_frame(lsn, stored_crc, data)
    }

    /// Build an entry from an already split frame
    pub(super) fn decode_frame(lsn: u64, stored_crc: u32, data: &[u8]) -> Result<Self> {
        let computed = Self::checksum(lsn, data)?;
        if computed != stored_crc {
            return Err(KvlogError::WalCorruption(format!(
                "CRC mismatch at lsn {}: stored {:#010x}, computed {:#010x}",
                lsn, stored_crc, computed
            )));
        }

        let payload: Payload = bincode::deserialize(data)
            .map_err(|e| KvlogError::WalCorruption(format!("undecodable payload: {}", e)))?;

        Ok(Self {
            lsn,
            operation: payload.operation,
            timestamp: payload.timestamp,
        })
    }

    /// CRC32 over LSN, length and payload
    pub fn compute_crc(&self) -> Result<u32> {
        let data = self.encode_payload()?;
        Self::checksum(self.lsn, &data)
    }

    /// Size of the frame `serialize` produces
    pub fn serialized_size(&self) -> Result<usize> {
        Ok(HEADER_SIZE + bincode::serialized_size(&self.payload())? as usize)
    }

    fn payload(&self) -> PayloadRef<'_> {
        PayloadRef {
            operation: &self.operation,
            timestamp: self.timestamp,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.payload())?)
    }

    fn checksum(lsn: u64, data: &[u8]) -> Result<u32> {
        let len = u32::try_from(data.len()).map_err(|_| {
            KvlogError::WalWrite(format!("entry of {} bytes exceeds frame limit", data.len()))
        })?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(&len.to_le_bytes());
        hasher.update(data);
        Ok(hasher.finalize())
    }
}
