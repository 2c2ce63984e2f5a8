//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use bytes::Buf;

use crate::error::{KvlogError, Result};

use super::{WalEntry, HEADER_SIZE};

/// Outcome of reading one frame
#[derive(Debug)]
pub(super) enum Frame {
    /// A complete, checksummed entry
    Entry(WalEntry),
    /// Clean end of file
    End,
    /// File ends mid-frame (crash during append)
    Torn,
    /// Complete frame whose checksum or payload is bad
    Corrupt {
        reason: String,
        /// The frame ends exactly at end of file
        at_tail: bool,
    },
}

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Byte offset just past the last valid frame
    position: u64,
    file_len: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
        })
    }

    /// Read the next entry from the WAL
    ///
    /// A torn tail reads as end of log; a checksum failure is an error.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        match self.read_frame()? {
            Frame::Entry(entry) => Ok(Some(entry)),
            Frame::End | Frame::Torn => Ok(None),
            Frame::Corrupt { reason, .. } => Err(KvlogError::WalCorruption(reason)),
        }
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// Offset of the end of the last frame read successfully
    pub fn valid_offset(&self) -> u64 {
        self.position
    }

    pub(super) fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(Frame::End),
            n if n < HEADER_SIZE => return Ok(Frame::Torn),
            _ => {}
        }

        let mut cursor = &header[..];
        let lsn = cursor.get_u64_le();
        let crc = cursor.get_u32_le();
        let len = cursor.get_u32_le() as usize;

        // A length running past EOF is a torn append, not a reason to allocate
        if self.position + (HEADER_SIZE + len) as u64 > self.file_len {
            return Ok(Frame::Torn);
        }

        let mut data = vec![0u8; len];
        if read_full(&mut self.reader, &mut data)? < len {
            return Ok(Frame::Torn);
        }

        let frame_end = self.position + (HEADER_SIZE + len) as u64;
        match WalEntry::decode_frame(lsn, crc, &data) {
            Ok(entry) => {
                self.position = frame_end;
                Ok(Frame::Entry(entry))
            }
            Err(KvlogError::WalCorruption(reason)) => Ok(Frame::Corrupt {
                reason,
                at_tail: frame_end == self.file_len,
            }),
            Err(e) => Err(e),
        }
    }
}

/// Fill `buf` as far as the file allows, returning the bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Iterator over WAL entries
///
/// Stops after the first error.
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
