//! SSTable Iterator
//!
//! Sequential iteration over a key range of an SSTable.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::Result;

use super::reader::SSTableReader;
use super::{corrupt, split_body, EntryHeader, ENTRY_HEADER_SIZE};

/// Iterator over SSTable entries in sorted key order
///
/// Owns its file handle, which is opened on the first call to `next` and
/// closed when the iterator finishes or is dropped. Holds its table alive
/// until then. Fused after the first error.
pub struct SSTableIterator {
    table: Arc<SSTableReader>,
    file: Option<BufReader<File>>,
    /// Offset of the first entry to return
    start_offset: u64,
    /// Start of the index block
    end_offset: u64,
    current_offset: u64,
    /// Exclusive upper key bound
    upper: Option<Vec<u8>>,
    done: bool,
}

impl SSTableIterator {
    pub(super) fn new(
        table: Arc<SSTableReader>,
        start_offset: u64,
        end_offset: u64,
        upper: Option<Vec<u8>>,
    ) -> Self {
        Self {
            table,
            file: None,
            start_offset,
            end_offset,
            current_offset: start_offset,
            upper,
            done: start_offset >= end_offset,
        }
    }

    fn read_entry(&mut self) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let path = self.table.path();
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => {
                let mut file = BufReader::new(File::open(path)?);
                file.seek(SeekFrom::Start(self.start_offset))?;
                self.file.insert(file)
            }
        };

        let mut header = [0u8; ENTRY_HEADER_SIZE];
        file.read_exact(&mut header)?;
        let header = EntryHeader::decode(&header);

        let entry_end = self.current_offset + ENTRY_HEADER_SIZE as u64 + header.body_len();
        if entry_end > self.end_offset {
            return Err(corrupt(
                path,
                format!("entry at {} runs past the data block", self.current_offset),
            ));
        }

        let mut body = vec![0u8; header.body_len() as usize];
        file.read_exact(&mut body)?;
        header
            .verify(&body)
            .map_err(|reason| corrupt(path, format!("{} at offset {}", reason, self.current_offset)))?;

        self.current_offset = entry_end;
        Ok(split_body(&header, body))
    }

    fn finish(&mut self) {
        self.done = true;
        self.file = None;
    }
}

impl Iterator for SSTableIterator {
    /// (key, Option<value>) — None value means tombstone
    type Item = Result<(Vec<u8>, Option<Vec<u8>>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.current_offset >= self.end_offset {
            self.finish();
            return None;
        }

        match self.read_entry() {
            Ok((key, _)) if self.upper.as_ref().is_some_and(|upper| &key >= upper) => {
                self.finish();
                None
            }
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}
