//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::warn;

use crate::error::{KvlogError, Result};

use super::reader::Frame;
use super::{WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries skipped
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the WAL had (or, for `recover`, lost) bytes past the last valid entry
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Stop at a torn final frame, or a corrupt frame that ends the file
    ///    (an append interrupted before it was synced)
    /// 3. Truncate the file after the last valid entry
    /// 4. Return all valid entries in order
    ///
    /// A corrupt frame with more log after it means acknowledged writes would
    /// be lost, so it fails with `KvlogError::WalCorruption` and the file is
    /// left untouched.
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let (entries, result, valid_offset) = Self::scan(path, true)?;

        if result.was_truncated {
            warn!(
                path = %path.display(),
                valid_offset,
                corrupted = result.entries_corrupted,
                "truncating WAL after last valid entry"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_offset)?;
            file.sync_all()?;
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    ///
    /// Corruption anywhere is counted in `entries_corrupted` rather than
    /// returned as an error.
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, result, _) = Self::scan(path, false)?;
        Ok(result)
    }

    fn scan(path: &Path, recovering: bool) -> Result<(Vec<WalEntry>, RecoveryResult, u64)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.read_frame()? {
                Frame::Entry(entry) => {
                    result.entries_recovered += 1;
                    result.last_lsn = entry.lsn;
                    if recovering {
                        entries.push(entry);
                    }
                }
                Frame::End => break,
                Frame::Torn => {
                    result.was_truncated = true;
                    break;
                }
                Frame::Corrupt { reason, at_tail } => {
                    if recovering && !at_tail {
                        return Err(KvlogError::WalCorruption(format!(
                            "{} at offset {} in {}, followed by more log data",
                            reason,
                            reader.valid_offset(),
                            path.display()
                        )));
                    }
                    warn!(path = %path.display(), %reason, at_tail, "corrupted WAL entry");
                    result.entries_corrupted += 1;
                    result.was_truncated = true;
                    break;
                }
            }
        }

        Ok((entries, result, reader.valid_offset()))
    }
}
