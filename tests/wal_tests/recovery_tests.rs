//! Tests for WAL Recovery
//!
//! These tests verify:
//! - Clean logs recover every entry
//! - Torn and corrupt tails are cut off on disk
//! - Corruption followed by more log is an error, never a silent cut
//! - verify() reports without modifying the file

use std::fs::{self, OpenOptions};
use std::io::Write;

use kvlog::wal::{Operation, RecoveryResult, WalEntry, WalRecovery};
use kvlog::KvlogError;

use super::{del, put, setup_temp_wal, write_frames};

#[test]
fn test_recover_clean_log() {
    let (_temp, wal_path) = setup_temp_wal();
    let entries = vec![
        WalEntry::new(1, put("a", "1")),
        WalEntry::new(2, del("a")),
        WalEntry::new(3, put("b", "2")),
    ];
    write_frames(&wal_path, &entries);

    let (recovered, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(recovered, entries);
    assert_eq!(
        result,
        RecoveryResult {
            entries_recovered: 3,
            entries_corrupted: 0,
            last_lsn: 3,
            was_truncated: false,
        }
    );
}

#[test]
fn test_recover_empty_log() {
    let (_temp, wal_path) = setup_temp_wal();
    fs::File::create(&wal_path).unwrap();

    let (recovered, result) = WalRecovery::recover(&wal_path).unwrap();
    assert!(recovered.is_empty());
    assert_eq!(result, RecoveryResult::default());
}

#[test]
fn test_torn_batch_is_dropped_whole() {
    let (_temp, wal_path) = setup_temp_wal();
    let first = WalEntry::new(1, put("solo", "1"));
    write_frames(&wal_path, &[first.clone()]);
    let good_len = fs::metadata(&wal_path).unwrap().len();

    let batch = WalEntry::new(
        2,
        Operation::Batch {
            ops: vec![put("x", "1"), put("y", "2"), put("z", "3")],
        },
    )
    .serialize()
    .unwrap();
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&batch[..batch.len() / 2]).unwrap();

    let (recovered, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(recovered, vec![first]);
    assert!(result.was_truncated);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), good_len);
}

#[test]
fn test_corrupt_tail_counted_and_truncated() {
    let (_temp, wal_path) = setup_temp_wal();
    write_frames(
        &wal_path,
        &[WalEntry::new(1, put("a", "1")), WalEntry::new(2, put("b", "2"))],
    );
    let good_len = fs::metadata(&wal_path).unwrap().len();

    let mut bad = WalEntry::new(3, put("c", "3")).serialize().unwrap();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&bad).unwrap();
    drop(file);

    let (recovered, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(recovered.len(), 2);
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(result.last_lsn, 2);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), good_len);

    // Second pass sees a clean log
    let (_, again) = WalRecovery::recover(&wal_path).unwrap();
    assert!(!again.was_truncated);
    assert_eq!(again.entries_recovered, 2);
}

#[test]
fn test_verify_does_not_modify() {
    let (_temp, wal_path) = setup_temp_wal();
    write_frames(&wal_path, &[WalEntry::new(1, put("a", "1"))]);
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();
    drop(file);
    let len_before = fs::metadata(&wal_path).unwrap().len();

    let result = WalRecovery::verify(&wal_path).unwrap();

    assert_eq!(result.entries_recovered, 1);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), len_before);
}

#[test]
fn test_corrupt_middle_frame_fails_and_keeps_file() {
    let (_temp, wal_path) = setup_temp_wal();
    let frames: Vec<Vec<u8>> = [put("a", "1"), put("b", "2"), put("c", "3")]
        .into_iter()
        .enumerate()
        .map(|(i, op)| WalEntry::new(i as u64 + 1, op).serialize().unwrap())
        .collect();

    let mut bytes = frames.concat();
    let second_end = frames[0].len() + frames[1].len();
    bytes[second_end - 1] ^= 0xFF;
    fs::write(&wal_path, &bytes).unwrap();

    let err = WalRecovery::recover(&wal_path).unwrap_err();
    assert!(matches!(err, KvlogError::WalCorruption(_)));
    assert_eq!(fs::read(&wal_path).unwrap(), bytes);

    let report = WalRecovery::verify(&wal_path).unwrap();
    assert_eq!(report.entries_recovered, 1);
    assert_eq!(report.entries_corrupted, 1);
    assert_eq!(report.last_lsn, 1);
}
