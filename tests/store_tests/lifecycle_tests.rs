//! Lifecycle tests
//!
//! These tests verify:
//! - Close then reopen preserves data
//! - A second live handle on the same directory is refused
//! - Damaged logs fail open instead of dropping acknowledged writes
//! - The store is shareable across threads

use std::fs;
use std::sync::Arc;
use std::thread;

use kvlog::{Config, KvlogError, Store, WalSyncStrategy};
use tempfile::TempDir;

#[test]
fn test_close_and_reopen_preserves_data() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = Store::open(temp_dir.path()).unwrap();
        store.put("a", b"1").unwrap();
        store.put_batch([("b", "2"), ("c", "3")]).unwrap();
        store.delete("a").unwrap();
        store.close().unwrap();
    }

    let store = Store::open(temp_dir.path()).unwrap();
    assert!(store.get("a").unwrap_err().is_not_found());
    assert_eq!(store.get("b").unwrap(), b"2");
    assert_eq!(store.get("c").unwrap(), b"3");
    assert_eq!(store.path(), temp_dir.path());
}

#[test]
fn test_many_reopen_cycles() {
    let temp_dir = TempDir::new().unwrap();

    for round in 0..5 {
        let store = Store::open(temp_dir.path()).unwrap();
        assert_eq!(store.entries().count(), round);
        store.put(&format!("round{}", round), b"done").unwrap();
        store.close().unwrap();
    }
}

#[test]
fn test_hundreds_of_reopen_cycles_keep_table_count_bounded() {
    let temp_dir = TempDir::new().unwrap();
    let threshold = Config::default().compaction_threshold;

    for round in 0..300 {
        let store = Store::open(temp_dir.path()).unwrap();
        store.put(&format!("round{:03}", round), b"done").unwrap();
        if round % 2 == 1 {
            store.delete(&format!("round{:03}", round - 1)).unwrap();
        }
        assert!(store.engine().sstable_count() < threshold);
        store.close().unwrap();
    }

    let store = Store::open(temp_dir.path()).unwrap();
    assert_eq!(store.entries().count(), 150);
    assert_eq!(store.get("round299").unwrap(), b"done");
    assert!(store.get("round298").unwrap_err().is_not_found());

    let tables = fs::read_dir(temp_dir.path().join("sstables")).unwrap().count();
    assert!(tables < threshold);
}

#[test]
fn test_second_open_fails_while_first_is_live() {
    let temp_dir = TempDir::new().unwrap();
    let first = Store::open(temp_dir.path()).unwrap();

    let err = Store::open(temp_dir.path()).err().unwrap();
    assert!(!err.is_not_found());
    match &err {
        KvlogError::Open { source, .. } => assert!(matches!(**source, KvlogError::Locked(_))),
        other => panic!("expected open error, got {other:?}"),
    }

    first.close().unwrap();
    Store::open(temp_dir.path()).unwrap().close().unwrap();
}

#[test]
fn test_unflushed_writes_survive_drop_without_close() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = Store::open(temp_dir.path()).unwrap();
        store.put("k1", b"v1").unwrap();
        store.put_batch([("k2", "v2"), ("k3", "v3")]).unwrap();
    }

    let store = Store::open(temp_dir.path()).unwrap();
    assert_eq!(store.get("k1").unwrap(), b"v1");
    assert_eq!(store.get("k3").unwrap(), b"v3");
}

#[test]
fn test_corrupt_wal_entry_before_later_writes_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = Store::open(temp_dir.path()).unwrap();
        store.put("k1", b"v1").unwrap();
        store.put("k2", b"v2").unwrap();
        store.put("k3", b"v3").unwrap();
    }

    // Frame: LSN (8) | CRC (4) | LEN (4) | DATA
    let wal_path = temp_dir.path().join("wal.log");
    let mut bytes = fs::read(&wal_path).unwrap();
    let frame_len = |at: usize| {
        let len: [u8; 4] = bytes[at + 12..at + 16].try_into().unwrap();
        16 + u32::from_le_bytes(len) as usize
    };
    let second = frame_len(0);
    let third = second + frame_len(second);
    assert!(third < bytes.len());
    bytes[third - 1] ^= 0xFF;
    fs::write(&wal_path, &bytes).unwrap();

    // Fails the same way every time: nothing was cut away and the lock is free
    for _ in 0..2 {
        match Store::open(temp_dir.path()).err().unwrap() {
            KvlogError::Open { source, .. } => {
                assert!(matches!(*source, KvlogError::WalCorruption(_)))
            }
            other => panic!("expected open error, got {other:?}"),
        }
        assert_eq!(fs::read(&wal_path).unwrap(), bytes);
    }
}

#[test]
fn test_open_error_reports_path() {
    let temp_dir = TempDir::new().unwrap();
    let _first = Store::open(temp_dir.path()).unwrap();

    let message = Store::open(temp_dir.path()).err().unwrap().to_string();
    assert!(message.contains(&temp_dir.path().display().to_string()));
}

#[test]
fn test_open_with_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 8 })
        .memtable_size_limit(256)
        .build();

    let store = Store::open_with_config(config).unwrap();
    for i in 0..40 {
        store.put(&format!("key{:02}", i), &[i as u8; 16]).unwrap();
    }

    assert!(store.engine().sstable_count() > 0);
    assert_eq!(store.entries().count(), 40);
    store.close().unwrap();
}

#[test]
fn test_concurrent_use_from_threads() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(temp_dir.path()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    let key = format!("t{}:{:02}", t, i);
                    if i % 5 == 0 {
                        store.put_batch([(key.clone(), b"batched".to_vec())]).unwrap();
                    } else {
                        store.put(&key, b"single").unwrap();
                    }
                    assert!(store.get(&key).is_ok());
                    let _ = store.entries_with_prefix(&format!("t{}:", t)).count();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.entries().count(), 100);
    assert_eq!(store.open_cursors(), 0);

    let store = Arc::into_inner(store).unwrap();
    store.close().unwrap();
}
