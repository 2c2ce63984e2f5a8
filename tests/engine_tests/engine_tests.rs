//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete operations
//! - Flush to SSTable
//! - Crash recovery from WAL
//! - Directory locking and open options
//! - Concurrent access patterns

use std::sync::Arc;
use std::thread;

use kvlog::config::Config;
use kvlog::engine::Engine;
use kvlog::KvlogError;
use tempfile::TempDir;

use super::{config_for, setup_temp_engine, setup_temp_engine_with_small_memtable};

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_layout() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let _engine = Engine::open(Config::with_data_dir(&data_dir)).unwrap();

    assert!(data_dir.join("sstables").is_dir());
    assert!(data_dir.join("wal.log").exists());
    assert!(data_dir.join("LOCK").exists());
}

#[test]
fn test_engine_put_overwrite_delete() {
    let (_temp, engine) = setup_temp_engine();

    assert_eq!(engine.get(b"hello").unwrap(), None);

    engine.put(b"hello", b"world").unwrap();
    engine.put(b"hello", b"there").unwrap();
    assert_eq!(engine.get(b"hello").unwrap(), Some(b"there".to_vec()));

    engine.delete(b"hello").unwrap();
    assert_eq!(engine.get(b"hello").unwrap(), None);

    // Deleting again is fine
    engine.delete(b"hello").unwrap();
}

#[test]
fn test_engine_binary_and_empty_data() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"\x00\x01\xFF", b"\xFF\x00").unwrap();
    engine.put(b"", b"empty key").unwrap();
    engine.put(b"empty value", b"").unwrap();

    assert_eq!(engine.get(b"\x00\x01\xFF").unwrap(), Some(b"\xFF\x00".to_vec()));
    assert_eq!(engine.get(b"").unwrap(), Some(b"empty key".to_vec()));
    assert_eq!(engine.get(b"empty value").unwrap(), Some(Vec::new()));
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_engine_manual_flush() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key1", b"value1").unwrap();
    engine.delete(b"key2").unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.memtable_entry_count(), 0);
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.get(b"key1").unwrap(), Some(b"value1".to_vec()));

    // Nothing to flush
    engine.flush().unwrap();
    assert_eq!(engine.sstable_count(), 1);
}

#[test]
fn test_engine_auto_flush_on_size_limit() {
    let (_temp, engine) = setup_temp_engine_with_small_memtable();

    for i in 0..20 {
        engine
            .put(format!("key{:02}", i).as_bytes(), b"some value bytes")
            .unwrap();
    }

    assert!(engine.sstable_count() > 0);
    assert!(engine.memtable_size() < 100);
    for i in 0..20 {
        assert!(engine.get(format!("key{:02}", i).as_bytes()).unwrap().is_some());
    }
}

#[test]
fn test_engine_delete_shadows_flushed_value() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"value").unwrap();
    engine.flush().unwrap();
    engine.delete(b"key").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), None);

    engine.flush().unwrap();
    assert_eq!(engine.get(b"key").unwrap(), None);
}

#[test]
fn test_engine_compacts_at_threshold() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .compaction_threshold(4)
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..10u8 {
        engine.put(&[i], &[i]).unwrap();
        if i % 3 == 0 {
            engine.delete(&[i]).unwrap();
        }
        engine.flush().unwrap();
        assert!(engine.sstable_count() < 4);
    }

    for i in 0..10u8 {
        let expected = (i % 3 != 0).then(|| vec![i]);
        assert_eq!(engine.get(&[i]).unwrap(), expected);
    }
    let on_disk = std::fs::read_dir(engine.storage_dir()).unwrap().count();
    assert_eq!(on_disk, engine.sstable_count());
}

#[test]
fn test_engine_compaction_does_not_resurrect_deleted_keys() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(temp_dir.path(), 1024 * 1024)).unwrap();
        engine.put(b"key", b"old").unwrap();
        engine.flush().unwrap();
        engine.delete(b"key").unwrap();
        engine.flush().unwrap();
        engine.compact().unwrap();
        assert_eq!(engine.get(b"key").unwrap(), None);
        engine.close().unwrap();
    }

    let engine = Engine::open(config_for(temp_dir.path(), 1024 * 1024)).unwrap();
    assert_eq!(engine.get(b"key").unwrap(), None);
    assert_eq!(engine.sstable_count(), 1);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_engine_recovery_from_wal() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(config_for(temp_dir.path(), 1024 * 1024)).unwrap();
        engine.put(b"kept", b"1").unwrap();
        engine.put(b"gone", b"2").unwrap();
        engine.delete(b"gone").unwrap();
        assert_eq!(engine.sstable_count(), 0);
        drop(engine); // Crash: no close, nothing flushed
    }

    let engine = Engine::open(config_for(temp_dir.path(), 1024 * 1024)).unwrap();

    assert_eq!(engine.get(b"kept").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"gone").unwrap(), None);
    // Recovered entries were flushed and the log emptied
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.memtable_entry_count(), 0);
    assert_eq!(std::fs::metadata(temp_dir.path().join("wal.log")).unwrap().len(), 0);
}

#[test]
fn test_engine_repeated_crashes_lose_nothing() {
    let temp_dir = TempDir::new().unwrap();

    for round in 0..3u8 {
        let engine = Engine::open(config_for(temp_dir.path(), 1024 * 1024)).unwrap();
        for earlier in 0..round {
            assert_eq!(engine.get(&[earlier]).unwrap(), Some(vec![earlier]));
        }
        engine.put(&[round], &[round]).unwrap();
        drop(engine);
    }
}

#[test]
fn test_engine_close_flushes_data() {
    let temp_dir = TempDir::new().unwrap();

    let engine = Engine::open(config_for(temp_dir.path(), 1024 * 1024)).unwrap();
    engine.put(b"key", b"value").unwrap();
    engine.close().unwrap();

    let engine = Engine::open(config_for(temp_dir.path(), 1024 * 1024)).unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));
    assert_eq!(engine.sstable_count(), 1);
}

// =============================================================================
// Open Option Tests
// =============================================================================

#[test]
fn test_engine_second_open_is_locked() {
    let temp_dir = TempDir::new().unwrap();
    let _first = Engine::open_path(temp_dir.path()).unwrap();

    let err = Engine::open_path(temp_dir.path()).err().unwrap();
    match err {
        KvlogError::Open { path, source } => {
            assert_eq!(path, temp_dir.path());
            assert!(matches!(*source, KvlogError::Locked(_)));
        }
        other => panic!("expected open error, got {other:?}"),
    }
}

#[test]
fn test_engine_lock_released_on_close() {
    let temp_dir = TempDir::new().unwrap();

    let first = Engine::open_path(temp_dir.path()).unwrap();
    first.close().unwrap();

    assert!(Engine::open_path(temp_dir.path()).is_ok());
}

#[test]
fn test_engine_create_if_missing_off() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("missing");

    let config = Config::builder().data_dir(&missing).create_if_missing(false).build();
    let err = Engine::open(config).err().unwrap();

    assert!(matches!(err, KvlogError::Open { .. }));
    assert!(!missing.exists());
}

#[test]
fn test_engine_error_if_exists() {
    let temp_dir = TempDir::new().unwrap();
    Engine::open_path(temp_dir.path()).unwrap().close().unwrap();

    let config = Config::builder()
        .data_dir(temp_dir.path())
        .error_if_exists(true)
        .build();
    assert!(Engine::open(config).is_err());

    // A fresh directory is fine
    let fresh = temp_dir.path().join("fresh");
    let config = Config::builder().data_dir(&fresh).error_if_exists(true).build();
    assert!(Engine::open(config).is_ok());
}

#[test]
fn test_engine_invalid_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(0)
        .build();

    match Engine::open(config) {
        Err(KvlogError::Open { source, .. }) => {
            assert!(matches!(*source, KvlogError::Config(_)))
        }
        _ => panic!("expected config error"),
    }
}

#[test]
fn test_engine_accessors() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(temp_dir.path(), 1024)).unwrap();

    assert_eq!(engine.data_dir(), temp_dir.path());
    assert_eq!(engine.storage_dir(), temp_dir.path().join("sstables"));
    assert_eq!(engine.memtable_size(), 0);
    assert_eq!(engine.open_cursors(), 0);
    assert_eq!(engine.config().memtable_size_limit, 1024);
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_engine_concurrent_writes_and_reads() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open(config_for(temp_dir.path(), 4 * 1024)).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("t{}_k{:02}", t, i);
                    engine.put(key.as_bytes(), key.as_bytes()).unwrap();
                    assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
                }
            })
        })
        .collect();

    for handle in writers {
        handle.join().unwrap();
    }

    for t in 0..4 {
        for i in 0..50 {
            let key = format!("t{}_k{:02}", t, i);
            assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
        }
    }
}
