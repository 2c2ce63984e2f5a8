//! Engine integration tests

mod engine_tests;

use kvlog::config::{Config, WalSyncStrategy};
use kvlog::engine::Engine;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

pub fn config_for(dir: &std::path::Path, memtable_size_limit: usize) -> Config {
    Config::builder()
        .data_dir(dir)
        .wal_sync_strategy(WalSyncStrategy::EveryWrite) // Sync every write for test reliability
        .memtable_size_limit(memtable_size_limit)
        .build()
}

pub fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(temp_dir.path(), 1024 * 1024)).unwrap();
    (temp_dir, engine)
}

pub fn setup_temp_engine_with_small_memtable() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(temp_dir.path(), 100)).unwrap();
    (temp_dir, engine)
}
