//! # kvlog
//!
//! A durable, ordered key-value log with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with partial write handling
//! - Atomic multi-key batches
//! - Lazy prefix and half-open range iteration over point-in-time snapshots
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                                │
//! │        (string keys, KeyNotFound, Entries iterators)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Engine                                │
//! │       (Single Writer / Multi Reader, directory lock)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  MemTable   │◄──┐
//!   │  (Append)   │          │  (RwLock)   │   │
//!   └─────────────┘          └──────┬──────┘   │
//!                                   │          │  Cursor
//!                                   ▼          │  (k-way merge)
//!                           ┌─────────────┐    │
//!                           │   Storage   │◄───┘
//!                           │  (SSTable)  │
//!                           └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use kvlog::Store;
//!
//! # fn main() -> kvlog::Result<()> {
//! let store = Store::open("./data")?;
//! store.put("user:1", b"alice")?;
//! store.put_batch([("user:2", b"bob".as_slice()), ("user:3", b"carol".as_slice())])?;
//!
//! for entry in store.entries_with_prefix("user:") {
//!     let (key, value) = entry?;
//!     println!("{key} = {}", String::from_utf8_lossy(&value));
//! }
//!
//! assert!(store.get("user:9").unwrap_err().is_not_found());
//! store.close()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod memtable;
pub mod storage;
pub mod batch;
pub mod cursor;
pub mod engine;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvlogError, Result};
pub use config::{Config, WalSyncStrategy};
pub use batch::WriteBatch;
pub use cursor::{Cursor, ScanRange};
pub use engine::Engine;
pub use store::{Entries, Store};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of kvlog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
