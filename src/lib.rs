//! Arbor - A disk-backed B-tree key-value storage engine in Rust
//!
//! Arbor stores `i64` keys with byte-string values in a B+-tree laid out over
//! fixed-size pages. Pages are cached by a buffer pool, and every change is
//! made durable in a write-ahead log before it is applied, so a crash at any
//! point recovers to the last committed operation.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Handles disk I/O and page organization
//!   - `DiskManager`: Reads and writes pages, owns the metadata page and free list
//!   - `DiskScheduler`: Background worker that serializes page I/O
//!   - `MetaPage`: Root pointer, free-list head and shutdown state on page 0
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Fetches pages from disk and caches them in memory
//!   - `LruReplacer`: Evicts the least recently unpinned frame
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards that pin and latch a page
//!
//! - **Index** (`index`): The B+-tree
//!   - `Node`: Node model and its page encoding
//!   - `BTree`: Search, insert, delete and range scans over pages
//!   - `BTreeIterator`: Ascending range iterator
//!
//! - **Write-Ahead Log** (`wal`): Durability and crash recovery
//!   - `LogManager`: Append-only, checksummed log file
//!   - `recovery`: Redo of the log followed by undo of uncommitted work
//!
//! - **Database** (`db`): The public key-value facade
//!
//! # Example
//!
//! ```rust,no_run
//! use arbor::{Database, Options};
//!
//! let db = Database::open("data", Options::default()).unwrap();
//!
//! db.put(1, b"Hello, World!").unwrap();
//! assert_eq!(db.get(1).unwrap(), b"Hello, World!");
//!
//! for entry in db.range(0, 100) {
//!     let (key, value) = entry.unwrap();
//!     println!("{} => {:?}", key, value);
//! }
//!
//! db.close().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod db;
pub mod index;
pub mod storage;
pub mod wal;

// Re-export commonly used types at the crate root
pub use common::{ArborError, Key, Options, PageId, Result};
pub use db::Database;
pub use index::BTreeIterator;
pub use wal::RecoveryReport;
