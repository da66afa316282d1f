use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::BufferPoolManager;
use crate::common::{
    ArborError, Key, Lsn, Options, Result, TxnId, DATA_FILE_NAME, INVALID_LSN, LOG_FILE_NAME,
};
use crate::index::{BTree, BTreeIterator, TreeStats};
use crate::storage::disk::DiskManager;
use crate::storage::page::ShutdownState;
use crate::wal::{recovery, LogManager, LogRecord, RecoveryReport};

/// An ordered `i64 -> bytes` store backed by a B+-tree, a buffer pool and a
/// write-ahead log.
///
/// Every `put` and `delete` is its own transaction: the change and its COMMIT
/// are durable in the log before the tree is touched. Writers hold the tree
/// lock exclusively; readers share it.
pub struct Database {
    dir: PathBuf,
    tree: RwLock<BTree>,
    disk: Arc<DiskManager>,
    log: Arc<LogManager>,
    options: Options,
    next_txn_id: AtomicU64,
    /// Log size right after the last checkpoint
    checkpoint_base: AtomicU64,
    max_value_len: usize,
    recovery: RecoveryReport,
    closed: AtomicBool,
}

impl Database {
    /// Opens the database in `dir`, creating it if needed, and recovers from
    /// the log.
    pub fn open<P: AsRef<Path>>(dir: P, options: Options) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let disk = Arc::new(DiskManager::open(dir.join(DATA_FILE_NAME), options.min_degree)?);
        let (log, scan) = LogManager::open(dir.join(LOG_FILE_NAME))?;
        let log = Arc::new(log);

        let meta = disk.meta();
        let clean = meta.state == ShutdownState::Clean && meta.has_root();
        let rebuilt = !clean && meta.has_root();

        // An unclean data file may hold torn write-backs; the log starts with
        // a full snapshot, so start from nothing and replay all of it
        let applied_lsn = if clean {
            meta.applied_lsn
        } else {
            disk.reset()?;
            INVALID_LSN
        };
        log.ensure_next_lsn(meta.applied_lsn + 1);
        disk.update_meta(|m| m.state = ShutdownState::InUse)?;

        let bpm = Arc::new(BufferPoolManager::with_log_manager(
            options.pool_size,
            Arc::clone(&disk),
            Arc::clone(&log),
        )?);
        let mut tree = if clean {
            BTree::open(bpm)?
        } else {
            BTree::create(bpm, disk.min_degree())?
        };

        let mut report = recovery::replay(&mut tree, &scan.records, applied_lsn)?;
        report.rebuilt = rebuilt;
        report.corruption = scan.corruption.as_ref().map(|e| e.to_string());

        let next_txn_id = scan.records.iter().map(|r| r.txn_id).max().unwrap_or(0) + 1;
        let max_value_len = tree.max_value_len();

        let db = Self {
            dir,
            tree: RwLock::new(tree),
            disk,
            log,
            checkpoint_base: AtomicU64::new(0),
            options,
            next_txn_id: AtomicU64::new(next_txn_id),
            max_value_len,
            recovery: report,
            closed: AtomicBool::new(false),
        };

        if db.recovery.changed_tree() || db.recovery.rebuilt || db.recovery.corruption.is_some() {
            let tree = db.tree.write();
            db.checkpoint_locked(&tree)?;
        }
        db.checkpoint_base.store(db.log.size_bytes(), Ordering::Release);

        tracing::info!(
            dir = %db.dir.display(),
            records = db.recovery.records_scanned,
            redone = db.recovery.redone,
            undone = db.recovery.undone,
            rebuilt = db.recovery.rebuilt,
            "database opened"
        );
        Ok(db)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: Key, value: &[u8]) -> Result<()> {
        if value.len() > self.max_value_len {
            return Err(ArborError::ValueTooLarge {
                len: value.len(),
                max: self.max_value_len,
            });
        }

        let mut tree = self.tree.write();
        let txn_id = self.next_txn_id();
        let record = match tree.search(key)? {
            Some(old) => LogRecord::update(txn_id, key, old, value.to_vec()),
            None => LogRecord::insert(txn_id, key, value.to_vec()),
        };
        let lsn = self.log_committed(record)?;

        tree.insert(key, value.to_vec(), lsn)?;
        self.maybe_checkpoint(&tree)
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: Key) -> Result<Vec<u8>> {
        self.tree
            .read()
            .search(key)?
            .ok_or(ArborError::KeyNotFound(key))
    }

    /// Removes `key`. Nothing is logged when the key is absent.
    pub fn delete(&self, key: Key) -> Result<()> {
        let mut tree = self.tree.write();
        let old = tree.search(key)?.ok_or(ArborError::KeyNotFound(key))?;

        let txn_id = self.next_txn_id();
        let lsn = self.log_committed(LogRecord::delete(txn_id, key, old))?;

        tree.delete(key, lsn)?;
        self.maybe_checkpoint(&tree)
    }

    /// Ascending iterator over the keys in `start..=end`.
    pub fn range(&self, start: Key, end: Key) -> BTreeIterator<'_> {
        BTreeIterator::new(&self.tree, start, end)
    }

    /// Flushes every dirty page and compacts the log into a snapshot of the
    /// live data.
    pub fn checkpoint(&self) -> Result<()> {
        let tree = self.tree.write();
        self.checkpoint_locked(&tree)
    }

    /// Checks every structural invariant of the tree.
    pub fn verify(&self) -> Result<TreeStats> {
        self.tree.read().verify()
    }

    /// What recovery did when this database was opened.
    pub fn last_recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Largest value `put` accepts.
    pub fn max_value_len(&self) -> usize {
        self.max_value_len
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Checkpoints and marks the data file as cleanly shut down.
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let tree = self.tree.write();
        self.checkpoint_locked(&tree)?;
        self.disk.update_meta(|m| m.state = ShutdownState::Clean)?;
        self.disk.sync()?;

        tracing::info!(dir = %self.dir.display(), "database closed");
        Ok(())
    }

    fn next_txn_id(&self) -> TxnId {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Appends a single-mutation transaction and forces it to disk. Returns
    /// the COMMIT record's LSN.
    fn log_committed(&self, record: LogRecord) -> Result<Lsn> {
        let txn_id = record.txn_id;
        self.log.append(record)?;
        let lsn = self.log.append(LogRecord::commit(txn_id))?;
        self.log.flush()?;
        Ok(lsn)
    }

    fn maybe_checkpoint(&self, tree: &BTree) -> Result<()> {
        let grown = self
            .log
            .size_bytes()
            .saturating_sub(self.checkpoint_base.load(Ordering::Acquire));
        if grown >= self.options.checkpoint_threshold {
            self.checkpoint_locked(tree)?;
        }
        Ok(())
    }

    /// Caller holds the tree lock exclusively.
    fn checkpoint_locked(&self, tree: &BTree) -> Result<()> {
        self.log.flush()?;
        tree.buffer_pool().flush_all_pages()?;

        let txn_id = self.next_txn_id();
        let mut records = Vec::new();
        let mut start = Some(Key::MIN);
        while let Some(from) = start {
            let scan = tree.scan_leaf(from, Key::MAX)?;
            records.extend(
                scan.entries
                    .into_iter()
                    .map(|(key, value)| LogRecord::insert(txn_id, key, value)),
            );
            start = scan.resume;
        }
        let live_keys = records.len();
        records.push(LogRecord::commit(txn_id));
        records.push(LogRecord::checkpoint(txn_id));

        let checkpoint_lsn = self.log.rewrite(records)?;
        self.disk.update_meta(|m| m.applied_lsn = checkpoint_lsn)?;
        self.checkpoint_base
            .store(self.log.size_bytes(), Ordering::Release);

        tracing::debug!(
            lsn = checkpoint_lsn,
            live_keys,
            log_bytes = self.log.size_bytes(),
            "checkpoint complete"
        );
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(dir = %self.dir.display(), "failed to close database: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), Options::default()).unwrap();

        db.put(1, b"one").unwrap();
        db.put(1, b"uno").unwrap();
        assert_eq!(db.get(1).unwrap(), b"uno");

        db.delete(1).unwrap();
        assert!(matches!(db.get(1), Err(ArborError::KeyNotFound(1))));
        assert!(matches!(db.delete(1), Err(ArborError::KeyNotFound(1))));
    }

    #[test]
    fn test_database_delete_missing_logs_nothing() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), Options::default()).unwrap();

        let before = db.log.size_bytes();
        assert!(db.delete(42).is_err());
        assert_eq!(db.log.size_bytes(), before);
    }

    #[test]
    fn test_database_oversized_value_logs_nothing() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), Options::default()).unwrap();

        let before = db.log.size_bytes();
        let value = vec![0u8; db.max_value_len() + 1];
        assert!(matches!(
            db.put(1, &value),
            Err(ArborError::ValueTooLarge { .. })
        ));
        assert_eq!(db.log.size_bytes(), before);
    }

    #[test]
    fn test_database_clean_reopen_replays_nothing() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open(dir.path(), Options::default()).unwrap();
            for key in 0..100 {
                db.put(key, &key.to_le_bytes()).unwrap();
            }
            db.close().unwrap();
        }

        let db = Database::open(dir.path(), Options::default()).unwrap();
        let report = db.last_recovery();
        assert!(!report.rebuilt);
        assert_eq!(report.redone, 0);
        assert_eq!(db.get(57).unwrap(), 57i64.to_le_bytes());
        assert_eq!(db.verify().unwrap().num_keys, 100);
    }
}
