//! Crash recovery tests. A crash is simulated by forgetting the database, so
//! no destructor gets to flush pages or mark a clean shutdown.

use std::fs::{self, OpenOptions};
use std::path::Path;

use arbor::common::{ArborError, Key, LOG_FILE_NAME};
use arbor::wal::{LogManager, LogRecord};
use arbor::{Database, Options};
use tempfile::TempDir;

fn small_pool() -> Options {
    Options::builder().pool_size(10).build()
}

fn crash(db: Database) {
    std::mem::forget(db);
}

fn value_for(key: Key) -> Vec<u8> {
    format!("value-{}", key).into_bytes()
}

fn truncate_log(dir: &Path, bytes: u64) {
    let path = dir.join(LOG_FILE_NAME);
    let len = fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - bytes).unwrap();
}

#[test]
fn test_recovery_after_crash_with_small_pool() {
    let dir = TempDir::new().unwrap();

    let db = Database::open(dir.path(), small_pool()).unwrap();
    for key in 0..1000 {
        db.put(key, &value_for(key)).unwrap();
    }
    crash(db);

    let db = Database::open(dir.path(), small_pool()).unwrap();
    let report = db.last_recovery().clone();
    assert!(report.rebuilt);
    assert!(report.loser_txns.is_empty());
    assert_eq!(report.redone, 1000);

    for key in 0..1000 {
        assert_eq!(db.get(key).unwrap(), value_for(key), "key {}", key);
    }
    assert_eq!(db.verify().unwrap().num_keys, 1000);
}

#[test]
fn test_recovery_keeps_committed_prefix() {
    let dir = TempDir::new().unwrap();

    let db = Database::open(dir.path(), small_pool()).unwrap();
    for key in 1..=20 {
        db.put(key, &value_for(key)).unwrap();
    }
    crash(db);

    // Tear the final COMMIT so key 20's transaction never finished
    truncate_log(dir.path(), 3);

    let db = Database::open(dir.path(), small_pool()).unwrap();
    let report = db.last_recovery();
    assert!(report.corruption.is_some());
    assert_eq!(report.loser_txns.len(), 1);
    assert_eq!(report.undone, 1);

    for key in 1..=19 {
        assert_eq!(db.get(key).unwrap(), value_for(key));
    }
    assert!(matches!(db.get(20), Err(ArborError::KeyNotFound(20))));
}

#[test]
fn test_recovery_undoes_uncommitted_update() {
    let dir = TempDir::new().unwrap();

    let db = Database::open(dir.path(), small_pool()).unwrap();
    db.put(5, b"committed").unwrap();
    db.put(6, b"six").unwrap();
    crash(db);

    // A transaction that logged its change but crashed before committing
    {
        let (log, _) = LogManager::open(dir.path().join(LOG_FILE_NAME)).unwrap();
        log.append(LogRecord::update(999, 5, b"committed".to_vec(), b"torn".to_vec()))
            .unwrap();
        log.append(LogRecord::delete(999, 6, b"six".to_vec())).unwrap();
        log.flush().unwrap();
    }

    let db = Database::open(dir.path(), small_pool()).unwrap();
    let report = db.last_recovery();
    assert_eq!(report.loser_txns, vec![999]);
    assert_eq!(report.undone, 2);

    assert_eq!(db.get(5).unwrap(), b"committed");
    assert_eq!(db.get(6).unwrap(), b"six");
}

#[test]
fn test_recovery_after_checkpoint() {
    let dir = TempDir::new().unwrap();

    let db = Database::open(dir.path(), small_pool()).unwrap();
    for key in 0..300 {
        db.put(key, &value_for(key)).unwrap();
    }
    db.checkpoint().unwrap();
    for key in 0..100 {
        db.delete(key).unwrap();
    }
    for key in 300..400 {
        db.put(key, &value_for(key)).unwrap();
    }
    crash(db);

    let db = Database::open(dir.path(), small_pool()).unwrap();
    assert!(db.last_recovery().rebuilt);

    for key in 0..100 {
        assert!(db.get(key).is_err());
    }
    for key in 100..400 {
        assert_eq!(db.get(key).unwrap(), value_for(key));
    }
    assert_eq!(db.verify().unwrap().num_keys, 300);
}

#[test]
fn test_recovery_is_repeatable() {
    let dir = TempDir::new().unwrap();

    let db = Database::open(dir.path(), small_pool()).unwrap();
    for key in 0..200 {
        db.put(key, &value_for(key)).unwrap();
    }
    crash(db);

    // Crash again straight after recovering
    let db = Database::open(dir.path(), small_pool()).unwrap();
    crash(db);

    let db = Database::open(dir.path(), small_pool()).unwrap();
    for key in 0..200 {
        assert_eq!(db.get(key).unwrap(), value_for(key));
    }
    db.close().unwrap();

    // A clean shutdown needs no replay
    let db = Database::open(dir.path(), small_pool()).unwrap();
    let report = db.last_recovery();
    assert!(!report.rebuilt);
    assert_eq!(report.redone, 0);
    assert_eq!(db.verify().unwrap().num_keys, 200);
}

#[test]
fn test_recovery_with_auto_checkpoints() {
    let dir = TempDir::new().unwrap();
    let options = Options::builder()
        .pool_size(10)
        .checkpoint_threshold(4 * 1024)
        .build();

    let db = Database::open(dir.path(), options.clone()).unwrap();
    for key in 0..500 {
        db.put(key % 120, &value_for(key)).unwrap();
    }
    crash(db);

    // Checkpoints kept rewriting the log down to a snapshot
    let log_len = fs::metadata(dir.path().join(LOG_FILE_NAME)).unwrap().len();
    assert!(log_len < 64 * 1024);

    let db = Database::open(dir.path(), options).unwrap();
    for key in 380..500 {
        assert_eq!(db.get(key % 120).unwrap(), value_for(key));
    }
}
