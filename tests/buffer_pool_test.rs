//! Integration tests for the buffer pool manager

use std::sync::Arc;
use std::thread;

use arbor::buffer::BufferPoolManager;
use arbor::common::{ArborError, PageId, DEFAULT_MIN_DEGREE};
use arbor::storage::disk::DiskManager;
use arbor::wal::{LogManager, LogRecord};
use tempfile::{NamedTempFile, TempDir};

fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::open(temp_file.path(), DEFAULT_MIN_DEGREE).unwrap());
    let bpm = BufferPoolManager::new(pool_size, dm).unwrap();
    (bpm, temp_file)
}

fn new_unpinned_page(bpm: &BufferPoolManager, tag: u8) -> PageId {
    let (page_id, mut guard) = bpm.new_page().unwrap();
    guard.data_mut()[0] = tag;
    page_id
}

#[test]
fn test_buffer_pool_basic_operations() {
    let (bpm, _temp) = create_bpm(10);

    // Page 0 is metadata, so the first data page is 1
    let (page_id, mut guard) = bpm.new_page().unwrap();
    assert_eq!(page_id, PageId::new(1));
    guard.data_mut()[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    drop(guard);

    let guard = bpm.fetch_page_read(page_id).unwrap();
    assert_eq!(&guard.data()[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn test_buffer_pool_persistence() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();
    let test_data = b"Persistence test data";

    let page_id = {
        let dm = Arc::new(DiskManager::open(&path, DEFAULT_MIN_DEGREE).unwrap());
        let bpm = BufferPoolManager::new(10, dm).unwrap();

        let (page_id, mut guard) = bpm.new_page().unwrap();
        guard.data_mut()[..test_data.len()].copy_from_slice(test_data);
        drop(guard);

        assert!(bpm.flush_page(page_id).unwrap());
        page_id
    };

    let dm = Arc::new(DiskManager::open(&path, DEFAULT_MIN_DEGREE).unwrap());
    let bpm = BufferPoolManager::new(10, dm).unwrap();
    let guard = bpm.fetch_page_read(page_id).unwrap();
    assert_eq!(&guard.data()[..test_data.len()], test_data);
}

#[test]
fn test_buffer_pool_eviction() {
    let (bpm, _temp) = create_bpm(3);

    // More pages than frames forces dirty pages out to disk
    let page_ids: Vec<_> = (0..10).map(|i| new_unpinned_page(&bpm, i as u8)).collect();

    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(guard.data()[0], i as u8);
    }
}

#[test]
fn test_buffer_pool_evicts_least_recently_unpinned() {
    let (bpm, _temp) = create_bpm(3);

    let p1 = new_unpinned_page(&bpm, 1);
    let p2 = new_unpinned_page(&bpm, 2);
    let p3 = new_unpinned_page(&bpm, 3);

    // Touching p1 makes p2 the oldest unpinned page
    drop(bpm.fetch_page_read(p1).unwrap());

    let p4 = new_unpinned_page(&bpm, 4);
    assert_eq!(bpm.get_pin_count(p2), None);
    assert_eq!(bpm.get_pin_count(p1), Some(0));
    assert_eq!(bpm.get_pin_count(p3), Some(0));
    assert_eq!(bpm.get_pin_count(p4), Some(0));

    // Next victim is p3
    new_unpinned_page(&bpm, 5);
    assert_eq!(bpm.get_pin_count(p3), None);
}

#[test]
fn test_buffer_pool_pin_counts() {
    let (bpm, _temp) = create_bpm(5);
    let page_id = new_unpinned_page(&bpm, 7);
    assert_eq!(bpm.get_pin_count(page_id), Some(0));

    let r1 = bpm.fetch_page_read(page_id).unwrap();
    let r2 = bpm.fetch_page_read(page_id).unwrap();
    assert_eq!(bpm.get_pin_count(page_id), Some(2));

    drop(r1);
    assert_eq!(bpm.get_pin_count(page_id), Some(1));
    drop(r2);
    assert_eq!(bpm.get_pin_count(page_id), Some(0));
}

#[test]
fn test_buffer_pool_exhausted_when_all_pinned() {
    let (bpm, _temp) = create_bpm(3);

    let guards: Vec<_> = (0..3).map(|_| bpm.new_page().unwrap()).collect();
    assert_eq!(bpm.free_frame_count(), 0);

    assert!(matches!(bpm.new_page(), Err(ArborError::PoolExhausted)));

    // Releasing one pin frees a victim
    drop(guards);
    assert!(bpm.new_page().is_ok());
}

#[test]
fn test_buffer_pool_delete_page() {
    let (bpm, _temp) = create_bpm(5);

    let (page_id, guard) = bpm.new_page().unwrap();
    assert!(matches!(
        bpm.delete_page(page_id),
        Err(ArborError::PageStillPinned(_))
    ));
    drop(guard);

    bpm.delete_page(page_id).unwrap();
    assert_eq!(bpm.get_pin_count(page_id), None);

    // The freed page id is handed out again
    let (reused, guard) = bpm.new_page().unwrap();
    assert_eq!(reused, page_id);
    assert!(guard.data().iter().all(|&b| b == 0));
}

#[test]
fn test_buffer_pool_rejects_meta_and_invalid_unpin() {
    let (bpm, _temp) = create_bpm(5);

    assert!(matches!(
        bpm.fetch_page_read(PageId::new(0)),
        Err(ArborError::InvalidPageId(_))
    ));

    let page_id = new_unpinned_page(&bpm, 1);
    assert!(matches!(
        bpm.unpin_page(page_id, false),
        Err(ArborError::InvalidUnpin(_))
    ));
    assert!(matches!(
        bpm.unpin_page(PageId::new(42), false),
        Err(ArborError::InvalidUnpin(_))
    ));
}

#[test]
fn test_buffer_pool_flush_all() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let page_ids: Vec<_> = {
        let dm = Arc::new(DiskManager::open(&path, DEFAULT_MIN_DEGREE).unwrap());
        let bpm = BufferPoolManager::new(10, dm).unwrap();
        let ids = (0..5).map(|i| new_unpinned_page(&bpm, i as u8)).collect();
        bpm.flush_all_pages().unwrap();
        ids
    };

    let dm = Arc::new(DiskManager::open(&path, DEFAULT_MIN_DEGREE).unwrap());
    let bpm = BufferPoolManager::new(10, dm).unwrap();
    for (i, &pid) in page_ids.iter().enumerate() {
        assert_eq!(bpm.fetch_page_read(pid).unwrap().data()[0], i as u8);
    }
}

#[test]
fn test_buffer_pool_flushes_log_before_write_back() {
    let dir = TempDir::new().unwrap();
    let dm = Arc::new(DiskManager::open(dir.path().join("arbor.db"), DEFAULT_MIN_DEGREE).unwrap());
    let (log, _) = LogManager::open(dir.path().join("arbor.wal")).unwrap();
    let log = Arc::new(log);
    let bpm = BufferPoolManager::with_log_manager(1, dm, Arc::clone(&log)).unwrap();

    log.append(LogRecord::insert(1, 10, b"v".to_vec())).unwrap();
    let lsn = log.append(LogRecord::commit(1)).unwrap();
    assert_eq!(log.flushed_lsn(), 0);

    let (page_id, mut guard) = bpm.new_page().unwrap();
    guard.data_mut()[0] = 1;
    guard.set_page_lsn(lsn);
    drop(guard);

    // Evicting the only frame writes the page back, so the log goes first
    let (_, _guard) = bpm.new_page().unwrap();
    assert_eq!(bpm.get_pin_count(page_id), None);
    assert!(log.flushed_lsn() >= lsn);
}

#[test]
fn test_buffer_pool_concurrent_access() {
    let (bpm, _temp) = create_bpm(4);
    let bpm = Arc::new(bpm);

    let page_ids: Vec<_> = (0..8).map(|i| new_unpinned_page(&bpm, i as u8)).collect();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let bpm = Arc::clone(&bpm);
            let page_ids = page_ids.clone();
            thread::spawn(move || {
                for round in 0..50 {
                    let pid = page_ids[(t + round) % page_ids.len()];
                    let guard = bpm.fetch_page_read(pid).unwrap();
                    assert_eq!(guard.data()[0] as u32, pid.as_u32() - 1);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for &pid in &page_ids {
        assert!(matches!(bpm.get_pin_count(pid), None | Some(0)));
    }
}
