use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{
    ArborError, FrameId, PageId, Result, INVALID_PAGE_ID, META_PAGE_ID, PAGE_SIZE,
};
use crate::storage::disk::{DiskManager, DiskScheduler};
use crate::wal::LogManager;

use super::{FrameHeader, LruReplacer, ReadPageGuard, WritePageGuard};

/// Bookkeeping guarded by the pool latch
struct PoolInner {
    /// Page table: maps page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Free list: frames that are not currently in use
    free_list: VecDeque<FrameId>,
    /// LRU replacer for eviction decisions
    replacer: LruReplacer,
}

/// State shared between the pool and the guards it hands out
pub(crate) struct PoolShared {
    /// The buffer pool frames
    frames: Vec<Arc<FrameHeader>>,
    /// The pool latch
    inner: Mutex<PoolInner>,
}

impl PoolShared {
    /// Decrements the pin count of a resident page, ORing in the dirty flag.
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let mut inner = self.inner.lock();

        let frame_id = *inner
            .page_table
            .get(&page_id)
            .ok_or(ArborError::InvalidUnpin(page_id))?;
        let frame = &self.frames[frame_id.as_usize()];

        match frame.unpin() {
            None => Err(ArborError::InvalidUnpin(page_id)),
            Some(remaining) => {
                if is_dirty {
                    frame.set_dirty(true);
                }
                if remaining == 0 {
                    inner.replacer.set_evictable(frame_id, true);
                }
                Ok(())
            }
        }
    }
}

/// BufferPoolManager is responsible for fetching database pages from disk
/// and storing them in memory. It manages a fixed number of frames and evicts
/// the least-recently-unpinned page when it runs out.
///
/// When attached to a log manager, a dirty page is never written back before
/// the log is durable up to the page's LSN.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Frames and the pool latch
    shared: Arc<PoolShared>,
    /// Disk scheduler for page I/O
    disk_scheduler: DiskScheduler,
    /// Log that must be flushed ahead of page write-backs
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size and disk manager.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Result<Self> {
        Self::build(pool_size, disk_manager, None)
    }

    /// Creates a BufferPoolManager that enforces write-ahead logging against
    /// `log_manager`.
    pub fn with_log_manager(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Arc<LogManager>,
    ) -> Result<Self> {
        Self::build(pool_size, disk_manager, Some(log_manager))
    }

    fn build(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Result<Self> {
        if pool_size == 0 {
            return Err(ArborError::Config("buffer pool needs at least one frame".into()));
        }

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let shared = Arc::new(PoolShared {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                replacer: LruReplacer::new(pool_size),
            }),
        });

        Ok(Self {
            pool_size,
            shared,
            disk_scheduler: DiskScheduler::new(disk_manager)?,
            log_manager,
        })
    }

    /// Allocates a new page on disk and installs it, zeroed and pinned, in the
    /// pool. The returned guard holds the only pin.
    pub fn new_page(&self) -> Result<(PageId, WritePageGuard)> {
        let mut inner = self.shared.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = match self.disk_manager().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                inner.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        let frame = Arc::clone(&self.shared.frames[frame_id.as_usize()]);
        frame.set_page_id(page_id);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        drop(inner);

        let mut guard = WritePageGuard::new(page_id, frame, Arc::clone(&self.shared));
        guard.mark_dirty();
        Ok((page_id, guard))
    }

    /// Removes a page from the pool and returns it to the disk free list.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.shared.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.shared.frames[frame_id.as_usize()];

            // Cannot delete a pinned page
            if frame.pin_count() > 0 {
                return Err(ArborError::PageStillPinned(page_id));
            }

            inner.page_table.remove(&page_id);
            inner.replacer.remove(frame_id);
            frame.reset();
            inner.free_list.push_back(frame_id);
        }

        self.disk_manager().deallocate_page(page_id)
    }

    /// Fetches a page for read access, pinning it until the guard drops.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.pin_page(page_id)?;
        Ok(ReadPageGuard::new(page_id, &frame, Arc::clone(&self.shared)))
    }

    /// Fetches a page for write access, pinning it until the guard drops.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.pin_page(page_id)?;
        Ok(WritePageGuard::new(page_id, frame, Arc::clone(&self.shared)))
    }

    /// Releases one pin on a page. Guards call this on drop; calling it
    /// directly is only needed for pins taken without a guard.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        self.shared.unpin_page(page_id, is_dirty)
    }

    /// Writes a resident page to disk if it is dirty.
    /// Returns false if the page is not in the pool.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID || page_id == META_PAGE_ID {
            return Err(ArborError::InvalidPageId(page_id));
        }

        // Pin so the frame cannot be evicted while its bytes are copied out
        let frame = {
            let mut inner = self.shared.inner.lock();
            let Some(&frame_id) = inner.page_table.get(&page_id) else {
                return Ok(false);
            };
            let frame = Arc::clone(&self.shared.frames[frame_id.as_usize()]);
            frame.pin();
            inner.replacer.set_evictable(frame_id, false);
            frame
        };

        let result = self.write_back(&frame, page_id);
        self.shared.unpin_page(page_id, false)?;
        result.map(|_| true)
    }

    /// Flushes every dirty resident page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids: Vec<PageId> = {
            let inner = self.shared.inner.lock();
            inner.page_table.keys().copied().collect()
        };

        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Returns the pin count for a page, or None if it is not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.shared.inner.lock();

        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.shared.frames[frame_id.as_usize()].pin_count())
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.shared.inner.lock().free_list.len()
    }

    /// Returns the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Returns the log manager write-backs are ordered against, if any.
    pub fn log_manager(&self) -> Option<&Arc<LogManager>> {
        self.log_manager.as_ref()
    }

    /// Pins a page, reading it from disk into a frame if it is not resident.
    fn pin_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        if page_id == INVALID_PAGE_ID || page_id == META_PAGE_ID {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let mut inner = self.shared.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.shared.frames[frame_id.as_usize()];
            frame.pin();
            inner.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.shared.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut data) {
            inner.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.copy_from(&data);
        frame.set_page_id(page_id);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        Ok(Arc::clone(frame))
    }

    /// Gets an empty frame, either from the free list or by evicting the
    /// least-recently-unpinned page.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = inner.replacer.evict().ok_or(ArborError::PoolExhausted)?;
        let frame = &self.shared.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if let Err(e) = self.write_back(frame, old_page_id) {
            inner.replacer.set_evictable(frame_id, true);
            return Err(e);
        }

        inner.page_table.remove(&old_page_id);
        frame.reset();
        tracing::debug!(
            page_id = old_page_id.as_u32(),
            frame_id = frame_id.as_u32(),
            "evicted page"
        );

        Ok(frame_id)
    }

    /// Writes a frame's bytes to disk if dirty, flushing the log up to the
    /// frame's LSN first. Returns whether a write happened.
    fn write_back(&self, frame: &FrameHeader, page_id: PageId) -> Result<bool> {
        let data = frame.data.read();
        if !frame.is_dirty() {
            return Ok(false);
        }

        if let Some(log_manager) = &self.log_manager {
            log_manager.flush_to(frame.page_lsn())?;
        }

        let mut buf = [0u8; PAGE_SIZE];
        buf.copy_from_slice(&data[..]);
        // Cleared under the read lock: a writer that follows re-dirties on release
        frame.set_dirty(false);
        drop(data);

        if let Err(e) = self.disk_scheduler.schedule_write_sync(page_id, &buf) {
            frame.set_dirty(true);
            return Err(e);
        }
        Ok(true)
    }
}
