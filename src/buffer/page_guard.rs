use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::{Lsn, PageId, PAGE_SIZE};

use super::buffer_pool_manager::PoolShared;
use super::FrameHeader;

type PageReadLock = ArcRwLockReadGuard<RawRwLock, Box<[u8; PAGE_SIZE]>>;
type PageWriteLock = ArcRwLockWriteGuard<RawRwLock, Box<[u8; PAGE_SIZE]>>;

/// Pin bookkeeping shared by both guard kinds
struct PageGuardBase {
    /// The page ID being guarded
    page_id: PageId,
    /// Pool the page is pinned in
    pool: Arc<PoolShared>,
    /// Whether the page was marked dirty
    is_dirty: bool,
}

impl PageGuardBase {
    fn release(&self) {
        if let Err(e) = self.pool.unpin_page(self.page_id, self.is_dirty) {
            tracing::error!(page_id = self.page_id.as_u32(), "page guard release failed: {}", e);
        }
    }
}

/// RAII guard for read-only access to a page.
/// Holds a pin and a shared lock on the frame; both are released on drop.
pub struct ReadPageGuard {
    base: PageGuardBase,
    /// Read lock on the page data
    data_guard: Option<PageReadLock>,
}

impl ReadPageGuard {
    /// Locks an already pinned frame for reading.
    pub(crate) fn new(page_id: PageId, frame: &FrameHeader, pool: Arc<PoolShared>) -> Self {
        Self {
            base: PageGuardBase {
                page_id,
                pool,
                is_dirty: false,
            },
            data_guard: Some(frame.data.read_arc()),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        match &self.data_guard {
            Some(guard) => &guard[..],
            None => &[],
        }
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // The data lock goes first; unpinning takes the pool latch
        self.data_guard.take();
        self.base.release();
    }
}

/// RAII guard for read-write access to a page.
/// Marks the frame dirty on release if the data was borrowed mutably.
pub struct WritePageGuard {
    base: PageGuardBase,
    /// Frame header, for stamping the page LSN
    frame: Arc<FrameHeader>,
    /// Write lock on the page data
    data_guard: Option<PageWriteLock>,
}

impl WritePageGuard {
    /// Locks an already pinned frame for writing.
    pub(crate) fn new(page_id: PageId, frame: Arc<FrameHeader>, pool: Arc<PoolShared>) -> Self {
        let data_guard = frame.data.write_arc();
        Self {
            base: PageGuardBase {
                page_id,
                pool,
                is_dirty: false,
            },
            frame,
            data_guard: Some(data_guard),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        match &self.data_guard {
            Some(guard) => &guard[..],
            None => &[],
        }
    }

    /// Returns a mutable reference to the page data.
    /// Automatically marks the page as dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        match &mut self.data_guard {
            Some(guard) => &mut guard[..],
            None => &mut [],
        }
    }

    /// Marks the page dirty without touching its bytes.
    pub fn mark_dirty(&mut self) {
        self.base.is_dirty = true;
    }

    /// Records that the page now holds the effect of log record `lsn`.
    /// The pool will not write the page back before the log is durable
    /// up to this LSN.
    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        self.frame.set_page_lsn(lsn);
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        self.base.release();
    }
}
