use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{ArborError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// Depth of the request queue between callers and the worker
const REQUEST_QUEUE_DEPTH: usize = 128;

/// Represents a disk I/O request. Each request owns its buffer and carries a
/// one-shot reply channel the caller blocks on.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        reply: Sender<Result<Box<[u8; PAGE_SIZE]>>>,
    },
    Write {
        page_id: PageId,
        data: Box<[u8; PAGE_SIZE]>,
        reply: Sender<Result<()>>,
    },
}

/// DiskScheduler manages a background worker thread that processes disk I/O requests.
/// Callers see synchronous I/O: every `schedule_*_sync` blocks until the
/// worker has answered.
pub struct DiskScheduler {
    /// The disk manager for actual I/O operations
    disk_manager: Arc<DiskManager>,
    /// Channel sender for queuing requests; dropped first on shutdown
    request_sender: Option<Sender<DiskRequest>>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler with the given DiskManager.
    /// Spawns a background worker thread to process requests.
    pub fn new(disk_manager: Arc<DiskManager>) -> Result<Self> {
        let (sender, receiver) = bounded::<DiskRequest>(REQUEST_QUEUE_DEPTH);

        let dm_clone = Arc::clone(&disk_manager);
        let worker_handle = thread::Builder::new()
            .name("arbor-disk".into())
            .spawn(move || Self::start_worker_thread(dm_clone, receiver))?;

        Ok(Self {
            disk_manager,
            request_sender: Some(sender),
            worker_handle: Some(worker_handle),
        })
    }

    /// Schedules a disk request for processing by the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        let sender = self
            .request_sender
            .as_ref()
            .ok_or_else(|| ArborError::DiskScheduler("scheduler is shut down".into()))?;
        sender
            .send(request)
            .map_err(|e| ArborError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    /// Schedules a read request and waits for completion.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Read { page_id, reply: tx })?;

        let page = rx.recv().map_err(|e| {
            ArborError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })??;
        data.copy_from_slice(&page[..]);

        Ok(())
    }

    /// Schedules a write request and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut page = Box::new([0u8; PAGE_SIZE]);
        page.copy_from_slice(data);

        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data: page,
            reply: tx,
        })?;

        rx.recv().map_err(|e| {
            ArborError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?
    }

    /// The background worker thread function.
    /// Runs until every sender is dropped and the queue is drained.
    fn start_worker_thread(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        for request in receiver.iter() {
            Self::process_request(&disk_manager, request);
        }
        tracing::debug!("disk scheduler worker exiting");
    }

    /// Processes a single disk request. A caller that gave up waiting is not
    /// an error for the worker.
    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, reply } => {
                let mut page = Box::new([0u8; PAGE_SIZE]);
                let result = disk_manager.read_page(page_id, &mut page[..]).map(|_| page);
                let _ = reply.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                reply,
            } => {
                let _ = reply.send(disk_manager.write_page(page_id, &data[..]));
            }
        }
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the queue ends the worker's loop
        drop(self.request_sender.take());

        if let Some(handle) = self.worker_handle.take() {
            if handle.join().is_err() {
                tracing::error!("disk scheduler worker panicked");
            }
        }
    }
}
