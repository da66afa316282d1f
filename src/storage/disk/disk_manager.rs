use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{
    validate_min_degree, ArborError, PageId, Result, META_PAGE_ID, PAGE_SIZE,
};
use crate::storage::page::{FreePage, MetaPage};

/// DiskManager is responsible for reading and writing pages to/from disk.
/// It owns page 0 (the metadata page) and keeps the free-page list there, so
/// every allocation survives a restart. There is no caching at this level.
pub struct DiskManager {
    /// The database file
    db_file: Mutex<File>,
    /// Path to the database file
    db_path: PathBuf,
    /// In-memory copy of page 0, written through on every change
    meta: Mutex<MetaPage>,
    /// Number of disk reads performed
    num_reads: AtomicU32,
    /// Number of disk writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at `db_path`, creating it with a fresh
    /// metadata page if it does not exist. `min_degree` only applies to a new
    /// file; an existing file keeps the degree it was created with.
    pub fn open<P: AsRef<Path>>(db_path: P, min_degree: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(db_path.as_ref())?;

        let file_size = file.metadata()?.len();
        let mut num_writes = 0;

        let meta = if file_size == 0 {
            validate_min_degree(min_degree)?;
            let meta = MetaPage::new(min_degree as u32);
            Self::write_meta(&mut file, &meta)?;
            num_writes += 1;
            meta
        } else {
            let mut data = [0u8; PAGE_SIZE];
            Self::read_raw(&mut file, META_PAGE_ID, &mut data)?;
            let meta = MetaPage::decode(&data)?;

            validate_min_degree(meta.min_degree as usize).map_err(|e| {
                ArborError::InvalidDatabaseFile(format!("stored minimum degree: {}", e))
            })?;
            if meta.min_degree as usize != min_degree {
                tracing::warn!(
                    stored = meta.min_degree,
                    requested = min_degree,
                    "minimum degree is fixed at creation, keeping the stored value"
                );
            }
            if file_size < meta.page_count as u64 * PAGE_SIZE as u64 {
                return Err(ArborError::InvalidDatabaseFile(format!(
                    "file holds {} bytes but metadata records {} pages",
                    file_size, meta.page_count
                )));
            }
            meta
        };

        Ok(Self {
            db_file: Mutex::new(file),
            db_path: db_path.as_ref().to_path_buf(),
            meta: Mutex::new(meta),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(num_writes),
        })
    }

    /// Reads a page from disk into the provided buffer.
    /// The buffer must be exactly PAGE_SIZE bytes.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        if page_id.as_u32() >= self.get_num_pages() {
            return Err(ArborError::OutOfRange(page_id));
        }

        let mut file = self.db_file.lock();
        Self::read_raw(&mut file, page_id, data)?;

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer. Returns only after the
    /// data has reached the storage device.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        if page_id.as_u32() >= self.get_num_pages() {
            return Err(ArborError::OutOfRange(page_id));
        }

        let mut file = self.db_file.lock();
        Self::write_raw(&mut file, page_id, data)?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a page and returns its ID. Freed pages are reused first;
    /// otherwise the file grows by one zeroed page.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut meta = self.meta.lock();
        let mut file = self.db_file.lock();
        let zeros = [0u8; PAGE_SIZE];

        let page_id = match meta.free_list_head {
            Some(head) => {
                let mut data = [0u8; PAGE_SIZE];
                Self::read_raw(&mut file, head, &mut data)?;
                self.num_reads.fetch_add(1, Ordering::Relaxed);

                meta.free_list_head = FreePage::decode(head, &data)?;
                tracing::debug!(page_id = head.as_u32(), "reusing freed page");
                head
            }
            None => {
                let page_id = PageId::new(meta.page_count);
                meta.page_count += 1;
                page_id
            }
        };

        Self::write_raw(&mut file, page_id, &zeros)?;
        Self::write_meta(&mut file, &meta)?;
        self.num_writes.fetch_add(2, Ordering::Relaxed);

        Ok(page_id)
    }

    /// Returns a page to the free list. The page keeps its place in the file.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut meta = self.meta.lock();

        if page_id == META_PAGE_ID || page_id.as_u32() >= meta.page_count {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let mut data = [0u8; PAGE_SIZE];
        FreePage::encode(meta.free_list_head, &mut data);

        let mut file = self.db_file.lock();
        Self::write_raw(&mut file, page_id, &data)?;
        meta.free_list_head = Some(page_id);
        Self::write_meta(&mut file, &meta)?;
        self.num_writes.fetch_add(2, Ordering::Relaxed);

        Ok(())
    }

    /// Returns a copy of the metadata page.
    pub fn meta(&self) -> MetaPage {
        self.meta.lock().clone()
    }

    /// Applies `f` to the metadata page and writes it through to disk.
    pub fn update_meta<F: FnOnce(&mut MetaPage)>(&self, f: F) -> Result<()> {
        let mut meta = self.meta.lock();
        let mut updated = meta.clone();
        f(&mut updated);

        let mut file = self.db_file.lock();
        Self::write_meta(&mut file, &updated)?;
        self.num_writes.fetch_add(1, Ordering::Relaxed);

        *meta = updated;
        Ok(())
    }

    /// Discards every page but the metadata page. The stored minimum degree
    /// survives; the tree root and free list do not.
    pub fn reset(&self) -> Result<()> {
        let mut meta = self.meta.lock();
        let fresh = MetaPage::new(meta.min_degree);

        let mut file = self.db_file.lock();
        file.set_len(PAGE_SIZE as u64)?;
        Self::write_meta(&mut file, &fresh)?;
        self.num_writes.fetch_add(1, Ordering::Relaxed);

        *meta = fresh;
        Ok(())
    }

    /// Returns the number of pages in the file, including the metadata page.
    pub fn get_num_pages(&self) -> u32 {
        self.meta.lock().page_count
    }

    /// Returns the minimum degree recorded at creation.
    pub fn min_degree(&self) -> usize {
        self.meta.lock().min_degree as usize
    }

    /// Returns the number of disk reads performed.
    pub fn get_num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of disk writes performed.
    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Returns the path to the database file.
    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    /// Flushes file metadata to disk.
    pub fn sync(&self) -> Result<()> {
        let file = self.db_file.lock();
        file.sync_all()?;
        Ok(())
    }

    fn read_raw(file: &mut File, page_id: PageId, data: &mut [u8]) -> Result<()> {
        file.seek(SeekFrom::Start(page_id.offset()))
            .and_then(|_| file.read_exact(data))
            .map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => ArborError::OutOfRange(page_id),
                _ => ArborError::PageIo {
                    page_id,
                    op: "read",
                    source: e,
                },
            })
    }

    fn write_raw(file: &mut File, page_id: PageId, data: &[u8]) -> Result<()> {
        file.seek(SeekFrom::Start(page_id.offset()))
            .and_then(|_| file.write_all(data))
            .and_then(|_| file.sync_data())
            .map_err(|e| ArborError::PageIo {
                page_id,
                op: "write",
                source: e,
            })
    }

    fn write_meta(file: &mut File, meta: &MetaPage) -> Result<()> {
        let mut data = [0u8; PAGE_SIZE];
        meta.encode(&mut data);
        Self::write_raw(file, META_PAGE_ID, &data)
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let file = self.db_file.get_mut();
        if let Err(e) = file.sync_all() {
            tracing::error!(path = %self.db_path.display(), "failed to sync data file: {}", e);
        }
    }
}
