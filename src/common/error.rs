use thiserror::Error;

use super::types::{Key, PageId};

/// Database error types
#[derive(Error, Debug)]
pub enum ArborError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error during {op} of page {page_id}: {source}")]
    PageIo {
        page_id: PageId,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Page {0} is beyond the end of the data file")]
    OutOfRange(PageId),

    #[error("Corrupt page: {0}")]
    CorruptPage(String),

    #[error("Buffer pool exhausted, every frame is pinned")]
    PoolExhausted,

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Unpin of page {0} which is not pinned")]
    InvalidUnpin(PageId),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Key {0} not found")]
    KeyNotFound(Key),

    #[error("Value of {len} bytes exceeds the maximum of {max}")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Log corruption at offset {offset}: {reason}")]
    LogCorruption { offset: u64, reason: String },

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),
}

impl ArborError {
    /// Attaches the page id to a codec error raised while decoding that page.
    pub fn at_page(self, page_id: PageId) -> Self {
        match self {
            ArborError::CorruptPage(reason) => {
                ArborError::CorruptPage(format!("{}: {}", page_id, reason))
            }
            other => other,
        }
    }

    /// Errors that leave the engine usable; the caller may retry or report them.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ArborError::PoolExhausted
                | ArborError::KeyNotFound(_)
                | ArborError::ValueTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ArborError>;
