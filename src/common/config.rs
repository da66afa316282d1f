use super::error::{ArborError, Result};
use super::types::PageId;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Page 0 holds the database metadata and is never cached by the buffer pool
pub const META_PAGE_ID: PageId = PageId(0);

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default B-tree minimum degree (t). Nodes hold between t-1 and 2t-1 keys.
pub const DEFAULT_MIN_DEGREE: usize = 4;

/// Smallest minimum degree a B-tree can be built with
pub const MIN_MIN_DEGREE: usize = 2;

/// A minimum degree must leave at least this many bytes per leaf value
pub const MIN_VALUE_CAPACITY: usize = 8;

/// Log size (bytes) that triggers an automatic checkpoint
pub const DEFAULT_CHECKPOINT_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Smallest pool that can hold a parent, a child and a sibling at once
pub const MIN_BUFFER_POOL_SIZE: usize = 3;

/// File name of the page file inside the database directory
pub const DATA_FILE_NAME: &str = "arbor.db";

/// File name of the write-ahead log inside the database directory
pub const LOG_FILE_NAME: &str = "arbor.wal";

/// Largest value a leaf can store for the given minimum degree.
///
/// A full leaf holds `2t - 1` entries, each an 8-byte key plus a 4-byte length
/// prefix, after the 9-byte node header. Whatever remains is split evenly
/// between the entries.
pub fn max_value_len(min_degree: usize) -> usize {
    let max_keys = 2 * min_degree - 1;
    let fixed = 9 + max_keys * 12;
    PAGE_SIZE.saturating_sub(fixed) / max_keys
}

/// Runtime options for opening a database.
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of frames in the buffer pool
    pub pool_size: usize,
    /// B-tree minimum degree, only used when the database is created
    pub min_degree: usize,
    /// Log size in bytes after which a write triggers a checkpoint
    pub checkpoint_threshold: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_BUFFER_POOL_SIZE,
            min_degree: DEFAULT_MIN_DEGREE,
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
        }
    }
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Checks that the options describe a usable engine.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size < MIN_BUFFER_POOL_SIZE {
            return Err(ArborError::Config(format!(
                "pool size {} is below the minimum of {}",
                self.pool_size, MIN_BUFFER_POOL_SIZE
            )));
        }
        validate_min_degree(self.min_degree)
    }
}

/// Checks that a minimum degree is usable with the fixed page size.
pub fn validate_min_degree(min_degree: usize) -> Result<()> {
    if min_degree < MIN_MIN_DEGREE {
        return Err(ArborError::Config(format!(
            "minimum degree {} is below {}",
            min_degree, MIN_MIN_DEGREE
        )));
    }
    if max_value_len(min_degree) < MIN_VALUE_CAPACITY {
        return Err(ArborError::Config(format!(
            "minimum degree {} leaves only {} bytes per value",
            min_degree,
            max_value_len(min_degree)
        )));
    }
    Ok(())
}

/// Builder for Options
#[derive(Debug, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn pool_size(mut self, frames: usize) -> Self {
        self.options.pool_size = frames;
        self
    }

    pub fn min_degree(mut self, t: usize) -> Self {
        self.options.min_degree = t;
        self
    }

    pub fn checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.options.checkpoint_threshold = bytes;
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}
