use crate::common::{ArborError, Lsn, PageId, Result, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE};

const MAGIC_NUMBER: u32 = 0x4152_4252; // "ARBR"
const VERSION: u32 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const PAGE_SIZE_OFFSET: usize = 8;
const MIN_DEGREE_OFFSET: usize = 12;
const ROOT_PAGE_OFFSET: usize = 16;
const FREE_LIST_HEAD_OFFSET: usize = 20;
const PAGE_COUNT_OFFSET: usize = 24;
const APPLIED_LSN_OFFSET: usize = 28;
const STATE_OFFSET: usize = 36;

const FREE_PAGE_MAGIC: u32 = 0x4652_4545; // "FREE"

/// How the database was last left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// The data file reflects every log record up to `applied_lsn`.
    Clean,
    /// The engine was running; page write-backs since the last checkpoint may
    /// be partial, so the data file must be rebuilt from the log.
    InUse,
}

impl ShutdownState {
    fn as_u8(self) -> u8 {
        match self {
            ShutdownState::Clean => 1,
            ShutdownState::InUse => 2,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ShutdownState::Clean),
            2 => Ok(ShutdownState::InUse),
            other => Err(ArborError::InvalidDatabaseFile(format!(
                "unknown shutdown state {}",
                other
            ))),
        }
    }
}

/// Decoded contents of page 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaPage {
    pub min_degree: u32,
    pub root_page_id: PageId,
    pub free_list_head: Option<PageId>,
    /// Number of pages in the file, including page 0
    pub page_count: u32,
    /// Highest LSN whose effect the data file holds after a checkpoint
    pub applied_lsn: Lsn,
    pub state: ShutdownState,
}

impl MetaPage {
    /// Metadata for a freshly created file: only page 0 exists, no tree yet.
    pub fn new(min_degree: u32) -> Self {
        Self {
            min_degree,
            root_page_id: INVALID_PAGE_ID,
            free_list_head: None,
            page_count: 1,
            applied_lsn: INVALID_LSN,
            state: ShutdownState::InUse,
        }
    }

    pub fn encode(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.fill(0);
        put_u32(data, MAGIC_OFFSET, MAGIC_NUMBER);
        put_u32(data, VERSION_OFFSET, VERSION);
        put_u32(data, PAGE_SIZE_OFFSET, PAGE_SIZE as u32);
        put_u32(data, MIN_DEGREE_OFFSET, self.min_degree);
        put_u32(data, ROOT_PAGE_OFFSET, self.root_page_id.as_u32());
        put_u32(
            data,
            FREE_LIST_HEAD_OFFSET,
            self.free_list_head.unwrap_or(INVALID_PAGE_ID).as_u32(),
        );
        put_u32(data, PAGE_COUNT_OFFSET, self.page_count);
        data[APPLIED_LSN_OFFSET..APPLIED_LSN_OFFSET + 8]
            .copy_from_slice(&self.applied_lsn.to_le_bytes());
        data[STATE_OFFSET] = self.state.as_u8();
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        assert_eq!(data.len(), PAGE_SIZE);

        if get_u32(data, MAGIC_OFFSET) != MAGIC_NUMBER {
            return Err(ArborError::InvalidDatabaseFile("bad magic number".into()));
        }
        let version = get_u32(data, VERSION_OFFSET);
        if version != VERSION {
            return Err(ArborError::InvalidDatabaseFile(format!(
                "unsupported version {}",
                version
            )));
        }
        let page_size = get_u32(data, PAGE_SIZE_OFFSET);
        if page_size as usize != PAGE_SIZE {
            return Err(ArborError::InvalidDatabaseFile(format!(
                "file uses {}-byte pages, engine uses {}",
                page_size, PAGE_SIZE
            )));
        }

        let free_head = PageId::new(get_u32(data, FREE_LIST_HEAD_OFFSET));
        let applied_lsn = u64::from_le_bytes(
            data[APPLIED_LSN_OFFSET..APPLIED_LSN_OFFSET + 8]
                .try_into()
                .unwrap(),
        );

        Ok(Self {
            min_degree: get_u32(data, MIN_DEGREE_OFFSET),
            root_page_id: PageId::new(get_u32(data, ROOT_PAGE_OFFSET)),
            free_list_head: (free_head != INVALID_PAGE_ID).then_some(free_head),
            page_count: get_u32(data, PAGE_COUNT_OFFSET),
            applied_lsn,
            state: ShutdownState::from_u8(data[STATE_OFFSET])?,
        })
    }

    pub fn has_root(&self) -> bool {
        self.root_page_id != INVALID_PAGE_ID
    }
}

/// A deallocated page holds a link to the next free page.
pub struct FreePage;

impl FreePage {
    pub fn encode(next: Option<PageId>, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.fill(0);
        put_u32(data, 0, FREE_PAGE_MAGIC);
        put_u32(data, 4, next.unwrap_or(INVALID_PAGE_ID).as_u32());
    }

    pub fn decode(page_id: PageId, data: &[u8]) -> Result<Option<PageId>> {
        if get_u32(data, 0) != FREE_PAGE_MAGIC {
            return Err(ArborError::CorruptPage(format!(
                "{} is on the free list but carries no free-page marker",
                page_id
            )));
        }
        let next = PageId::new(get_u32(data, 4));
        Ok((next != INVALID_PAGE_ID).then_some(next))
    }
}

fn get_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
