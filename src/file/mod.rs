mod buffer_manager;
mod error;
mod file_manager;
mod page_stream;
mod paged_file;
mod replacer;

pub use buffer_manager::BufferManager;
pub use error::{FileError, FileResult};
pub use file_manager::{FileId, FileManager};
pub use page_stream::{PageStream, PageValue};
pub use paged_file::PagedFile;
pub use replacer::{LruReplacer, SlotId};

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// log2(PAGE_SIZE); page `n` starts at byte `n << PAGE_SIZE_IDX`
pub const PAGE_SIZE_IDX: u32 = 13;

const _: () = assert!(1 << PAGE_SIZE_IDX == PAGE_SIZE);

/// Default number of buffer slots.
/// Slots are allocated lazily, so an idle pool costs only bookkeeping.
pub const BUF_CAP: usize = 10000;

/// Default bound on simultaneously open files (size of the file id pool)
pub const MAX_OPEN_FILES: usize = 512;

/// Page index within one file
pub type PageNo = usize;

/// Identifies one page of one open file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub file: FileId,
    pub page: PageNo,
}

impl PageId {
    pub fn new(file: FileId, page: PageNo) -> Self {
        Self { file, page }
    }

    /// Byte offset of the page inside its file
    pub fn byte_offset(&self) -> u64 {
        (self.page as u64) << PAGE_SIZE_IDX
    }
}
