pub mod allocator;
pub mod btree;
pub mod config;
pub mod file;
pub mod storage;

pub use allocator::{AllocError, AllocResult, BlockInfo, FileAllocator};
pub use btree::{BTree, BTreeError, BTreeResult, KeyCompare, KeyKind, Rid};
pub use config::{ConfigError, StorageConfig};
pub use file::{
    BufferManager, FileError, FileId, FileManager, FileResult, PAGE_SIZE, PageId, PageStream,
    PagedFile,
};
pub use storage::{IndexStats, Storage, StorageError, StorageResult};
