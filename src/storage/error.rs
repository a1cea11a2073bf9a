use thiserror::Error;

use crate::allocator::AllocError;
use crate::btree::BTreeError;
use crate::config::ConfigError;
use crate::file::FileError;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced by the storage engine
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File error: {0}")]
    FileError(#[from] FileError),

    #[error("Allocator error: {0}")]
    AllocError(#[from] AllocError),

    #[error("B-tree error: {0}")]
    BTreeError(#[from] BTreeError),

    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Index already open: {0}")]
    IndexAlreadyOpen(String),

    #[error("Index not open: {0}")]
    IndexNotOpen(String),

    #[error("Index {0} was not created with a built-in key kind")]
    UnknownKeyKind(String),

    #[error("Heap not open: {0}")]
    HeapNotOpen(String),
}
