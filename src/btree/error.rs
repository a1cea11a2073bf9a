use std::io;
use thiserror::Error;

use crate::file::FileError;

/// Errors that can occur during B-tree operations
#[derive(Debug, Error)]
pub enum BTreeError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Entry already exists: rid={0}")]
    EntryExists(u64),

    #[error("Entry does not exist: rid={0}")]
    EntryNotFound(u64),

    #[error("Key is {len} bytes but the index stores {width}-byte keys")]
    KeyWidth { len: usize, width: usize },

    #[error("Unsupported key width {0}")]
    InvalidKeyWidth(usize),

    #[error("Invalid minimum degree: {0} (must be >= 2)")]
    InvalidDegree(usize),

    #[error("Corrupted tree at block {block}: {reason}")]
    Corrupted { block: u64, reason: String },
}

pub type BTreeResult<T> = Result<T, BTreeError>;
