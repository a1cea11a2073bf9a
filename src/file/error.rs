use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File is open and cannot be removed: {0}")]
    FileIsOpen(String),

    #[error("Invalid file id: {0}")]
    InvalidFileId(usize),

    #[error("Page not cached: file={file}, page={page}")]
    PageNotCached { file: usize, page: usize },

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Page overflow: offset {offset} + {len} bytes exceeds page size")]
    PageOverflow { offset: usize, len: usize },

    #[error("Seek out of bounds: {0}")]
    SeekOutOfBounds(isize),

    #[error("Field overflow: {len} bytes do not fit a {width}-byte field")]
    FieldOverflow { len: usize, width: usize },

    #[error("Invalid buffer pool capacity: {0}")]
    InvalidCapacity(usize),

    #[error("File id limit reached")]
    TooManyOpenFiles,
}

pub type FileResult<T> = Result<T, FileError>;
