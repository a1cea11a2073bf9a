use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Allocation size must be positive")]
    ZeroSize,

    #[error("Allocation size {0} exceeds the largest block")]
    TooLarge(usize),

    #[error("Offset {0} is not an allocated block")]
    NotAllocated(u64),

    #[error("Double free at offset {0}")]
    DoubleFree(u64),

    #[error("Allocator file corrupted at offset {offset}: {reason}")]
    Corrupted { offset: u64, reason: String },
}

pub type AllocResult<T> = Result<T, AllocError>;
