//! Free-list byte allocator for variable-length values
//!
//! Works directly on its own file without going through the buffer pool.
//! The file starts with a reserved header of `DATA_OFFSET` bytes followed by
//! an always-allocated sentinel tag, then a chain of blocks:
//!
//! ```text
//! [tag size|flag][payload, size bytes][tag size|flag]
//! ```
//!
//! Both tags of a block always agree, which lets `free` find and merge the
//! neighbouring blocks in constant time. The end of the file behaves like an
//! unbounded free block.

mod error;
mod tag;

pub use error::{AllocError, AllocResult};
pub use tag::{MAX_BLOCK_SIZE, TAG_SIZE, Tag};

use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Bytes reserved at the start of the file
pub const DATA_OFFSET: u64 = 1024;

/// Block payloads are rounded up to this many bytes
pub const ALIGN_SIZE: u64 = 8;

/// Position of the first block's leading tag
const FIRST_BLOCK: u64 = DATA_OFFSET + TAG_SIZE;

/// One block as seen by `blocks()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Payload offset (what `allocate` returns)
    pub offset: u64,
    pub size: u32,
    pub allocated: bool,
}

/// Boundary-tag allocator over a single file.
/// Writing past the end of an allocated block corrupts the chain.
pub struct FileAllocator {
    file: File,
}

impl FileAllocator {
    /// Open an allocator file, initialising it if it does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> AllocResult<Self> {
        let path = path.as_ref();

        if path.exists() {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            return Ok(Self { file });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut allocator = Self { file };
        allocator.write_tag(DATA_OFFSET, Tag::used(0))?;
        debug!("initialised allocator file {}", path.display());
        Ok(allocator)
    }

    /// Allocate at least `size` bytes, optionally filling them with `data`.
    /// Returns the offset of the payload.
    pub fn allocate(&mut self, size: usize, data: Option<&[u8]>) -> AllocResult<u64> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let size = (size as u64).next_multiple_of(ALIGN_SIZE);
        if size > MAX_BLOCK_SIZE as u64 {
            return Err(AllocError::TooLarge(size as usize));
        }

        // First fit; the end of the file is an exact-size free block
        let mut pos = FIRST_BLOCK;
        let found = loop {
            match self.read_tag(pos)? {
                None => break Tag::free(size as u32),
                Some(tag) if !tag.allocated && tag.size as u64 >= size => break tag,
                Some(tag) => pos += tag.size as u64 + 2 * TAG_SIZE,
            }
        };
        let payload = pos + TAG_SIZE;

        if (found.size as u64) < size + 2 * TAG_SIZE + ALIGN_SIZE {
            // Too small to split, hand out the whole block
            self.write_tag(pos, Tag::used(found.size))?;
            self.write_tag(payload + found.size as u64, Tag::used(found.size))?;
        } else {
            let rest = found.size as u64 - size - 2 * TAG_SIZE;
            let rest_pos = payload + size + TAG_SIZE;
            self.write_tag(pos, Tag::used(size as u32))?;
            self.write_tag(payload + size, Tag::used(size as u32))?;
            self.write_tag(rest_pos, Tag::free(rest as u32))?;
            self.write_tag(rest_pos + TAG_SIZE + rest, Tag::free(rest as u32))?;
        }

        if let Some(data) = data {
            self.write(payload, data)?;
        }

        Ok(payload)
    }

    /// Read up to `max_size` bytes of the block at `offset`
    pub fn read(&mut self, offset: u64, max_size: usize) -> AllocResult<Vec<u8>> {
        let tag = self.allocated_tag(offset)?;
        let len = max_size.min(tag.size as usize);
        let mut out = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut out)?;
        Ok(out)
    }

    /// Read the whole payload of the block at `offset`
    pub fn read_block(&mut self, offset: u64) -> AllocResult<Vec<u8>> {
        self.read(offset, usize::MAX)
    }

    /// Write `data` into the block at `offset`, clamped to the block size.
    /// Returns the number of bytes written.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> AllocResult<usize> {
        let tag = self.allocated_tag(offset)?;
        let len = data.len().min(tag.size as usize);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&data[..len])?;
        Ok(len)
    }

    /// Release the block at `offset`, merging it with free neighbours.
    /// A second free of the same block fails and changes nothing.
    pub fn free(&mut self, offset: u64) -> AllocResult<()> {
        if offset < FIRST_BLOCK + TAG_SIZE {
            return Err(AllocError::NotAllocated(offset));
        }
        let lead = offset - TAG_SIZE;
        let own = self
            .read_tag(lead)?
            .ok_or(AllocError::NotAllocated(offset))?;
        if !own.allocated {
            warn!("double free at offset {}", offset);
            return Err(AllocError::DoubleFree(offset));
        }

        let mut start = lead;
        let mut size = own.size as u64;

        let prev = self.read_tag(lead - TAG_SIZE)?.ok_or_else(|| AllocError::Corrupted {
            offset: lead - TAG_SIZE,
            reason: "missing trailing tag of previous block".to_string(),
        })?;
        if !prev.allocated {
            start -= prev.size as u64 + 2 * TAG_SIZE;
            size += prev.size as u64 + 2 * TAG_SIZE;
        }

        if let Some(next) = self.read_tag(offset + own.size as u64 + TAG_SIZE)?
            && !next.allocated
        {
            size += next.size as u64 + 2 * TAG_SIZE;
        }

        let size = u32::try_from(size)
            .ok()
            .filter(|&s| s <= MAX_BLOCK_SIZE)
            .ok_or_else(|| AllocError::Corrupted {
                offset: start,
                reason: format!("merged block of {} bytes is too large", size),
            })?;
        self.write_tag(start, Tag::free(size))?;
        self.write_tag(start + TAG_SIZE + size as u64, Tag::free(size))?;
        Ok(())
    }

    /// Validate the whole block chain
    pub fn check(&mut self) -> AllocResult<()> {
        self.blocks().map(|_| ())
    }

    /// Walk the block chain, validating it on the way
    pub fn blocks(&mut self) -> AllocResult<Vec<BlockInfo>> {
        let sentinel = self.read_tag(DATA_OFFSET)?;
        if sentinel != Some(Tag::used(0)) {
            return Err(AllocError::Corrupted {
                offset: DATA_OFFSET,
                reason: "bad header tag".to_string(),
            });
        }

        let mut blocks = Vec::new();
        let mut prev_free = false;
        let mut pos = FIRST_BLOCK;
        while let Some(lead) = self.read_tag(pos)? {
            if !lead.allocated && prev_free {
                return Err(AllocError::Corrupted {
                    offset: pos,
                    reason: "adjacent free blocks were not merged".to_string(),
                });
            }
            let trail_pos = pos + TAG_SIZE + lead.size as u64;
            let trail = self.read_tag(trail_pos)?;
            if trail != Some(lead) {
                return Err(AllocError::Corrupted {
                    offset: trail_pos,
                    reason: "leading and trailing tags disagree".to_string(),
                });
            }
            blocks.push(BlockInfo {
                offset: pos + TAG_SIZE,
                size: lead.size,
                allocated: lead.allocated,
            });
            prev_free = !lead.allocated;
            pos = trail_pos + TAG_SIZE;
        }
        Ok(blocks)
    }

    /// Trailing free space is never returned to the file system
    pub fn shrink(&mut self) -> u64 {
        0
    }

    /// Sync the file to disk
    pub fn flush(&mut self) -> AllocResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn allocated_tag(&mut self, offset: u64) -> AllocResult<Tag> {
        if offset < FIRST_BLOCK + TAG_SIZE {
            return Err(AllocError::NotAllocated(offset));
        }
        match self.read_tag(offset - TAG_SIZE)? {
            Some(tag) if tag.allocated => Ok(tag),
            _ => Err(AllocError::NotAllocated(offset)),
        }
    }

    /// Read the tag at `pos`; `None` at the end of the file
    fn read_tag(&mut self, pos: u64) -> AllocResult<Option<Tag>> {
        self.file.seek(SeekFrom::Start(pos))?;
        let mut raw = [0u8; TAG_SIZE as usize];
        let mut filled = 0;
        while filled < raw.len() {
            match self.file.read(&mut raw[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => Ok(None),
            n if n == raw.len() => Ok(Some(Tag::decode(raw))),
            _ => Err(AllocError::Corrupted {
                offset: pos,
                reason: "truncated tag".to_string(),
            }),
        }
    }

    fn write_tag(&mut self, pos: u64, tag: Tag) -> AllocResult<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(&tag.encode())?;
        Ok(())
    }
}
