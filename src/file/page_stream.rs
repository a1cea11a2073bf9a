use super::buffer_manager::BufferManager;
use super::error::{FileError, FileResult};
use super::{PAGE_SIZE, PageId};

/// Fixed-width scalar stored little-endian inside a page
pub trait PageValue: Sized {
    const SIZE: usize;

    fn encode(&self, out: &mut [u8]);

    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_page_value {
    ($($t:ty),*) => {
        $(
            impl PageValue for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn encode(&self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_page_value!(u8, u16, u32, u64, i32, i64, f64);

/// Cursor over one cached page.
///
/// Every access goes back through the buffer manager, so the page is
/// re-acquired (and reloaded if it was evicted) on each call. Writes mark the
/// page dirty. Accesses crossing the page end fail instead of truncating.
pub struct PageStream<'a> {
    buffer: &'a mut BufferManager,
    page: PageId,
    offset: usize,
}

impl<'a> PageStream<'a> {
    pub fn new(buffer: &'a mut BufferManager, page: PageId) -> Self {
        Self {
            buffer,
            page,
            offset: 0,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    /// Bytes left before the end of the page
    pub fn remaining(&self) -> usize {
        PAGE_SIZE - self.offset
    }

    /// Seek to an absolute position in `[0, PAGE_SIZE]`
    pub fn seek(&mut self, pos: usize) -> FileResult<&mut Self> {
        if pos > PAGE_SIZE {
            return Err(FileError::SeekOutOfBounds(pos as isize));
        }
        self.offset = pos;
        Ok(self)
    }

    /// Seek relative to the current position
    pub fn seek_by(&mut self, delta: isize) -> FileResult<&mut Self> {
        let target = self.offset as isize + delta;
        if target < 0 || target as usize > PAGE_SIZE {
            return Err(FileError::SeekOutOfBounds(target));
        }
        self.offset = target as usize;
        Ok(self)
    }

    /// Read a scalar at the cursor and advance
    pub fn read<T: PageValue>(&mut self) -> FileResult<T> {
        let value = self.read_at(self.offset)?;
        self.offset += T::SIZE;
        Ok(value)
    }

    /// Write a scalar at the cursor and advance
    pub fn write<T: PageValue>(&mut self, value: T) -> FileResult<&mut Self> {
        self.write_at(self.offset, value)?;
        self.offset += T::SIZE;
        Ok(self)
    }

    /// Read a scalar at an absolute offset without moving the cursor
    pub fn read_at<T: PageValue>(&mut self, offset: usize) -> FileResult<T> {
        check_range(offset, T::SIZE)?;
        let page = self.buffer.get_page(self.page)?;
        Ok(T::decode(&page[offset..offset + T::SIZE]))
    }

    /// Write a scalar at an absolute offset without moving the cursor
    pub fn write_at<T: PageValue>(&mut self, offset: usize, value: T) -> FileResult<()> {
        check_range(offset, T::SIZE)?;
        let page = self.buffer.get_page_mut(self.page)?;
        value.encode(&mut page[offset..offset + T::SIZE]);
        Ok(())
    }

    /// Read `n` bytes at the cursor and advance
    pub fn read_bytes(&mut self, n: usize) -> FileResult<Vec<u8>> {
        let mut out = vec![0u8; n];
        self.read_into(&mut out)?;
        Ok(out)
    }

    /// Fill `dst` from the cursor and advance
    pub fn read_into(&mut self, dst: &mut [u8]) -> FileResult<&mut Self> {
        check_range(self.offset, dst.len())?;
        let page = self.buffer.get_page(self.page)?;
        dst.copy_from_slice(&page[self.offset..self.offset + dst.len()]);
        self.offset += dst.len();
        Ok(self)
    }

    /// Write `bytes` into a field of `width` bytes, zero-padding the rest
    pub fn write_bytes(&mut self, bytes: &[u8], width: usize) -> FileResult<&mut Self> {
        if bytes.len() > width {
            return Err(FileError::FieldOverflow {
                len: bytes.len(),
                width,
            });
        }
        check_range(self.offset, width)?;
        let start = self.offset;
        let page = self.buffer.get_page_mut(self.page)?;
        page[start..start + bytes.len()].copy_from_slice(bytes);
        page[start + bytes.len()..start + width].fill(0);
        self.offset += width;
        Ok(self)
    }

    /// Fill `n` bytes with `byte` and advance
    pub fn fill(&mut self, byte: u8, n: usize) -> FileResult<&mut Self> {
        check_range(self.offset, n)?;
        let start = self.offset;
        let page = self.buffer.get_page_mut(self.page)?;
        page[start..start + n].fill(byte);
        self.offset += n;
        Ok(self)
    }
}

fn check_range(offset: usize, len: usize) -> FileResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= PAGE_SIZE => Ok(()),
        _ => Err(FileError::PageOverflow { offset, len }),
    }
}
