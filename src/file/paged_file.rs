use super::buffer_manager::BufferManager;
use super::error::FileResult;
use super::file_manager::FileId;
use super::{PAGE_SIZE, PAGE_SIZE_IDX, PageId};

/// Byte-addressed view of a whole paged file.
///
/// Reads and writes may span several pages; every page is fetched through
/// the buffer pool, so writes are cached and written back lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagedFile {
    id: FileId,
}

impl PagedFile {
    pub fn new(id: FileId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    /// Write `bytes` starting at byte `offset`, returning the count written
    pub fn write_bytes(
        &self,
        buffer: &mut BufferManager,
        offset: u64,
        bytes: &[u8],
    ) -> FileResult<usize> {
        let mut done = 0;
        for (page, pos, len) in Self::chunks(offset, bytes.len()) {
            let data = buffer.get_page_mut(PageId::new(self.id, page))?;
            data[pos..pos + len].copy_from_slice(&bytes[done..done + len]);
            done += len;
        }
        Ok(done)
    }

    /// Fill `dst` from byte `offset`, returning the count read
    pub fn read_bytes(
        &self,
        buffer: &mut BufferManager,
        offset: u64,
        dst: &mut [u8],
    ) -> FileResult<usize> {
        let mut done = 0;
        for (page, pos, len) in Self::chunks(offset, dst.len()) {
            let data = buffer.get_page(PageId::new(self.id, page))?;
            dst[done..done + len].copy_from_slice(&data[pos..pos + len]);
            done += len;
        }
        Ok(done)
    }

    pub fn write_u64(&self, buffer: &mut BufferManager, offset: u64, value: u64) -> FileResult<()> {
        self.write_bytes(buffer, offset, &value.to_le_bytes())?;
        Ok(())
    }

    pub fn read_u64(&self, buffer: &mut BufferManager, offset: u64) -> FileResult<u64> {
        let mut raw = [0u8; 8];
        self.read_bytes(buffer, offset, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }

    /// Split a byte range into (page, offset in page, length) pieces
    fn chunks(offset: u64, len: usize) -> impl Iterator<Item = (usize, usize, usize)> {
        let mut cursor = offset;
        let end = offset + len as u64;
        std::iter::from_fn(move || {
            if cursor >= end {
                return None;
            }
            let page = (cursor >> PAGE_SIZE_IDX) as usize;
            let pos = (cursor & (PAGE_SIZE as u64 - 1)) as usize;
            let take = (PAGE_SIZE - pos).min((end - cursor) as usize);
            cursor += take as u64;
            Some((page, pos, take))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileManager;

    #[test]
    fn test_chunks_split_at_page_boundaries() {
        let pieces: Vec<_> = PagedFile::chunks(PAGE_SIZE as u64 - 4, PAGE_SIZE + 10).collect();
        assert_eq!(
            pieces,
            vec![(0, PAGE_SIZE - 4, 4), (1, 0, PAGE_SIZE), (2, 0, 6)]
        );
        assert_eq!(PagedFile::chunks(100, 0).count(), 0);
    }

    #[test]
    fn test_spanning_write_survives_write_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("span.db");

        let mut file_manager = FileManager::new();
        file_manager.create_file(&path).unwrap();
        let id = file_manager.open_file(&path).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 2).unwrap();
        let file = PagedFile::new(id);

        let payload: Vec<u8> = (0..3 * PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        let offset = 5000;
        assert_eq!(file.write_bytes(&mut bm, offset, &payload).unwrap(), payload.len());
        file.write_u64(&mut bm, 8, 0x0123_4567_89ab_cdef).unwrap();

        // Four pages were touched with only two slots, so some went to disk
        bm.flush_all().unwrap();

        let mut back = vec![0u8; payload.len()];
        file.read_bytes(&mut bm, offset, &mut back).unwrap();
        assert_eq!(back, payload);
        assert_eq!(file.read_u64(&mut bm, 8).unwrap(), 0x0123_4567_89ab_cdef);
    }
}
