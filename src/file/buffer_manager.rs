use ahash::AHashMap;
use log::{debug, trace};
use std::num::NonZeroUsize;

use super::error::{FileError, FileResult};
use super::file_manager::{FileId, FileManager};
use super::replacer::{LruReplacer, SlotId};
use super::{BUF_CAP, PAGE_SIZE, PageId};

/// One in-memory page buffer
#[derive(Default)]
struct Slot {
    /// Page bytes, allocated on first use and then recycled
    data: Option<Box<[u8]>>,
    /// Page currently held by this slot
    page: Option<PageId>,
    /// Whether the cached bytes are newer than the disk copy
    dirty: bool,
}

/// Write-back page cache over every file of one `FileManager`.
///
/// Borrowed page slices are only valid until the next call that may load a
/// page, which the borrow checker enforces.
pub struct BufferManager {
    /// Underlying file manager
    file_manager: FileManager,
    /// Fixed set of buffer slots
    slots: Vec<Slot>,
    /// Page table: which slot holds which page
    page_table: AHashMap<PageId, SlotId>,
    /// Eviction order over all slots
    replacer: LruReplacer,
}

impl BufferManager {
    /// Create a new buffer manager with `BUF_CAP` slots
    pub fn new(file_manager: FileManager) -> Self {
        Self::build(file_manager, NonZeroUsize::MIN.saturating_add(BUF_CAP - 1))
    }

    /// Create a new buffer manager with specified capacity
    pub fn with_capacity(file_manager: FileManager, capacity: usize) -> FileResult<Self> {
        let cap = NonZeroUsize::new(capacity).ok_or(FileError::InvalidCapacity(capacity))?;
        Ok(Self::build(file_manager, cap))
    }

    fn build(file_manager: FileManager, capacity: NonZeroUsize) -> Self {
        Self {
            file_manager,
            slots: (0..capacity.get()).map(|_| Slot::default()).collect(),
            page_table: AHashMap::with_capacity(capacity.get()),
            replacer: LruReplacer::new(capacity),
        }
    }

    /// Get a reference to the file manager
    pub fn file_manager(&self) -> &FileManager {
        &self.file_manager
    }

    /// Get a mutable reference to the file manager
    pub fn file_manager_mut(&mut self) -> &mut FileManager {
        &mut self.file_manager
    }

    /// Number of buffer slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Get a page, loading it from disk if necessary
    pub fn get_page(&mut self, page: PageId) -> FileResult<&[u8]> {
        let slot = self.fetch(page)?;
        Ok(self.slot_data(slot))
    }

    /// Get a mutable page, loading it if necessary.
    /// The page is marked dirty.
    pub fn get_page_mut(&mut self, page: PageId) -> FileResult<&mut [u8]> {
        let slot = self.fetch(page)?;
        self.slots[slot].dirty = true;
        Ok(self.slot_data_mut(slot))
    }

    /// Mark a cached page as dirty (modified)
    pub fn mark_dirty(&mut self, page: PageId) -> FileResult<()> {
        let slot = *self
            .page_table
            .get(&page)
            .ok_or(FileError::PageNotCached {
                file: page.file.as_usize(),
                page: page.page,
            })?;

        self.slots[slot].dirty = true;
        self.replacer.touch(slot);
        Ok(())
    }

    /// Flush a specific page to disk if it's dirty
    pub fn flush_page(&mut self, page: PageId) -> FileResult<()> {
        if let Some(&slot) = self.page_table.get(&page) {
            self.write_back(slot)?;
        }
        Ok(())
    }

    /// Flush all dirty pages to disk and sync the files
    pub fn flush_all(&mut self) -> FileResult<()> {
        for slot in 0..self.slots.len() {
            self.write_back(slot)?;
        }
        self.file_manager.sync_all()?;
        Ok(())
    }

    /// Write back and forget every cached page of one file.
    ///
    /// After this the file id may be closed and reused without later readers
    /// seeing stale pages of the old file.
    pub fn flush_file(&mut self, file: FileId) -> FileResult<()> {
        let mut slots: Vec<SlotId> = self
            .page_table
            .iter()
            .filter(|(page, _)| page.file == file)
            .map(|(_, &slot)| slot)
            .collect();
        slots.sort_unstable();

        for &slot in &slots {
            self.write_back(slot)?;
        }

        for slot in slots {
            if let Some(page) = self.slots[slot].page.take() {
                self.page_table.remove(&page);
            }
            self.replacer.free(slot);
        }

        debug!("flushed file {}", file.as_usize());
        Ok(())
    }

    /// Flush a file's pages and close it
    pub fn close_file(&mut self, file: FileId) -> FileResult<()> {
        self.flush_file(file)?;
        self.file_manager.close_file(file)
    }

    /// Get the number of pages currently in the buffer pool
    pub fn resident_pages(&self) -> usize {
        self.page_table.len()
    }

    /// Check if a page is in the buffer pool
    pub fn is_page_cached(&self, page: PageId) -> bool {
        self.page_table.contains_key(&page)
    }

    /// Get the number of dirty pages in the buffer pool
    pub fn dirty_page_count(&self) -> usize {
        self.slots.iter().filter(|s| s.dirty).count()
    }

    /// Resolve a page to its slot, loading it on a miss
    fn fetch(&mut self, page: PageId) -> FileResult<SlotId> {
        if let Some(&slot) = self.page_table.get(&page) {
            self.replacer.touch(slot);
            return Ok(slot);
        }

        let slot = self
            .replacer
            .victim()
            .ok_or(FileError::InvalidCapacity(0))?;

        // A dirty victim is always written back before reuse
        if let Some(old) = self.slots[slot].page {
            self.write_back(slot)?;
            self.page_table.remove(&old);
            self.slots[slot].page = None;
            trace!(
                "evicted page {} of file {} from slot {}",
                old.page,
                old.file.as_usize(),
                slot
            );
        }

        let data = self.slots[slot]
            .data
            .get_or_insert_with(|| vec![0u8; PAGE_SIZE].into_boxed_slice());
        self.file_manager.read_page(page, data)?;

        self.slots[slot].page = Some(page);
        self.page_table.insert(page, slot);
        self.replacer.touch(slot);
        Ok(slot)
    }

    fn write_back(&mut self, slot: SlotId) -> FileResult<()> {
        let entry = &mut self.slots[slot];
        if !entry.dirty {
            return Ok(());
        }
        if let (Some(page), Some(data)) = (entry.page, entry.data.as_deref()) {
            self.file_manager.write_page(page, data)?;
        }
        entry.dirty = false;
        Ok(())
    }

    fn slot_data(&self, slot: SlotId) -> &[u8] {
        self.slots[slot].data.as_deref().unwrap_or(&[])
    }

    fn slot_data_mut(&mut self, slot: SlotId) -> &mut [u8] {
        self.slots[slot].data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        // Flush all dirty pages when the buffer manager is dropped
        let _ = self.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_env(capacity: usize) -> (TempDir, BufferManager, FileId) {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = FileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let file = file_manager.open_file(&test_file).unwrap();

        let buffer_manager = BufferManager::with_capacity(file_manager, capacity).unwrap();

        (temp_dir, buffer_manager, file)
    }

    fn pid(file: FileId, page: usize) -> PageId {
        PageId::new(file, page)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = BufferManager::with_capacity(FileManager::new(), 0);
        assert!(matches!(result, Err(FileError::InvalidCapacity(0))));
    }

    #[test]
    fn test_get_page() {
        let (_temp_dir, mut bm, file) = setup_test_env(8);

        let mut write_buffer = vec![0u8; PAGE_SIZE];
        write_buffer[0] = 42;
        bm.file_manager_mut()
            .write_page(pid(file, 0), &write_buffer)
            .unwrap();

        let page = bm.get_page(pid(file, 0)).unwrap();
        assert_eq!(page[0], 42);
        assert_eq!(page.len(), PAGE_SIZE);
        assert_eq!(bm.resident_pages(), 1);
    }

    #[test]
    fn test_get_page_cached() {
        let (_temp_dir, mut bm, file) = setup_test_env(8);

        assert!(!bm.is_page_cached(pid(file, 0)));
        bm.get_page(pid(file, 0)).unwrap();
        assert!(bm.is_page_cached(pid(file, 0)));

        bm.get_page(pid(file, 0)).unwrap();
        assert_eq!(bm.resident_pages(), 1);
    }

    #[test]
    fn test_last_write_wins_in_cache() {
        let (_temp_dir, mut bm, file) = setup_test_env(8);

        for value in 1..=5u8 {
            bm.get_page_mut(pid(file, 3)).unwrap()[10] = value;
        }
        assert_eq!(bm.get_page(pid(file, 3)).unwrap()[10], 5);
        assert_eq!(bm.dirty_page_count(), 1);
    }

    #[test]
    fn test_mark_dirty() {
        let (_temp_dir, mut bm, file) = setup_test_env(8);

        bm.get_page(pid(file, 0)).unwrap();
        assert_eq!(bm.dirty_page_count(), 0);

        bm.mark_dirty(pid(file, 0)).unwrap();
        assert_eq!(bm.dirty_page_count(), 1);

        let result = bm.mark_dirty(pid(file, 9));
        assert!(matches!(result, Err(FileError::PageNotCached { .. })));
    }

    #[test]
    fn test_flush_page() {
        let (_temp_dir, mut bm, file) = setup_test_env(8);

        bm.get_page_mut(pid(file, 0)).unwrap()[0] = 55;
        assert_eq!(bm.dirty_page_count(), 1);

        bm.flush_page(pid(file, 0)).unwrap();
        assert_eq!(bm.dirty_page_count(), 0);

        let mut raw = vec![0u8; PAGE_SIZE];
        bm.file_manager_mut()
            .read_page(pid(file, 0), &mut raw)
            .unwrap();
        assert_eq!(raw[0], 55);
    }

    #[test]
    fn test_flush_all() {
        let (_temp_dir, mut bm, file) = setup_test_env(8);

        for i in 0..5 {
            bm.get_page_mut(pid(file, i)).unwrap()[0] = i as u8;
        }
        assert_eq!(bm.dirty_page_count(), 5);

        bm.flush_all().unwrap();
        assert_eq!(bm.dirty_page_count(), 0);

        for i in 0..5 {
            let mut raw = vec![0u8; PAGE_SIZE];
            bm.file_manager_mut()
                .read_page(pid(file, i), &mut raw)
                .unwrap();
            assert_eq!(raw[0], i as u8);
        }
    }

    #[test]
    fn test_lru_eviction() {
        let (_temp_dir, mut bm, file) = setup_test_env(3);

        bm.get_page(pid(file, 0)).unwrap();
        bm.get_page(pid(file, 1)).unwrap();
        bm.get_page(pid(file, 2)).unwrap();
        assert_eq!(bm.resident_pages(), 3);

        // Load a 4th page - should evict page 0 (LRU)
        bm.get_page(pid(file, 3)).unwrap();
        assert_eq!(bm.resident_pages(), 3);
        assert!(!bm.is_page_cached(pid(file, 0)));
        assert!(bm.is_page_cached(pid(file, 1)));
        assert!(bm.is_page_cached(pid(file, 2)));
        assert!(bm.is_page_cached(pid(file, 3)));
    }

    #[test]
    fn test_lru_update_on_access() {
        let (_temp_dir, mut bm, file) = setup_test_env(3);

        bm.get_page(pid(file, 0)).unwrap();
        bm.get_page(pid(file, 1)).unwrap();
        bm.get_page(pid(file, 2)).unwrap();

        // Access page 0 again to make it recently used
        bm.get_page(pid(file, 0)).unwrap();

        // Load a 4th page - should evict page 1 (now LRU)
        bm.get_page(pid(file, 3)).unwrap();
        assert!(bm.is_page_cached(pid(file, 0)));
        assert!(!bm.is_page_cached(pid(file, 1)));
        assert!(bm.is_page_cached(pid(file, 2)));
        assert!(bm.is_page_cached(pid(file, 3)));
    }

    #[test]
    fn test_mark_dirty_counts_as_use() {
        let (_temp_dir, mut bm, file) = setup_test_env(2);

        bm.get_page(pid(file, 0)).unwrap();
        bm.get_page(pid(file, 1)).unwrap();
        bm.mark_dirty(pid(file, 0)).unwrap();

        bm.get_page(pid(file, 2)).unwrap();
        assert!(bm.is_page_cached(pid(file, 0)));
        assert!(!bm.is_page_cached(pid(file, 1)));
    }

    #[test]
    fn test_dirty_page_written_back_on_eviction() {
        let (_temp_dir, mut bm, file) = setup_test_env(4);

        bm.get_page_mut(pid(file, 0)).unwrap()[0] = 77;

        // Fill the pool with other pages so page 0 is evicted
        for i in 1..=4 {
            bm.get_page(pid(file, i)).unwrap();
        }
        assert!(!bm.is_page_cached(pid(file, 0)));
        assert_eq!(bm.dirty_page_count(), 0);

        let page = bm.get_page(pid(file, 0)).unwrap();
        assert_eq!(page[0], 77);
    }

    #[test]
    fn test_multiple_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file1 = temp_dir.path().join("test1.db");
        let file2 = temp_dir.path().join("test2.db");

        let mut file_manager = FileManager::new();
        file_manager.create_file(&file1).unwrap();
        file_manager.create_file(&file2).unwrap();
        let id1 = file_manager.open_file(&file1).unwrap();
        let id2 = file_manager.open_file(&file2).unwrap();

        let mut bm = BufferManager::with_capacity(file_manager, 16).unwrap();

        bm.get_page_mut(pid(id1, 0)).unwrap()[0] = 11;
        bm.get_page_mut(pid(id2, 0)).unwrap()[0] = 22;

        assert_eq!(bm.get_page(pid(id1, 0)).unwrap()[0], 11);
        assert_eq!(bm.get_page(pid(id2, 0)).unwrap()[0], 22);
    }

    #[test]
    fn test_close_file_drops_cached_pages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file1 = temp_dir.path().join("one.db");
        let file2 = temp_dir.path().join("two.db");

        let mut file_manager = FileManager::new();
        file_manager.create_file(&file1).unwrap();
        file_manager.create_file(&file2).unwrap();
        let id1 = file_manager.open_file(&file1).unwrap();

        let mut bm = BufferManager::with_capacity(file_manager, 16).unwrap();
        bm.get_page_mut(pid(id1, 0)).unwrap()[0] = 1;
        bm.close_file(id1).unwrap();

        assert_eq!(bm.resident_pages(), 0);
        assert_eq!(bm.dirty_page_count(), 0);

        // The recycled id must not expose the old file's cached bytes
        let id2 = bm.file_manager_mut().open_file(&file2).unwrap();
        assert_eq!(id2, id1);
        assert_eq!(bm.get_page(pid(id2, 0)).unwrap()[0], 0);

        let id1 = bm.file_manager_mut().open_file(&file1).unwrap();
        assert_eq!(bm.get_page(pid(id1, 0)).unwrap()[0], 1);
    }

    #[test]
    fn test_drop_flushes_dirty_pages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = FileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let file = file_manager.open_file(&test_file).unwrap();

        {
            let mut bm = BufferManager::with_capacity(file_manager, 4).unwrap();
            bm.get_page_mut(pid(file, 0)).unwrap()[0] = 88;
            // bm is dropped here, should flush
        }

        let mut file_manager = FileManager::new();
        let file = file_manager.open_file(&test_file).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 4).unwrap();
        assert_eq!(bm.get_page(pid(file, 0)).unwrap()[0], 88);
    }
}
