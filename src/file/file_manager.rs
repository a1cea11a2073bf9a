use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::error::{FileError, FileResult};
use super::{MAX_OPEN_FILES, PAGE_SIZE, PageId};

/// Small integer naming an open file.
/// Ids are recycled once the file is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(usize);

impl FileId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Owns the OS handles of every open file and performs raw page I/O.
/// Never consults the buffer pool.
pub struct FileManager {
    /// Open files indexed by file id
    open_files: HashMap<FileId, FileEntry>,
    /// Reverse map used to make `open_file` idempotent
    path_to_id: HashMap<PathBuf, FileId>,
    /// Free file ids, popped from the back
    free_ids: Vec<usize>,
}

struct FileEntry {
    file: File,
    path: PathBuf,
}

impl FileManager {
    /// Create a new file manager
    pub fn new() -> Self {
        Self::with_max_files(MAX_OPEN_FILES)
    }

    /// Create a new file manager with specified max open files
    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: HashMap::new(),
            path_to_id: HashMap::new(),
            // Reversed so that the lowest ids are handed out first
            free_ids: (0..max_open_files).rev().collect(),
        }
    }

    /// Create an empty file. Creating a file that already exists is a no-op.
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        File::create(path)?;
        debug!("created file {}", path.display());
        Ok(())
    }

    /// Open an existing file. Opening an already open file returns its id.
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileId> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_ref.display().to_string()))?;

        if let Some(&id) = self.path_to_id.get(&path) {
            return Ok(id);
        }

        let raw_id = self.free_ids.pop().ok_or(FileError::TooManyOpenFiles)?;

        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) => {
                self.free_ids.push(raw_id);
                return Err(e.into());
            }
        };

        let id = FileId(raw_id);
        debug!("opened {} as file {}", path.display(), raw_id);
        self.open_files.insert(
            id,
            FileEntry {
                file,
                path: path.clone(),
            },
        );
        self.path_to_id.insert(path, id);

        Ok(id)
    }

    /// Close a file and release its id.
    /// Cached pages are not written back here; use `BufferManager::close_file`.
    pub fn close_file(&mut self, id: FileId) -> FileResult<()> {
        let entry = self
            .open_files
            .remove(&id)
            .ok_or(FileError::InvalidFileId(id.0))?;

        self.path_to_id.remove(&entry.path);
        self.free_ids.push(id.0);
        debug!("closed file {} ({})", id.0, entry.path.display());
        Ok(())
    }

    /// Remove (delete) a file. Fails while the file is open.
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        let Ok(canonical_path) = path.canonicalize() else {
            return Ok(());
        };

        if self.path_to_id.contains_key(&canonical_path) {
            return Err(FileError::FileIsOpen(path.display().to_string()));
        }

        std::fs::remove_file(&canonical_path)?;
        debug!("removed file {}", canonical_path.display());
        Ok(())
    }

    /// Read one whole page. Bytes past the end of the file read as zero.
    pub fn read_page(&mut self, page: PageId, buffer: &mut [u8]) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let entry = self.entry_mut(page.file)?;
        entry.file.seek(SeekFrom::Start(page.byte_offset()))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = entry.file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer[filled..].fill(0);

        Ok(())
    }

    /// Write one whole page, extending the file if necessary
    pub fn write_page(&mut self, page: PageId, buffer: &[u8]) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let entry = self.entry_mut(page.file)?;
        entry.file.seek(SeekFrom::Start(page.byte_offset()))?;
        entry.file.write_all(buffer)?;

        Ok(())
    }

    /// Get the number of pages in a file
    pub fn page_count(&mut self, id: FileId) -> FileResult<usize> {
        let entry = self.entry_mut(id)?;
        let file_size = entry.file.metadata()?.len();
        Ok(file_size.div_ceil(PAGE_SIZE as u64) as usize)
    }

    /// Sync all open files to disk
    pub fn sync_all(&mut self) -> FileResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    /// Check if a file is open
    pub fn is_open(&self, id: FileId) -> bool {
        self.open_files.contains_key(&id)
    }

    /// Canonical path of an open file
    pub fn file_path(&self, id: FileId) -> Option<&Path> {
        self.open_files.get(&id).map(|e| e.path.as_path())
    }

    /// Get the number of currently open files
    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    fn entry_mut(&mut self, id: FileId) -> FileResult<&mut FileEntry> {
        self.open_files
            .get_mut(&id)
            .ok_or(FileError::InvalidFileId(id.0))
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_create_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        assert!(manager.create_file(&test_file).is_ok());
        assert!(test_file.exists());
    }

    #[test]
    fn test_create_existing_file_is_noop() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        manager.create_file(&test_file).unwrap();
        let id = manager.open_file(&test_file).unwrap();
        manager
            .write_page(PageId::new(id, 0), &vec![7u8; PAGE_SIZE])
            .unwrap();

        manager.create_file(&test_file).unwrap();
        assert_eq!(manager.page_count(id).unwrap(), 1);
    }

    #[test]
    fn test_open_close_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        manager.create_file(&test_file).unwrap();
        let id = manager.open_file(&test_file).unwrap();
        assert!(manager.is_open(id));

        manager.close_file(id).unwrap();
        assert!(!manager.is_open(id));
        assert!(matches!(
            manager.close_file(id),
            Err(FileError::InvalidFileId(_))
        ));
    }

    #[test]
    fn test_open_nonexistent_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("nonexistent.db");
        let mut manager = FileManager::new();

        let result = manager.open_file(&test_file);
        assert!(matches!(result, Err(FileError::FileNotFound(_))));
    }

    #[test]
    fn test_open_same_file_twice() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        manager.create_file(&test_file).unwrap();
        let id1 = manager.open_file(&test_file).unwrap();
        let id2 = manager.open_file(&test_file).unwrap();

        assert_eq!(id1, id2);
        assert_eq!(manager.open_file_count(), 1);
    }

    #[test]
    fn test_file_ids_are_recycled() {
        let temp_dir = setup_test_dir();
        let file1 = temp_dir.path().join("a.db");
        let file2 = temp_dir.path().join("b.db");
        let mut manager = FileManager::new();

        manager.create_file(&file1).unwrap();
        manager.create_file(&file2).unwrap();

        let id1 = manager.open_file(&file1).unwrap();
        assert_eq!(id1.as_usize(), 0);
        manager.close_file(id1).unwrap();

        let id2 = manager.open_file(&file2).unwrap();
        assert_eq!(id2, id1);
    }

    #[test]
    fn test_read_write_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        manager.create_file(&test_file).unwrap();
        let id = manager.open_file(&test_file).unwrap();

        let mut write_buffer = vec![0u8; PAGE_SIZE];
        write_buffer[0] = 42;
        write_buffer[100] = 99;
        write_buffer[PAGE_SIZE - 1] = 255;

        manager.write_page(PageId::new(id, 0), &write_buffer).unwrap();

        let mut read_buffer = vec![0u8; PAGE_SIZE];
        manager
            .read_page(PageId::new(id, 0), &mut read_buffer)
            .unwrap();

        assert_eq!(read_buffer, write_buffer);
    }

    #[test]
    fn test_pages_land_at_shifted_offsets() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        manager.create_file(&test_file).unwrap();
        let id = manager.open_file(&test_file).unwrap();

        for page in 0..10 {
            let mut buffer = vec![0u8; PAGE_SIZE];
            buffer[0] = page as u8;
            manager.write_page(PageId::new(id, page), &buffer).unwrap();
        }
        manager.sync_all().unwrap();

        let raw = std::fs::read(&test_file).unwrap();
        assert_eq!(raw.len(), 10 * PAGE_SIZE);
        for page in 0..10usize {
            assert_eq!(raw[page << crate::file::PAGE_SIZE_IDX], page as u8);
        }
    }

    #[test]
    fn test_read_nonexistent_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        manager.create_file(&test_file).unwrap();
        let id = manager.open_file(&test_file).unwrap();

        let mut buffer = vec![1u8; PAGE_SIZE];
        manager.read_page(PageId::new(id, 100), &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_page_count() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        manager.create_file(&test_file).unwrap();
        let id = manager.open_file(&test_file).unwrap();

        assert_eq!(manager.page_count(id).unwrap(), 0);

        let buffer = vec![0u8; PAGE_SIZE];
        manager.write_page(PageId::new(id, 0), &buffer).unwrap();
        assert_eq!(manager.page_count(id).unwrap(), 1);

        manager.write_page(PageId::new(id, 5), &buffer).unwrap();
        assert_eq!(manager.page_count(id).unwrap(), 6);
    }

    #[test]
    fn test_remove_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        manager.create_file(&test_file).unwrap();
        assert!(test_file.exists());

        manager.remove_file(&test_file).unwrap();
        assert!(!test_file.exists());
    }

    #[test]
    fn test_remove_open_file_fails() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        manager.create_file(&test_file).unwrap();
        let id = manager.open_file(&test_file).unwrap();

        let result = manager.remove_file(&test_file);
        assert!(matches!(result, Err(FileError::FileIsOpen(_))));
        assert!(test_file.exists());

        manager.close_file(id).unwrap();
        manager.remove_file(&test_file).unwrap();
        assert!(!test_file.exists());
    }

    #[test]
    fn test_invalid_buffer_size() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = FileManager::new();

        manager.create_file(&test_file).unwrap();
        let id = manager.open_file(&test_file).unwrap();

        let mut small_buffer = vec![0u8; PAGE_SIZE - 1];
        let result = manager.read_page(PageId::new(id, 0), &mut small_buffer);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));

        let large_buffer = vec![0u8; PAGE_SIZE + 1];
        let result = manager.write_page(PageId::new(id, 0), &large_buffer);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));
    }

    #[test]
    fn test_max_open_files() {
        let temp_dir = setup_test_dir();
        let mut manager = FileManager::with_max_files(2);

        let file1 = temp_dir.path().join("test1.db");
        let file2 = temp_dir.path().join("test2.db");
        let file3 = temp_dir.path().join("test3.db");

        manager.create_file(&file1).unwrap();
        manager.create_file(&file2).unwrap();
        manager.create_file(&file3).unwrap();

        let id1 = manager.open_file(&file1).unwrap();
        manager.open_file(&file2).unwrap();

        let result = manager.open_file(&file3);
        assert!(matches!(result, Err(FileError::TooManyOpenFiles)));

        manager.close_file(id1).unwrap();
        assert!(manager.open_file(&file3).is_ok());
    }
}
