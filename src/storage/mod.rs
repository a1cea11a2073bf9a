//! Composition root of the storage engine
//!
//! One `Storage` owns the single `FileManager`/`BufferManager` pair and every
//! open index and heap, all living under the configured data directory.

mod error;

pub use error::{StorageError, StorageResult};

use log::{debug, warn};
use std::collections::HashMap;
use std::ops::Bound;
use std::path::PathBuf;

use crate::allocator::FileAllocator;
use crate::btree::{self, BTree, KeyKind, Rid};
use crate::config::StorageConfig;
use crate::file::{BufferManager, FileId, FileManager, PagedFile};

/// Summary reported by `Storage::check_index`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub height: usize,
    pub entries: u64,
    pub degree: usize,
    pub key_width: usize,
}

/// Storage engine: paged files, B-tree indexes and variable-length heaps
pub struct Storage {
    config: StorageConfig,
    buffer: BufferManager,
    /// Open indexes by name
    indexes: HashMap<String, BTree>,
    /// Open heap (allocator) files by name
    heaps: HashMap<String, FileAllocator>,
}

impl Storage {
    /// Build the engine described by `config`, creating the data directory
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let file_manager = FileManager::with_max_files(config.max_open_files);
        let buffer = BufferManager::with_capacity(file_manager, config.buffer_capacity)?;
        debug!(
            "storage opened at {} ({} buffer slots)",
            config.data_dir.display(),
            config.buffer_capacity
        );

        Ok(Self {
            config,
            buffer,
            indexes: HashMap::new(),
            heaps: HashMap::new(),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn buffer(&self) -> &BufferManager {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut BufferManager {
        &mut self.buffer
    }

    fn path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    fn heap_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(format!("{}.heap", name))
    }

    // ==================== Paged files ====================

    pub fn create_file(&mut self, name: &str) -> StorageResult<()> {
        let path = self.path(name);
        self.buffer.file_manager_mut().create_file(path)?;
        Ok(())
    }

    /// Open a paged file; reopening returns the same id
    pub fn open_file(&mut self, name: &str) -> StorageResult<FileId> {
        let path = self.path(name);
        Ok(self.buffer.file_manager_mut().open_file(path)?)
    }

    /// Write back the file's cached pages and close it
    pub fn close_file(&mut self, file: FileId) -> StorageResult<()> {
        self.buffer.close_file(file)?;
        Ok(())
    }

    pub fn remove_file(&mut self, name: &str) -> StorageResult<()> {
        let path = self.path(name);
        self.buffer.file_manager_mut().remove_file(path)?;
        Ok(())
    }

    /// Open (creating if needed) a paged file for byte-offset access
    pub fn paged_file(&mut self, name: &str) -> StorageResult<PagedFile> {
        self.create_file(name)?;
        Ok(PagedFile::new(self.open_file(name)?))
    }

    // ==================== Indexes ====================

    /// Create an index with one of the built-in key kinds and leave it open
    pub fn create_index(&mut self, name: &str, kind: KeyKind) -> StorageResult<()> {
        if self.indexes.contains_key(name) {
            return Err(StorageError::IndexAlreadyOpen(name.to_string()));
        }
        let tree = BTree::create(
            &mut self.buffer,
            &self.config.data_dir,
            name,
            kind.width(),
            kind,
            self.config.btree_max_degree,
        )?;
        self.indexes.insert(name.to_string(), tree);
        Ok(())
    }

    /// Open an existing index; opening an open index does nothing
    pub fn open_index(&mut self, name: &str) -> StorageResult<()> {
        if self.indexes.contains_key(name) {
            return Ok(());
        }
        let meta = btree::read_index_meta(&self.config.data_dir, name)?;
        let kind = meta
            .kind
            .ok_or_else(|| StorageError::UnknownKeyKind(name.to_string()))?;
        let tree = BTree::open(&mut self.buffer, &self.config.data_dir, name, kind)?;
        self.indexes.insert(name.to_string(), tree);
        Ok(())
    }

    pub fn close_index(&mut self, name: &str) -> StorageResult<()> {
        if let Some(tree) = self.indexes.remove(name) {
            tree.close(&mut self.buffer)?;
        }
        Ok(())
    }

    /// Close the index if open and delete its files
    pub fn drop_index(&mut self, name: &str) -> StorageResult<()> {
        self.close_index(name)?;
        btree::remove_index_files(&mut self.buffer, &self.config.data_dir, name)?;
        debug!("dropped index {}", name);
        Ok(())
    }

    pub fn index(&self, name: &str) -> StorageResult<&BTree> {
        self.indexes
            .get(name)
            .ok_or_else(|| StorageError::IndexNotOpen(name.to_string()))
    }

    pub fn index_insert(&mut self, name: &str, key: &[u8], rid: Rid) -> StorageResult<()> {
        let tree = self
            .indexes
            .get_mut(name)
            .ok_or_else(|| StorageError::IndexNotOpen(name.to_string()))?;
        tree.insert(&mut self.buffer, key, rid)?;
        Ok(())
    }

    pub fn index_delete(&mut self, name: &str, key: &[u8], rid: Rid) -> StorageResult<()> {
        let tree = self
            .indexes
            .get_mut(name)
            .ok_or_else(|| StorageError::IndexNotOpen(name.to_string()))?;
        tree.delete(&mut self.buffer, key, rid)?;
        Ok(())
    }

    pub fn index_range(
        &mut self,
        name: &str,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
        limit: usize,
    ) -> StorageResult<Vec<Rid>> {
        let tree = self
            .indexes
            .get(name)
            .ok_or_else(|| StorageError::IndexNotOpen(name.to_string()))?;
        Ok(tree.range_query(&mut self.buffer, lo, hi, limit)?)
    }

    pub fn index_query_eq(&mut self, name: &str, key: &[u8]) -> StorageResult<Vec<Rid>> {
        self.index_range(name, Bound::Included(key), Bound::Included(key), usize::MAX)
    }

    /// Verify an open index and report its shape
    pub fn check_index(&mut self, name: &str) -> StorageResult<IndexStats> {
        let tree = self
            .indexes
            .get(name)
            .ok_or_else(|| StorageError::IndexNotOpen(name.to_string()))?;
        tree.check(&mut self.buffer)?;
        let layout = tree.layout();
        Ok(IndexStats {
            height: tree.height(&mut self.buffer)?,
            entries: tree.len(),
            degree: layout.degree,
            key_width: layout.key_width,
        })
    }

    // ==================== Heaps ====================

    /// Open (creating if needed) the heap file `name`
    pub fn open_heap(&mut self, name: &str) -> StorageResult<()> {
        if !self.heaps.contains_key(name) {
            let allocator = FileAllocator::open(self.heap_path(name))?;
            self.heaps.insert(name.to_string(), allocator);
        }
        Ok(())
    }

    pub fn close_heap(&mut self, name: &str) -> StorageResult<()> {
        if let Some(mut allocator) = self.heaps.remove(name) {
            allocator.flush()?;
        }
        Ok(())
    }

    /// Store `data` in a fresh block of heap `name`, returning its offset
    pub fn allocate(&mut self, name: &str, data: &[u8]) -> StorageResult<u64> {
        Ok(self.heap_mut(name)?.allocate(data.len(), Some(data))?)
    }

    /// Read the whole block at `offset`
    pub fn read(&mut self, name: &str, offset: u64) -> StorageResult<Vec<u8>> {
        Ok(self.heap_mut(name)?.read_block(offset)?)
    }

    pub fn write(&mut self, name: &str, offset: u64, data: &[u8]) -> StorageResult<usize> {
        Ok(self.heap_mut(name)?.write(offset, data)?)
    }

    pub fn free(&mut self, name: &str, offset: u64) -> StorageResult<()> {
        self.heap_mut(name)?.free(offset)?;
        Ok(())
    }

    fn heap_mut(&mut self, name: &str) -> StorageResult<&mut FileAllocator> {
        self.heaps
            .get_mut(name)
            .ok_or_else(|| StorageError::HeapNotOpen(name.to_string()))
    }

    // ==================== Lifecycle ====================

    /// Persist index bookkeeping, write back every dirty page and sync heaps
    pub fn flush(&mut self) -> StorageResult<()> {
        for tree in self.indexes.values() {
            tree.flush(&mut self.buffer)?;
        }
        self.buffer.flush_all()?;
        for allocator in self.heaps.values_mut() {
            allocator.flush()?;
        }
        Ok(())
    }

    /// Close every index and heap, then flush the buffer pool
    pub fn close_all(&mut self) -> StorageResult<()> {
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        for name in names {
            self.close_index(&name)?;
        }
        let names: Vec<String> = self.heaps.keys().cloned().collect();
        for name in names {
            self.close_heap(&name)?;
        }
        self.buffer.flush_all()?;
        Ok(())
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(e) = self.close_all() {
            warn!("failed to close storage cleanly: {}", e);
        }
    }
}
