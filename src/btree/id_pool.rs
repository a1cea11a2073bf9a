use crate::file::{BufferManager, FileId, PagedFile};

use super::error::{BTreeError, BTreeResult};
use super::node::BlockId;

/// Block id allocator: a high-water mark plus a stack of released ids.
///
/// Persisted as `[total u64][free count u64][free ids u64...]` in its own
/// paged file.
#[derive(Debug)]
pub struct IdPool {
    file: PagedFile,
    total: u64,
    free: Vec<BlockId>,
}

impl IdPool {
    /// Load the pool from `file`; an empty file is an empty pool
    pub fn load(buffer: &mut BufferManager, file: FileId) -> BTreeResult<Self> {
        let file = PagedFile::new(file);
        let total = file.read_u64(buffer, 0)?;
        let count = file.read_u64(buffer, 8)?;
        if count > total {
            return Err(BTreeError::Corrupted {
                block: total,
                reason: format!("{} free ids but only {} allocated", count, total),
            });
        }

        let free = (0..count)
            .map(|i| file.read_u64(buffer, 16 + 8 * i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { file, total, free })
    }

    pub fn save(&self, buffer: &mut BufferManager) -> BTreeResult<()> {
        let mut raw = Vec::with_capacity(16 + 8 * self.free.len());
        raw.extend_from_slice(&self.total.to_le_bytes());
        raw.extend_from_slice(&(self.free.len() as u64).to_le_bytes());
        for id in &self.free {
            raw.extend_from_slice(&id.to_le_bytes());
        }
        self.file.write_bytes(buffer, 0, &raw)?;
        Ok(())
    }

    pub fn file_id(&self) -> FileId {
        self.file.id()
    }

    /// Take a released id if there is one, else extend the high-water mark
    pub fn new_id(&mut self) -> BlockId {
        self.free.pop().unwrap_or_else(|| {
            self.total += 1;
            self.total - 1
        })
    }

    pub fn free_id(&mut self, id: BlockId) {
        if id + 1 == self.total {
            self.total -= 1;
        } else {
            self.free.push(id);
        }
    }

    /// Number of ids currently handed out
    pub fn live_count(&self) -> u64 {
        self.total - self.free.len() as u64
    }

    /// Every id currently handed out, ascending
    pub fn all(&self) -> Vec<BlockId> {
        let mut free = self.free.clone();
        free.sort_unstable();
        let mut free = free.into_iter().peekable();
        (0..self.total)
            .filter(|id| {
                if free.peek() == Some(id) {
                    free.next();
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileManager;

    #[test]
    fn test_ids_are_recycled_and_persisted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ids.pool");
        let mut file_manager = FileManager::new();
        file_manager.create_file(&path).unwrap();
        let file = file_manager.open_file(&path).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 2).unwrap();

        let mut pool = IdPool::load(&mut bm, file).unwrap();
        let ids: Vec<_> = (0..5).map(|_| pool.new_id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);

        pool.free_id(1);
        pool.free_id(3);
        // The top id lowers the high-water mark instead of going on the stack
        pool.free_id(4);
        assert_eq!(pool.all(), vec![0, 2]);
        assert_eq!(pool.live_count(), 2);

        pool.save(&mut bm).unwrap();
        bm.close_file(file).unwrap();

        let file = bm.file_manager_mut().open_file(&path).unwrap();
        let mut pool = IdPool::load(&mut bm, file).unwrap();
        assert_eq!(pool.all(), vec![0, 2]);
        assert_eq!(pool.new_id(), 3);
        assert_eq!(pool.new_id(), 1);
        assert_eq!(pool.new_id(), 4);
    }
}
