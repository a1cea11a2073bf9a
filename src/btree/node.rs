use crate::file::{BufferManager, FileId, PAGE_SIZE, PageId, PageStream};

use super::error::{BTreeError, BTreeResult};

/// Persisted node identifier, also the node's page number in the tree file
pub type BlockId = u64;

/// Row identifier stored next to every key
pub type Rid = u64;

/// Bytes of fixed node header: key count (u32), leaf flag (u8), padding
const HEADER_SIZE: usize = 8;
const CHILD_SIZE: usize = 8;
const RID_SIZE: usize = 8;

/// One `(key, rid)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub rid: Rid,
}

/// Page layout of a node for a given key width and minimum degree.
///
/// ```text
/// [count u32][leaf u8][pad 3][children 2t * u64][keys (2t-1) * w][rids (2t-1) * u64]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub key_width: usize,
    pub degree: usize,
}

impl Layout {
    /// Largest degree whose node still fits in one page
    pub fn max_degree(key_width: usize) -> usize {
        (PAGE_SIZE - HEADER_SIZE) / (2 * (CHILD_SIZE + key_width + RID_SIZE))
    }

    /// Derive the layout for `key_width`, optionally capping the degree
    pub fn new(key_width: usize, degree_cap: Option<usize>) -> BTreeResult<Self> {
        let derived = Self::max_degree(key_width);
        if key_width == 0 || derived < 2 {
            return Err(BTreeError::InvalidKeyWidth(key_width));
        }
        let degree = degree_cap.map_or(derived, |cap| cap.min(derived));
        Self::with_degree(key_width, degree)
    }

    /// Rebuild a persisted layout, validating it against the page size
    pub fn with_degree(key_width: usize, degree: usize) -> BTreeResult<Self> {
        if degree < 2 {
            return Err(BTreeError::InvalidDegree(degree));
        }
        if key_width == 0 || degree > Self::max_degree(key_width) {
            return Err(BTreeError::InvalidKeyWidth(key_width));
        }
        Ok(Self { key_width, degree })
    }

    pub fn max_keys(&self) -> usize {
        2 * self.degree - 1
    }

    pub fn min_keys(&self) -> usize {
        self.degree - 1
    }

    fn keys_offset(&self) -> usize {
        HEADER_SIZE + 2 * self.degree * CHILD_SIZE
    }

    fn rids_offset(&self) -> usize {
        self.keys_offset() + self.max_keys() * self.key_width
    }
}

/// In-memory copy of one node.
///
/// Nodes are checked out with `read` and checked back in with `write`;
/// nothing holds on to the page between the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: BlockId,
    pub leaf: bool,
    pub entries: Vec<Entry>,
    /// Empty for leaves, `entries.len() + 1` ids otherwise
    pub children: Vec<BlockId>,
}

impl Node {
    pub fn leaf(id: BlockId) -> Self {
        Self {
            id,
            leaf: true,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn internal(id: BlockId, children: Vec<BlockId>) -> Self {
        Self {
            id,
            leaf: false,
            entries: Vec::new(),
            children,
        }
    }

    pub fn read(
        buffer: &mut BufferManager,
        file: FileId,
        layout: &Layout,
        id: BlockId,
    ) -> BTreeResult<Self> {
        let mut stream = PageStream::new(buffer, PageId::new(file, id as usize));
        let count = stream.read::<u32>()? as usize;
        let leaf = stream.read::<u8>()? != 0;
        if count > layout.max_keys() {
            return Err(BTreeError::Corrupted {
                block: id,
                reason: format!("{} keys in a node of degree {}", count, layout.degree),
            });
        }

        let children = if leaf {
            Vec::new()
        } else {
            stream.seek(HEADER_SIZE)?;
            stream
                .read_bytes((count + 1) * CHILD_SIZE)?
                .chunks_exact(CHILD_SIZE)
                .map(decode_u64)
                .collect()
        };

        stream.seek(layout.keys_offset())?;
        let keys = stream.read_bytes(count * layout.key_width)?;
        stream.seek(layout.rids_offset())?;
        let rids = stream.read_bytes(count * RID_SIZE)?;

        let entries = keys
            .chunks_exact(layout.key_width)
            .zip(rids.chunks_exact(RID_SIZE))
            .map(|(key, rid)| Entry {
                key: key.to_vec(),
                rid: decode_u64(rid),
            })
            .collect();

        Ok(Self {
            id,
            leaf,
            entries,
            children,
        })
    }

    pub fn write(&self, buffer: &mut BufferManager, file: FileId, layout: &Layout) -> BTreeResult<()> {
        let mut stream = PageStream::new(buffer, PageId::new(file, self.id as usize));
        stream
            .write(self.entries.len() as u32)?
            .write(u8::from(self.leaf))?
            .fill(0, 3)?;

        if !self.leaf {
            let children: Vec<u8> = self.children.iter().flat_map(|c| c.to_le_bytes()).collect();
            stream.write_bytes(&children, children.len())?;
        }

        let mut keys = Vec::with_capacity(self.entries.len() * layout.key_width);
        for entry in &self.entries {
            keys.extend_from_slice(&entry.key);
            keys.resize(keys.len() + layout.key_width - entry.key.len(), 0);
        }
        stream.seek(layout.keys_offset())?;
        stream.write_bytes(&keys, keys.len())?;

        let rids: Vec<u8> = self.entries.iter().flat_map(|e| e.rid.to_le_bytes()).collect();
        stream.seek(layout.rids_offset())?;
        stream.write_bytes(&rids, rids.len())?;
        Ok(())
    }
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileManager;

    #[test]
    fn test_degree_fits_page() {
        for width in [1, 4, 8, 100, 1000] {
            let layout = Layout::new(width, None).unwrap();
            let used = layout.rids_offset() + layout.max_keys() * RID_SIZE;
            assert!(used <= PAGE_SIZE, "width {} uses {} bytes", width, used);
        }
        assert_eq!(Layout::new(4, None).unwrap().degree, 204);
        assert_eq!(Layout::new(4, Some(3)).unwrap().degree, 3);
        assert!(matches!(Layout::new(4000, None), Err(BTreeError::InvalidKeyWidth(4000))));
        assert!(matches!(Layout::new(4, Some(1)), Err(BTreeError::InvalidDegree(1))));
    }

    #[test]
    fn test_node_survives_page_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nodes.tree");
        let mut file_manager = FileManager::new();
        file_manager.create_file(&path).unwrap();
        let file = file_manager.open_file(&path).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 1).unwrap();
        let layout = Layout::new(4, Some(3)).unwrap();

        let mut node = Node::internal(1, vec![7, 8, 9]);
        node.entries = vec![
            Entry {
                key: 10i32.to_le_bytes().to_vec(),
                rid: 1,
            },
            Entry {
                key: 20i32.to_le_bytes().to_vec(),
                rid: 2,
            },
        ];
        node.write(&mut bm, file, &layout).unwrap();
        Node::leaf(2).write(&mut bm, file, &layout).unwrap();

        // Capacity 1, so node 1 comes back from disk
        assert_eq!(Node::read(&mut bm, file, &layout, 1).unwrap(), node);
        assert_eq!(Node::read(&mut bm, file, &layout, 2).unwrap(), Node::leaf(2));
    }

    #[test]
    fn test_oversized_count_is_corruption() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.tree");
        let mut file_manager = FileManager::new();
        file_manager.create_file(&path).unwrap();
        let file = file_manager.open_file(&path).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 2).unwrap();
        let layout = Layout::new(8, Some(2)).unwrap();

        PageStream::new(&mut bm, PageId::new(file, 0))
            .write(100u32)
            .unwrap();
        assert!(matches!(
            Node::read(&mut bm, file, &layout, 0),
            Err(BTreeError::Corrupted { block: 0, .. })
        ));
    }
}
