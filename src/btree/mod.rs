//! Disk-resident B-tree index
//!
//! Entries are `(key, rid)` pairs ordered by the injected key comparator and
//! then by rid, so duplicate key values stay individually addressable. Each
//! node occupies one page of `<name>.tree`; block ids come from an `IdPool`
//! kept in `<name>.pool`, and `<name>.meta` records the root and layout.
//!
//! Insertion splits full nodes on the way down and deletion tops up minimal
//! nodes on the way down, so neither ever has to walk back up the tree.

mod compare;
mod error;
mod id_pool;
mod node;


pub use compare::{KeyCompare, KeyKind};
pub use error::{BTreeError, BTreeResult};
pub use id_pool::IdPool;
pub use node::{BlockId, Entry, Layout, Node, Rid};

use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use crate::file::{BufferManager, FileId};

/// Contents of `<name>.meta`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeMeta {
    pub root: BlockId,
    pub key_width: usize,
    pub degree: usize,
    #[serde(default)]
    pub len: u64,
    #[serde(default)]
    pub kind: Option<KeyKind>,
}

/// Paths of the three files backing the index `name` in `dir`
pub fn tree_paths(dir: &Path, name: &str) -> [PathBuf; 3] {
    [
        dir.join(format!("{}.tree", name)),
        dir.join(format!("{}.pool", name)),
        dir.join(format!("{}.meta", name)),
    ]
}

/// B-tree over fixed-width keys with row-id tie-breaking
pub struct BTree<C: KeyCompare = KeyKind> {
    name: String,
    meta_path: PathBuf,
    file: FileId,
    pool: IdPool,
    layout: Layout,
    root: BlockId,
    len: u64,
    cmp: C,
}

impl<C: KeyCompare> BTree<C> {
    /// Create a new, empty index. Existing files of the same name are reset.
    pub fn create(
        buffer: &mut BufferManager,
        dir: &Path,
        name: &str,
        key_width: usize,
        cmp: C,
        degree_cap: Option<usize>,
    ) -> BTreeResult<Self> {
        let layout = Layout::new(key_width, degree_cap)?;
        let [tree_path, pool_path, meta_path] = tree_paths(dir, name);

        for path in [&tree_path, &pool_path] {
            buffer.file_manager_mut().remove_file(path)?;
            buffer.file_manager_mut().create_file(path)?;
        }
        let file = buffer.file_manager_mut().open_file(&tree_path)?;
        let pool_file = buffer.file_manager_mut().open_file(&pool_path)?;

        let mut pool = IdPool::load(buffer, pool_file)?;
        let root = pool.new_id();
        Node::leaf(root).write(buffer, file, &layout)?;

        let tree = Self {
            name: name.to_string(),
            meta_path,
            file,
            pool,
            layout,
            root,
            len: 0,
            cmp,
        };
        tree.save_meta()?;
        debug!(
            "created index {} (key width {}, degree {})",
            name, key_width, layout.degree
        );
        Ok(tree)
    }

    /// Open an existing index
    pub fn open(buffer: &mut BufferManager, dir: &Path, name: &str, cmp: C) -> BTreeResult<Self> {
        let [tree_path, pool_path, meta_path] = tree_paths(dir, name);
        let meta = read_meta(&meta_path)?;
        let layout = Layout::with_degree(meta.key_width, meta.degree)?;

        let file = buffer.file_manager_mut().open_file(&tree_path)?;
        let pool_file = buffer.file_manager_mut().open_file(&pool_path)?;
        let pool = IdPool::load(buffer, pool_file)?;

        debug!("opened index {} with root {}", name, meta.root);
        Ok(Self {
            name: name.to_string(),
            meta_path,
            file,
            pool,
            layout,
            root: meta.root,
            len: meta.len,
            cmp,
        })
    }

    /// Persist the id pool and metadata, write back the index pages and
    /// close both paged files
    pub fn close(self, buffer: &mut BufferManager) -> BTreeResult<()> {
        self.pool.save(buffer)?;
        self.save_meta()?;
        buffer.close_file(self.file)?;
        buffer.close_file(self.pool.file_id())?;
        debug!("closed index {}", self.name);
        Ok(())
    }

    /// Persist the id pool and metadata. Node pages stay in the buffer
    /// pool until it writes them back.
    pub fn flush(&self, buffer: &mut BufferManager) -> BTreeResult<()> {
        self.pool.save(buffer)?;
        self.save_meta()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    /// Number of entries in the tree
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of node levels (an empty tree is one leaf)
    pub fn height(&self, buffer: &mut BufferManager) -> BTreeResult<usize> {
        let mut node = self.read_node(buffer, self.root)?;
        let mut height = 1;
        while !node.leaf {
            node = self.read_node(buffer, node.children[0])?;
            height += 1;
        }
        Ok(height)
    }

    pub fn meta(&self) -> TreeMeta {
        TreeMeta {
            root: self.root,
            key_width: self.layout.key_width,
            degree: self.layout.degree,
            len: self.len,
            kind: self.cmp.kind(),
        }
    }

    /// Insert `(key, rid)`; the pair must not already be present
    pub fn insert(&mut self, buffer: &mut BufferManager, key: &[u8], rid: Rid) -> BTreeResult<()> {
        let target = Entry {
            key: self.normalize(key)?,
            rid,
        };

        let mut root = self.read_node(buffer, self.root)?;
        if root.entries.len() == self.layout.max_keys() {
            let mut new_root = Node::internal(self.pool.new_id(), vec![root.id]);
            self.split_child(buffer, &mut new_root, 0, root)?;
            debug!("index {}: root split, new root {}", self.name, new_root.id);
            self.root = new_root.id;
            root = new_root;
        }

        self.insert_nonfull(buffer, root, target)?;
        self.len += 1;
        Ok(())
    }

    /// Delete `(key, rid)`; the pair must be present
    pub fn delete(&mut self, buffer: &mut BufferManager, key: &[u8], rid: Rid) -> BTreeResult<()> {
        let mut target = Entry {
            key: self.normalize(key)?,
            rid,
        };
        let t = self.layout.degree;

        let mut node = self.read_node(buffer, self.root)?;
        loop {
            let i = self.upper_bound(&node, &target);
            let found = i > 0 && self.compare(&node.entries[i - 1], &target) == Ordering::Equal;

            if found && node.leaf {
                node.entries.remove(i - 1);
                self.write_node(buffer, &node)?;
                break;
            }

            if found {
                let idx = i - 1;
                let left = self.read_node(buffer, node.children[idx])?;
                if left.entries.len() >= t {
                    let pred = self.last_entry(buffer, &left)?;
                    node.entries[idx] = pred.clone();
                    self.write_node(buffer, &node)?;
                    target = pred;
                    node = left;
                    continue;
                }

                let right = self.read_node(buffer, node.children[idx + 1])?;
                if right.entries.len() >= t {
                    let succ = self.first_entry(buffer, &right)?;
                    node.entries[idx] = succ.clone();
                    self.write_node(buffer, &node)?;
                    target = succ;
                    node = right;
                    continue;
                }

                node = self.merge_children(buffer, node, idx, left, right)?;
                continue;
            }

            if node.leaf {
                return Err(BTreeError::EntryNotFound(rid));
            }

            let child = self.read_node(buffer, node.children[i])?;
            node = if child.entries.len() < t {
                self.top_up(buffer, node, i, child)?
            } else {
                child
            };
        }

        self.len = self.len.saturating_sub(1);
        Ok(())
    }

    /// Row ids of entries whose key lies within `(lo, hi)`, in ascending
    /// `(key, rid)` order, stopping after `limit` results
    pub fn range_query(
        &self,
        buffer: &mut BufferManager,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
        limit: usize,
    ) -> BTreeResult<Vec<Rid>> {
        let lo = self.normalize_bound(lo)?;
        let hi = self.normalize_bound(hi)?;
        let mut out = Vec::new();
        if limit > 0 {
            self.collect_range(buffer, self.root, &lo, &hi, limit, &mut out)?;
        }
        Ok(out)
    }

    /// Row ids of every entry with exactly this key
    pub fn query_eq(&self, buffer: &mut BufferManager, key: &[u8]) -> BTreeResult<Vec<Rid>> {
        self.range_query(buffer, Bound::Included(key), Bound::Included(key), usize::MAX)
    }

    /// Whether the exact `(key, rid)` pair is present
    pub fn contains(&self, buffer: &mut BufferManager, key: &[u8], rid: Rid) -> BTreeResult<bool> {
        let target = Entry {
            key: self.normalize(key)?,
            rid,
        };
        let mut node = self.read_node(buffer, self.root)?;
        loop {
            let i = self.upper_bound(&node, &target);
            if i > 0 && self.compare(&node.entries[i - 1], &target) == Ordering::Equal {
                return Ok(true);
            }
            if node.leaf {
                return Ok(false);
            }
            node = self.read_node(buffer, node.children[i])?;
        }
    }

    /// Verify the structural invariants of the whole tree: key counts,
    /// strict ordering, uniform leaf depth, entry count and id bookkeeping
    pub fn check(&self, buffer: &mut BufferManager) -> BTreeResult<()> {
        let mut state = CheckState::default();
        self.check_node(buffer, self.root, 0, None, None, &mut state)?;

        if state.entries != self.len {
            return Err(corrupted(
                self.root,
                format!("{} entries found, {} recorded", state.entries, self.len),
            ));
        }
        if state.visited.len() as u64 != self.pool.live_count() {
            return Err(corrupted(
                self.root,
                format!(
                    "{} nodes reachable, {} block ids in use",
                    state.visited.len(),
                    self.pool.live_count()
                ),
            ));
        }
        Ok(())
    }

    fn insert_nonfull(
        &mut self,
        buffer: &mut BufferManager,
        mut node: Node,
        target: Entry,
    ) -> BTreeResult<()> {
        loop {
            let i = self.upper_bound(&node, &target);
            if i > 0 && self.compare(&node.entries[i - 1], &target) == Ordering::Equal {
                return Err(BTreeError::EntryExists(target.rid));
            }

            if node.leaf {
                node.entries.insert(i, target);
                return self.write_node(buffer, &node);
            }

            let mut child = self.read_node(buffer, node.children[i])?;
            if child.entries.len() == self.layout.max_keys() {
                let (left, right) = self.split_child(buffer, &mut node, i, child)?;
                child = match self.compare(&node.entries[i], &target) {
                    Ordering::Less => right,
                    Ordering::Greater => left,
                    Ordering::Equal => return Err(BTreeError::EntryExists(target.rid)),
                };
            }
            node = child;
        }
    }

    /// Split the full `child` (the `i`-th child of `parent`) around its
    /// median, returning both halves
    fn split_child(
        &mut self,
        buffer: &mut BufferManager,
        parent: &mut Node,
        i: usize,
        mut child: Node,
    ) -> BTreeResult<(Node, Node)> {
        let t = self.layout.degree;
        let mut right = if child.leaf {
            Node::leaf(self.pool.new_id())
        } else {
            Node::internal(self.pool.new_id(), child.children.split_off(t))
        };
        right.entries = child.entries.split_off(t);
        let median = child
            .entries
            .pop()
            .ok_or_else(|| corrupted(child.id, "split of an empty node"))?;

        parent.entries.insert(i, median);
        parent.children.insert(i + 1, right.id);

        self.write_node(buffer, parent)?;
        self.write_node(buffer, &child)?;
        self.write_node(buffer, &right)?;
        Ok((child, right))
    }

    /// Bring the minimal `i`-th child of `parent` up to at least `t` keys,
    /// returning the node to continue the descent in
    fn top_up(
        &mut self,
        buffer: &mut BufferManager,
        mut parent: Node,
        i: usize,
        mut child: Node,
    ) -> BTreeResult<Node> {
        let t = self.layout.degree;

        let mut left = match i {
            0 => None,
            _ => Some(self.read_node(buffer, parent.children[i - 1])?),
        };
        if let Some(left) = left.as_mut().filter(|l| l.entries.len() >= t) {
            // Rotate right through the parent
            let moved = left
                .entries
                .pop()
                .ok_or_else(|| corrupted(left.id, "empty sibling"))?;
            let sep = std::mem::replace(&mut parent.entries[i - 1], moved);
            child.entries.insert(0, sep);
            if !child.leaf {
                let grandchild = left
                    .children
                    .pop()
                    .ok_or_else(|| corrupted(left.id, "missing child"))?;
                child.children.insert(0, grandchild);
            }
            self.write_node(buffer, left)?;
            self.write_node(buffer, &parent)?;
            self.write_node(buffer, &child)?;
            return Ok(child);
        }

        let mut right = if i + 1 < parent.children.len() {
            Some(self.read_node(buffer, parent.children[i + 1])?)
        } else {
            None
        };
        if let Some(right) = right.as_mut().filter(|r| r.entries.len() >= t) {
            // Rotate left through the parent
            let moved = right.entries.remove(0);
            let sep = std::mem::replace(&mut parent.entries[i], moved);
            child.entries.push(sep);
            if !child.leaf {
                child.children.push(right.children.remove(0));
            }
            self.write_node(buffer, right)?;
            self.write_node(buffer, &parent)?;
            self.write_node(buffer, &child)?;
            return Ok(child);
        }

        match (left, right) {
            (Some(left), _) => self.merge_children(buffer, parent, i - 1, left, child),
            (None, Some(right)) => self.merge_children(buffer, parent, i, child, right),
            (None, None) => Err(corrupted(parent.id, "node without siblings")),
        }
    }

    /// Merge `parent.children[idx + 1]` and the separating key into
    /// `parent.children[idx]`. An emptied root is replaced by the merged node.
    fn merge_children(
        &mut self,
        buffer: &mut BufferManager,
        mut parent: Node,
        idx: usize,
        mut left: Node,
        right: Node,
    ) -> BTreeResult<Node> {
        let sep = parent.entries.remove(idx);
        parent.children.remove(idx + 1);

        left.entries.push(sep);
        left.entries.extend(right.entries);
        left.children.extend(right.children);
        self.pool.free_id(right.id);

        if parent.entries.is_empty() && parent.id == self.root {
            debug!(
                "index {}: root {} emptied, new root {}",
                self.name, parent.id, left.id
            );
            self.pool.free_id(parent.id);
            self.root = left.id;
        } else {
            self.write_node(buffer, &parent)?;
        }

        self.write_node(buffer, &left)?;
        Ok(left)
    }

    fn last_entry(&self, buffer: &mut BufferManager, node: &Node) -> BTreeResult<Entry> {
        let mut current = node.clone();
        while !current.leaf {
            let last = current.children[current.children.len() - 1];
            current = self.read_node(buffer, last)?;
        }
        current
            .entries
            .pop()
            .ok_or_else(|| corrupted(current.id, "empty leaf"))
    }

    fn first_entry(&self, buffer: &mut BufferManager, node: &Node) -> BTreeResult<Entry> {
        let mut current = node.clone();
        while !current.leaf {
            current = self.read_node(buffer, current.children[0])?;
        }
        current
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| corrupted(node.id, "empty leaf"))
    }

    /// In-order walk of the subtree at `id`; returns true once the walk
    /// has passed `hi` or collected `limit` results
    fn collect_range(
        &self,
        buffer: &mut BufferManager,
        id: BlockId,
        lo: &Bound<Vec<u8>>,
        hi: &Bound<Vec<u8>>,
        limit: usize,
        out: &mut Vec<Rid>,
    ) -> BTreeResult<bool> {
        let node = self.read_node(buffer, id)?;

        // Entries before `start` (and the subtrees left of them) are below `lo`
        let start = match lo {
            Bound::Unbounded => 0,
            Bound::Included(k) => node
                .entries
                .partition_point(|e| self.cmp.compare(&e.key, k) == Ordering::Less),
            Bound::Excluded(k) => node
                .entries
                .partition_point(|e| self.cmp.compare(&e.key, k) != Ordering::Greater),
        };

        for i in start..=node.entries.len() {
            if !node.leaf && self.collect_range(buffer, node.children[i], lo, hi, limit, out)? {
                return Ok(true);
            }
            let Some(entry) = node.entries.get(i) else {
                break;
            };
            let below_hi = match hi {
                Bound::Unbounded => true,
                Bound::Included(k) => self.cmp.compare(&entry.key, k) != Ordering::Greater,
                Bound::Excluded(k) => self.cmp.compare(&entry.key, k) == Ordering::Less,
            };
            if !below_hi {
                return Ok(true);
            }
            out.push(entry.rid);
            if out.len() >= limit {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn check_node(
        &self,
        buffer: &mut BufferManager,
        id: BlockId,
        depth: usize,
        lower: Option<&Entry>,
        upper: Option<&Entry>,
        state: &mut CheckState,
    ) -> BTreeResult<()> {
        if !state.visited.insert(id) {
            return Err(corrupted(id, "node reachable twice"));
        }
        let node = self.read_node(buffer, id)?;
        let count = node.entries.len();

        if id != self.root && count < self.layout.min_keys() {
            return Err(corrupted(id, format!("underfull node with {} keys", count)));
        }
        if !node.leaf && node.children.len() != count + 1 {
            return Err(corrupted(
                id,
                format!("{} keys but {} children", count, node.children.len()),
            ));
        }

        let mut prev = lower;
        for entry in &node.entries {
            if prev.is_some_and(|p| self.compare(p, entry) != Ordering::Less) {
                return Err(corrupted(id, format!("entry rid={} out of order", entry.rid)));
            }
            prev = Some(entry);
        }
        if let (Some(last), Some(upper)) = (prev, upper)
            && self.compare(last, upper) != Ordering::Less
        {
            return Err(corrupted(id, format!("entry rid={} out of order", last.rid)));
        }

        state.entries += count as u64;
        if node.leaf {
            let expected = *state.leaf_depth.get_or_insert(depth);
            if expected != depth {
                return Err(corrupted(
                    id,
                    format!("leaf at depth {}, expected {}", depth, expected),
                ));
            }
            return Ok(());
        }

        for (i, &child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { node.entries.get(i - 1) };
            let hi = node.entries.get(i).or(upper);
            self.check_node(buffer, child, depth + 1, lo, hi, state)?;
        }
        Ok(())
    }

    fn read_node(&self, buffer: &mut BufferManager, id: BlockId) -> BTreeResult<Node> {
        Node::read(buffer, self.file, &self.layout, id)
    }

    fn write_node(&self, buffer: &mut BufferManager, node: &Node) -> BTreeResult<()> {
        node.write(buffer, self.file, &self.layout)
    }

    /// Index of the first entry strictly greater than `target`
    fn upper_bound(&self, node: &Node, target: &Entry) -> usize {
        node.entries
            .partition_point(|e| self.compare(e, target) != Ordering::Greater)
    }

    fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        self.cmp
            .compare(&a.key, &b.key)
            .then_with(|| a.rid.cmp(&b.rid))
    }

    /// Zero-pad a key to the index key width
    fn normalize(&self, key: &[u8]) -> BTreeResult<Vec<u8>> {
        let width = self.layout.key_width;
        if key.len() > width {
            return Err(BTreeError::KeyWidth {
                len: key.len(),
                width,
            });
        }
        let mut out = key.to_vec();
        out.resize(width, 0);
        Ok(out)
    }

    fn normalize_bound(&self, bound: Bound<&[u8]>) -> BTreeResult<Bound<Vec<u8>>> {
        Ok(match bound {
            Bound::Included(k) => Bound::Included(self.normalize(k)?),
            Bound::Excluded(k) => Bound::Excluded(self.normalize(k)?),
            Bound::Unbounded => Bound::Unbounded,
        })
    }

    fn save_meta(&self) -> BTreeResult<()> {
        std::fs::write(&self.meta_path, serde_json::to_vec_pretty(&self.meta())?)?;
        Ok(())
    }
}

/// Delete the files of a closed index
pub fn remove_index_files(buffer: &mut BufferManager, dir: &Path, name: &str) -> BTreeResult<()> {
    let [tree_path, pool_path, meta_path] = tree_paths(dir, name);
    buffer.file_manager_mut().remove_file(&tree_path)?;
    buffer.file_manager_mut().remove_file(&pool_path)?;
    if meta_path.exists() {
        std::fs::remove_file(&meta_path)?;
    }
    Ok(())
}

/// Read the metadata of the index `name` in `dir` without opening it
pub fn read_index_meta(dir: &Path, name: &str) -> BTreeResult<TreeMeta> {
    let [_, _, meta_path] = tree_paths(dir, name);
    read_meta(&meta_path)
}

fn corrupted(block: BlockId, reason: impl Into<String>) -> BTreeError {
    BTreeError::Corrupted {
        block,
        reason: reason.into(),
    }
}

fn read_meta(path: &Path) -> BTreeResult<TreeMeta> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

#[derive(Default)]
struct CheckState {
    visited: HashSet<BlockId>,
    leaf_depth: Option<usize>,
    entries: u64,
}
