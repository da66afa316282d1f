use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{
    max_value_len, validate_min_degree, ArborError, Key, Lsn, PageId, Result,
};

use super::btree_page::Node;

/// Shape of a tree as reported by [`BTree::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    pub height: usize,
    pub num_nodes: usize,
    pub num_keys: usize,
}

/// One leaf's worth of a range scan.
#[derive(Debug, Default)]
pub struct LeafScan {
    /// Entries of the leaf that fall inside the range, ascending
    pub entries: Vec<(Key, Vec<u8>)>,
    /// Where the next leaf of the range starts, if the range continues
    pub resume: Option<Key>,
}

/// B+-tree over buffer pool pages.
///
/// Values live in leaves; internal keys only route. Splits happen on the way
/// down an insert and underfull children are fixed on the way down a delete,
/// so no operation ever walks back up. Pages are pinned one at a time: nodes
/// are decoded into owned [`Node`]s and written back whole.
pub struct BTree {
    root_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    min_degree: usize,
}

impl BTree {
    /// Builds an empty tree (a single empty leaf) and records its root in the
    /// metadata page.
    pub fn create(bpm: Arc<BufferPoolManager>, min_degree: usize) -> Result<Self> {
        validate_min_degree(min_degree)?;

        let root_page_id = {
            let (page_id, mut guard) = bpm.new_page()?;
            Node::new_leaf(min_degree).encode(guard.data_mut())?;
            page_id
        };

        bpm.disk_manager().update_meta(|meta| {
            meta.root_page_id = root_page_id;
            meta.min_degree = min_degree as u32;
        })?;

        Ok(Self {
            root_page_id,
            bpm,
            min_degree,
        })
    }

    /// Opens the tree recorded in the metadata page.
    pub fn open(bpm: Arc<BufferPoolManager>) -> Result<Self> {
        let meta = bpm.disk_manager().meta();
        if !meta.has_root() {
            return Err(ArborError::InvalidDatabaseFile(
                "metadata page records no tree root".into(),
            ));
        }

        Ok(Self {
            root_page_id: meta.root_page_id,
            min_degree: meta.min_degree as usize,
            bpm,
        })
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn min_degree(&self) -> usize {
        self.min_degree
    }

    /// Largest value this tree accepts.
    pub fn max_value_len(&self) -> usize {
        max_value_len(self.min_degree)
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn search(&self, key: Key) -> Result<Option<Vec<u8>>> {
        let mut current_page_id = self.root_page_id;

        loop {
            let mut node = self.read_node(current_page_id)?;

            if node.is_leaf {
                return Ok(match node.search_key(key) {
                    Ok(pos) => Some(node.values.swap_remove(pos)),
                    Err(_) => None,
                });
            }

            current_page_id = node.children[node.child_index(key)];
        }
    }

    /// Inserts or overwrites `key`. Returns the value it replaced, if any.
    /// Every page touched is stamped with `lsn`.
    pub fn insert(&mut self, key: Key, value: Vec<u8>, lsn: Lsn) -> Result<Option<Vec<u8>>> {
        let max_len = self.max_value_len();
        if value.len() > max_len {
            return Err(ArborError::ValueTooLarge {
                len: value.len(),
                max: max_len,
            });
        }

        let mut page_id = self.root_page_id;
        let mut node = self.read_node(page_id)?;

        if node.is_full() {
            let mut new_root = Node::new_internal(self.min_degree);
            new_root.children.push(page_id);

            let (separator, right) = self.split_child(&mut new_root, 0, &mut node, lsn)?;
            let new_root_id = self.allocate_node(&new_root, lsn)?;
            self.set_root(new_root_id)?;
            tracing::debug!(
                root = new_root_id.as_u32(),
                separator,
                "root split, tree grew by one level"
            );

            if key >= separator {
                page_id = new_root.children[1];
                node = right;
            }
        }

        loop {
            if node.is_leaf {
                let old = match node.search_key(key) {
                    Ok(pos) => Some(std::mem::replace(&mut node.values[pos], value)),
                    Err(pos) => {
                        node.insert_entry(pos, key, value)?;
                        None
                    }
                };
                self.write_node(page_id, &node, lsn)?;
                return Ok(old);
            }

            let index = node.child_index(key);
            let mut child_page_id = node.children[index];
            let mut child = self.read_node(child_page_id)?;

            if child.is_full() {
                let (separator, right) = self.split_child(&mut node, index, &mut child, lsn)?;
                self.write_node(page_id, &node, lsn)?;

                if key >= separator {
                    child_page_id = node.children[index + 1];
                    child = right;
                }
            }

            page_id = child_page_id;
            node = child;
        }
    }

    /// Removes `key`. Returns the removed value, or None if it was absent.
    pub fn delete(&mut self, key: Key, lsn: Lsn) -> Result<Option<Vec<u8>>> {
        let mut page_id = self.root_page_id;
        let mut node = self.read_node(page_id)?;

        loop {
            if node.is_leaf {
                return match node.search_key(key) {
                    Ok(pos) => {
                        let (_, value) = node.remove_entry(pos);
                        self.write_node(page_id, &node, lsn)?;
                        Ok(Some(value))
                    }
                    Err(_) => Ok(None),
                };
            }

            let index = node.child_index(key);
            let (child_page_id, child) = self.fix_child(&mut node, page_id, index, lsn)?;

            if page_id == self.root_page_id && node.keys.is_empty() {
                // The root's last two children merged: the merged node is the new root
                self.set_root(child_page_id)?;
                self.bpm.delete_page(page_id)?;
                tracing::debug!(
                    root = child_page_id.as_u32(),
                    "root collapsed, tree shrank by one level"
                );
            }

            page_id = child_page_id;
            node = child;
        }
    }

    /// Reads the entries in `start..=end` from the leaf that would hold
    /// `start`. `resume` names the first key of the next leaf's range when the
    /// scan has to continue there.
    pub fn scan_leaf(&self, start: Key, end: Key) -> Result<LeafScan> {
        if start > end {
            return Ok(LeafScan::default());
        }

        let mut current_page_id = self.root_page_id;
        let mut resume = None;

        let leaf = loop {
            let node = self.read_node(current_page_id)?;
            if node.is_leaf {
                break node;
            }

            let index = node.child_index(start);
            // Deeper separators bound the subtree more tightly
            if let Some(&upper) = node.keys.get(index) {
                resume = Some(upper);
            }
            current_page_id = node.children[index];
        };

        let entries = leaf
            .keys
            .into_iter()
            .zip(leaf.values)
            .filter(|(k, _)| *k >= start && *k <= end)
            .collect();

        Ok(LeafScan {
            entries,
            resume: resume.filter(|&k| k <= end),
        })
    }

    /// Number of levels, counting the root and the leaves.
    pub fn height(&self) -> Result<usize> {
        let mut height = 1;
        let mut node = self.read_node(self.root_page_id)?;
        while !node.is_leaf {
            node = self.read_node(node.children[0])?;
            height += 1;
        }
        Ok(height)
    }

    /// Walks the whole tree checking key counts, key order, separator
    /// partitioning and leaf depth.
    pub fn verify(&self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut leaf_depth = None;
        self.verify_node(
            self.root_page_id,
            None,
            None,
            1,
            &mut leaf_depth,
            &mut stats,
        )?;
        stats.height = leaf_depth.unwrap_or(0);
        Ok(stats)
    }

    fn verify_node(
        &self,
        page_id: PageId,
        lower: Option<Key>,
        upper: Option<Key>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        stats: &mut TreeStats,
    ) -> Result<()> {
        let node = self.read_node(page_id)?;
        let corrupt = |reason: String| ArborError::IndexCorrupted(format!("{}: {}", page_id, reason));

        if node.min_degree() != self.min_degree {
            return Err(corrupt(format!("max degree {}", node.max_degree)));
        }
        let n = node.num_keys();
        let is_root = page_id == self.root_page_id;
        if (!is_root && n < self.min_degree - 1) || n > node.max_keys() {
            return Err(corrupt(format!("{} keys", n)));
        }
        if !is_root && !node.is_leaf && n == 0 {
            return Err(corrupt("empty internal node".into()));
        }
        if node.keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(corrupt("keys out of order".into()));
        }
        if let (Some(lo), Some(&first)) = (lower, node.keys.first()) {
            if first < lo {
                return Err(corrupt(format!("key {} below separator {}", first, lo)));
            }
        }
        if let (Some(hi), Some(&last)) = (upper, node.keys.last()) {
            if last >= hi {
                return Err(corrupt(format!("key {} not below separator {}", last, hi)));
            }
        }

        stats.num_nodes += 1;

        if node.is_leaf {
            stats.num_keys += n;
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(corrupt(format!(
                        "leaf at depth {}, expected {}",
                        depth, expected
                    )));
                }
                Some(_) => {}
            }
            return Ok(());
        }

        for (i, &child) in node.children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(node.keys[i - 1]) };
            let child_upper = node.keys.get(i).copied().or(upper);
            self.verify_node(child, child_lower, child_upper, depth + 1, leaf_depth, stats)?;
        }
        Ok(())
    }

    /// Decodes the node stored in `page_id`. The page is pinned only for the
    /// duration of the call.
    pub fn read_node(&self, page_id: PageId) -> Result<Node> {
        let guard = self.bpm.fetch_page_read(page_id)?;
        Node::decode(guard.data()).map_err(|e| e.at_page(page_id))
    }

    fn write_node(&self, page_id: PageId, node: &Node, lsn: Lsn) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(page_id)?;
        node.encode(guard.data_mut())?;
        guard.set_page_lsn(lsn);
        Ok(())
    }

    fn allocate_node(&self, node: &Node, lsn: Lsn) -> Result<PageId> {
        let (page_id, mut guard) = self.bpm.new_page()?;
        node.encode(guard.data_mut())?;
        guard.set_page_lsn(lsn);
        Ok(page_id)
    }

    fn set_root(&mut self, page_id: PageId) -> Result<()> {
        self.bpm
            .disk_manager()
            .update_meta(|meta| meta.root_page_id = page_id)?;
        self.root_page_id = page_id;
        Ok(())
    }

    /// Splits the full `child` found at `parent.children[index]`. Both halves
    /// are written; the separator goes into `parent` in memory only. `child`
    /// is left holding the left half and the right half is returned.
    fn split_child(
        &self,
        parent: &mut Node,
        index: usize,
        child: &mut Node,
        lsn: Lsn,
    ) -> Result<(Key, Node)> {
        let child_page_id = parent.children[index];
        let (separator, right) = if child.is_leaf {
            child.split_leaf()
        } else {
            child.split_internal()
        };

        let right_page_id = self.allocate_node(&right, lsn)?;
        self.write_node(child_page_id, child, lsn)?;
        parent.insert_separator(index, separator, right_page_id)?;

        tracing::debug!(
            left = child_page_id.as_u32(),
            right = right_page_id.as_u32(),
            separator,
            leaf = child.is_leaf,
            "split node"
        );
        Ok((separator, right))
    }

    /// Makes sure the child at `parent.children[index]` can lose a key by
    /// borrowing from a sibling or merging with one. `parent` is updated and
    /// written if it changes. Returns the page and node to descend into.
    fn fix_child(
        &self,
        parent: &mut Node,
        parent_page_id: PageId,
        index: usize,
        lsn: Lsn,
    ) -> Result<(PageId, Node)> {
        let t = self.min_degree;
        let child_page_id = parent.children[index];
        let mut child = self.read_node(child_page_id)?;

        if child.num_keys() >= t {
            return Ok((child_page_id, child));
        }

        let left = if index > 0 {
            let left_page_id = parent.children[index - 1];
            let mut left = self.read_node(left_page_id)?;

            if left.num_keys() >= t {
                if child.is_leaf {
                    let (key, value) = left.remove_entry(left.num_keys() - 1);
                    child.keys.insert(0, key);
                    child.values.insert(0, value);
                    parent.keys[index - 1] = key;
                } else if let (Some(key), Some(grandchild)) = (left.keys.pop(), left.children.pop()) {
                    child.keys.insert(0, parent.keys[index - 1]);
                    child.children.insert(0, grandchild);
                    parent.keys[index - 1] = key;
                }

                self.write_node(left_page_id, &left, lsn)?;
                self.write_node(child_page_id, &child, lsn)?;
                self.write_node(parent_page_id, parent, lsn)?;
                return Ok((child_page_id, child));
            }
            Some((left_page_id, left))
        } else {
            None
        };

        if index + 1 < parent.children.len() {
            let right_page_id = parent.children[index + 1];
            let mut right = self.read_node(right_page_id)?;

            if right.num_keys() >= t {
                if child.is_leaf {
                    let (key, value) = right.remove_entry(0);
                    child.keys.push(key);
                    child.values.push(value);
                    parent.keys[index] = right.keys[0];
                } else {
                    let key = right.keys.remove(0);
                    let grandchild = right.children.remove(0);
                    child.keys.push(parent.keys[index]);
                    child.children.push(grandchild);
                    parent.keys[index] = key;
                }

                self.write_node(right_page_id, &right, lsn)?;
                self.write_node(child_page_id, &child, lsn)?;
                self.write_node(parent_page_id, parent, lsn)?;
                return Ok((child_page_id, child));
            }

            let separator = parent.keys.remove(index);
            parent.children.remove(index + 1);
            child.merge(separator, right);

            self.write_node(child_page_id, &child, lsn)?;
            self.write_node(parent_page_id, parent, lsn)?;
            self.bpm.delete_page(right_page_id)?;
            tracing::debug!(
                into = child_page_id.as_u32(),
                freed = right_page_id.as_u32(),
                "merged node with right sibling"
            );
            return Ok((child_page_id, child));
        }

        let (left_page_id, mut left) = left.ok_or_else(|| {
            ArborError::IndexCorrupted(format!("{} has a single child", parent_page_id))
        })?;
        let separator = parent.keys.remove(index - 1);
        parent.children.remove(index);
        left.merge(separator, child);

        self.write_node(left_page_id, &left, lsn)?;
        self.write_node(parent_page_id, parent, lsn)?;
        self.bpm.delete_page(child_page_id)?;
        tracing::debug!(
            into = left_page_id.as_u32(),
            freed = child_page_id.as_u32(),
            "merged node with left sibling"
        );
        Ok((left_page_id, left))
    }
}
