use std::collections::VecDeque;

use parking_lot::RwLock;

use crate::common::{Key, Result};

use super::btree_index::BTree;

/// Ascending iterator over `start..=end`.
///
/// Each refill takes the tree's shared lock, descends to one leaf and copies
/// out its entries, so no page stays pinned and no lock is held between
/// calls. Writers may interleave with a scan; every key is still visited at
/// most once and in order.
pub struct BTreeIterator<'a> {
    tree: &'a RwLock<BTree>,
    /// Entries already read from the current leaf
    buffer: VecDeque<(Key, Vec<u8>)>,
    /// Lower bound of the next leaf to read
    next_start: Option<Key>,
    end_key: Key,
}

impl<'a> BTreeIterator<'a> {
    pub fn new(tree: &'a RwLock<BTree>, start_key: Key, end_key: Key) -> Self {
        Self {
            tree,
            buffer: VecDeque::new(),
            next_start: (start_key <= end_key).then_some(start_key),
            end_key,
        }
    }

    /// The key a restarted scan would begin at, or None once the range is
    /// exhausted.
    pub fn resume_key(&self) -> Option<Key> {
        self.buffer.front().map(|(k, _)| *k).or(self.next_start)
    }

    pub fn next(&mut self) -> Result<Option<(Key, Vec<u8>)>> {
        while self.buffer.is_empty() {
            let Some(start) = self.next_start else {
                return Ok(None);
            };

            let scan = match self.tree.read().scan_leaf(start, self.end_key) {
                Ok(scan) => scan,
                Err(e) => {
                    self.next_start = None;
                    return Err(e);
                }
            };
            self.buffer.extend(scan.entries);
            self.next_start = scan.resume;
        }

        Ok(self.buffer.pop_front())
    }
}

impl Iterator for BTreeIterator<'_> {
    type Item = Result<(Key, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        BTreeIterator::next(self).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::storage::disk::DiskManager;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn create_tree(keys: impl Iterator<Item = Key>) -> (RwLock<BTree>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::open(temp_file.path(), 2).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(8, dm).unwrap());
        let mut tree = BTree::create(bpm, 2).unwrap();
        for key in keys {
            tree.insert(key, key.to_be_bytes().to_vec(), 1).unwrap();
        }
        (RwLock::new(tree), temp_file)
    }

    #[test]
    fn test_iterator_range() {
        let (tree, _temp) = create_tree((0..100).map(|k| k * 3));

        let keys: Vec<Key> = BTreeIterator::new(&tree, 10, 40)
            .map(|item| item.unwrap().0)
            .collect();
        assert_eq!(keys, vec![12, 15, 18, 21, 24, 27, 30, 33, 36, 39]);
    }

    #[test]
    fn test_iterator_empty_ranges() {
        let (tree, _temp) = create_tree(0..50);

        assert_eq!(BTreeIterator::new(&tree, 30, 10).count(), 0);
        assert_eq!(BTreeIterator::new(&tree, 100, 200).count(), 0);
        assert_eq!(BTreeIterator::new(&tree, -5, -1).count(), 0);
    }

    #[test]
    fn test_iterator_resume_key() {
        let (tree, _temp) = create_tree(0..40);

        let mut iter = BTreeIterator::new(&tree, 0, 39);
        for _ in 0..17 {
            iter.next().unwrap().unwrap();
        }
        assert_eq!(iter.resume_key(), Some(17));

        let rest: Vec<Key> = BTreeIterator::new(&tree, iter.resume_key().unwrap(), 39)
            .map(|item| item.unwrap().0)
            .collect();
        assert_eq!(rest, (17..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_iterator_sees_interleaved_writes_in_order() {
        let (tree, _temp) = create_tree((0..30).map(|k| k * 2));

        let mut iter = BTreeIterator::new(&tree, 0, 100);
        let mut seen = Vec::new();
        while let Some((key, _)) = iter.next().unwrap() {
            if key == 10 {
                tree.write().insert(11, vec![0], 2).unwrap();
                tree.write().delete(20, 3).unwrap();
            }
            seen.push(key);
        }

        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&58));
    }
}
