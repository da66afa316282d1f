use crate::common::{max_value_len, ArborError, Key, PageId, Result, PAGE_SIZE};

/// leaf flag (1) + key count (4) + max degree (4)
pub const NODE_HEADER_SIZE: usize = 9;

const IS_LEAF_OFFSET: usize = 0;
const NUM_KEYS_OFFSET: usize = 1;
const MAX_DEGREE_OFFSET: usize = 5;

const KEY_SIZE: usize = 8;
const VALUE_LEN_SIZE: usize = 4;
const CHILD_SIZE: usize = 4;

/// Smallest max degree a page may record (minimum degree 2)
const MIN_MAX_DEGREE: u32 = 4;

/// A B-tree node decoded from a page.
///
/// Leaves carry one value per key; internal nodes carry one more child than
/// keys. Nodes never grow past `max_degree - 1` keys: the insert helpers fail
/// instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub is_leaf: bool,
    pub keys: Vec<Key>,
    pub values: Vec<Vec<u8>>,
    pub children: Vec<PageId>,
    /// Twice the minimum degree
    pub max_degree: u32,
}

impl Node {
    pub fn new_leaf(min_degree: usize) -> Self {
        Self::empty(true, min_degree)
    }

    pub fn new_internal(min_degree: usize) -> Self {
        Self::empty(false, min_degree)
    }

    fn empty(is_leaf: bool, min_degree: usize) -> Self {
        let max_keys = 2 * min_degree - 1;
        Self {
            is_leaf,
            keys: Vec::with_capacity(max_keys),
            values: Vec::new(),
            children: Vec::new(),
            max_degree: (2 * min_degree) as u32,
        }
    }

    pub fn min_degree(&self) -> usize {
        self.max_degree as usize / 2
    }

    pub fn max_keys(&self) -> usize {
        self.max_degree as usize - 1
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() >= self.max_keys()
    }

    /// Binary search for `key` among this node's keys.
    pub fn search_key(&self, key: Key) -> std::result::Result<usize, usize> {
        self.keys.binary_search(&key)
    }

    /// Index of the child whose subtree may hold `key`. A key equal to a
    /// separator lives to the right of it.
    pub fn child_index(&self, key: Key) -> usize {
        self.keys.partition_point(|&k| k <= key)
    }

    /// Inserts a leaf entry at `index`.
    pub fn insert_entry(&mut self, index: usize, key: Key, value: Vec<u8>) -> Result<()> {
        if self.is_full() {
            return Err(ArborError::IndexCorrupted(format!(
                "insert into full node ({} keys)",
                self.keys.len()
            )));
        }
        self.keys.insert(index, key);
        self.values.insert(index, value);
        Ok(())
    }

    /// Removes and returns the leaf entry at `index`.
    pub fn remove_entry(&mut self, index: usize) -> (Key, Vec<u8>) {
        (self.keys.remove(index), self.values.remove(index))
    }

    /// Inserts separator `key` at `index` with `right_child` to its right.
    pub fn insert_separator(&mut self, index: usize, key: Key, right_child: PageId) -> Result<()> {
        if self.is_full() {
            return Err(ArborError::IndexCorrupted(format!(
                "insert into full node ({} keys)",
                self.keys.len()
            )));
        }
        self.keys.insert(index, key);
        self.children.insert(index + 1, right_child);
        Ok(())
    }

    /// Splits a full leaf. The left half keeps `t - 1` entries; the returned
    /// right half starts with the separator key.
    pub fn split_leaf(&mut self) -> (Key, Node) {
        let t = self.min_degree();
        let mut right = Node::new_leaf(t);
        right.keys = self.keys.split_off(t - 1);
        right.values = self.values.split_off(t - 1);
        (right.keys[0], right)
    }

    /// Splits a full internal node around its median key, which is returned
    /// for the parent and kept by neither half.
    pub fn split_internal(&mut self) -> (Key, Node) {
        let t = self.min_degree();
        let mut right = Node::new_internal(t);
        right.keys = self.keys.split_off(t);
        right.children = self.children.split_off(t);
        let median = self.keys.pop().unwrap_or_default();
        (median, right)
    }

    /// Appends `right` onto this node. Internal merges pull the parent
    /// separator down between the halves; leaf merges drop it.
    pub fn merge(&mut self, separator: Key, mut right: Node) {
        if !self.is_leaf {
            self.keys.push(separator);
            self.children.append(&mut right.children);
        } else {
            self.values.append(&mut right.values);
        }
        self.keys.append(&mut right.keys);
    }

    /// Bytes this node occupies when encoded.
    pub fn encoded_len(&self) -> usize {
        let n = self.keys.len();
        let tail = if self.is_leaf {
            self.values.iter().map(|v| VALUE_LEN_SIZE + v.len()).sum()
        } else {
            self.children.len() * CHILD_SIZE
        };
        NODE_HEADER_SIZE + n * KEY_SIZE + tail
    }

    /// Serializes the node into a page buffer, zero-padding the remainder.
    pub fn encode(&self, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        let n = self.keys.len();

        if self.max_degree < MIN_MAX_DEGREE || n > self.max_keys() {
            return Err(ArborError::IndexCorrupted(format!(
                "node with {} keys and max degree {}",
                n, self.max_degree
            )));
        }
        let shape_ok = if self.is_leaf {
            self.values.len() == n && self.children.is_empty()
        } else {
            self.children.len() == n + 1 && self.values.is_empty()
        };
        if !shape_ok {
            return Err(ArborError::IndexCorrupted(format!(
                "{} node with {} keys, {} values and {} children",
                if self.is_leaf { "leaf" } else { "internal" },
                n,
                self.values.len(),
                self.children.len()
            )));
        }

        let max_len = max_value_len(self.min_degree());
        if let Some(value) = self.values.iter().find(|v| v.len() > max_len) {
            return Err(ArborError::ValueTooLarge {
                len: value.len(),
                max: max_len,
            });
        }
        let total = self.encoded_len();
        if total > PAGE_SIZE {
            return Err(ArborError::ValueTooLarge {
                len: total,
                max: PAGE_SIZE,
            });
        }

        data.fill(0);
        data[IS_LEAF_OFFSET] = self.is_leaf as u8;
        data[NUM_KEYS_OFFSET..NUM_KEYS_OFFSET + 4].copy_from_slice(&(n as u32).to_le_bytes());
        data[MAX_DEGREE_OFFSET..MAX_DEGREE_OFFSET + 4]
            .copy_from_slice(&self.max_degree.to_le_bytes());

        let mut offset = NODE_HEADER_SIZE;
        for key in &self.keys {
            data[offset..offset + KEY_SIZE].copy_from_slice(&key.to_le_bytes());
            offset += KEY_SIZE;
        }

        if self.is_leaf {
            for value in &self.values {
                data[offset..offset + VALUE_LEN_SIZE]
                    .copy_from_slice(&(value.len() as u32).to_le_bytes());
                offset += VALUE_LEN_SIZE;
                data[offset..offset + value.len()].copy_from_slice(value);
                offset += value.len();
            }
        } else {
            for child in &self.children {
                data[offset..offset + CHILD_SIZE].copy_from_slice(&child.as_u32().to_le_bytes());
                offset += CHILD_SIZE;
            }
        }

        Ok(())
    }

    /// Parses a node from a page buffer.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = PageReader::new(data);

        let is_leaf = match reader.u8()? {
            0 => false,
            1 => true,
            flag => return Err(ArborError::CorruptPage(format!("leaf flag {}", flag))),
        };
        let n = reader.u32()? as usize;
        let max_degree = reader.u32()?;

        if max_degree < MIN_MAX_DEGREE {
            return Err(ArborError::CorruptPage(format!("max degree {}", max_degree)));
        }
        if n > max_degree as usize - 1 {
            return Err(ArborError::CorruptPage(format!(
                "{} keys with max degree {}",
                n, max_degree
            )));
        }
        // Smallest possible footprint of n entries must still fit the page
        let per_entry = KEY_SIZE + if is_leaf { VALUE_LEN_SIZE } else { CHILD_SIZE };
        let min_len = NODE_HEADER_SIZE + n * per_entry + if is_leaf { 0 } else { CHILD_SIZE };
        if min_len > data.len() {
            return Err(ArborError::CorruptPage(format!(
                "{} keys cannot fit in a page",
                n
            )));
        }

        let mut keys = Vec::with_capacity(n);
        for _ in 0..n {
            keys.push(reader.i64()?);
        }

        let mut values = Vec::new();
        let mut children = Vec::new();
        if is_leaf {
            values.reserve(n);
            for _ in 0..n {
                let len = reader.u32()? as usize;
                values.push(reader.bytes(len)?.to_vec());
            }
        } else {
            children.reserve(n + 1);
            for _ in 0..=n {
                children.push(PageId::new(reader.u32()?));
            }
        }

        Ok(Self {
            is_leaf,
            keys,
            values,
            children,
            max_degree,
        })
    }
}

/// Bounds-checked little-endian cursor over page bytes
struct PageReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PageReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                ArborError::CorruptPage(format!(
                    "read of {} bytes at offset {} runs past the page",
                    len, self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.bytes(8)?);
        Ok(i64::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(t: usize, keys: &[Key]) -> Node {
        let mut node = Node::new_leaf(t);
        for (i, &k) in keys.iter().enumerate() {
            node.insert_entry(i, k, format!("v{}", k).into_bytes()).unwrap();
        }
        node
    }

    #[test]
    fn test_leaf_round_trip() {
        let node = leaf(3, &[-5, 0, 7, 1 << 40]);
        let mut page = [0u8; PAGE_SIZE];
        node.encode(&mut page).unwrap();
        assert_eq!(Node::decode(&page).unwrap(), node);
    }

    #[test]
    fn test_internal_round_trip() {
        let mut node = Node::new_internal(2);
        node.keys = vec![10, 20];
        node.children = vec![PageId::new(3), PageId::new(4), PageId::new(5)];

        let mut page = [0u8; PAGE_SIZE];
        node.encode(&mut page).unwrap();
        assert_eq!(Node::decode(&page).unwrap(), node);
    }

    #[test]
    fn test_empty_leaf_and_max_values_round_trip() {
        let empty = Node::new_leaf(4);
        let mut page = [0u8; PAGE_SIZE];
        empty.encode(&mut page).unwrap();
        assert_eq!(Node::decode(&page).unwrap(), empty);

        let t = 4;
        let mut full = Node::new_leaf(t);
        for i in 0..(2 * t - 1) {
            full.insert_entry(i, i as Key, vec![0xAB; max_value_len(t)])
                .unwrap();
        }
        full.encode(&mut page).unwrap();
        assert_eq!(Node::decode(&page).unwrap(), full);
    }

    #[test]
    fn test_encode_rejects_oversized_value() {
        let mut node = Node::new_leaf(4);
        node.insert_entry(0, 1, vec![0; max_value_len(4) + 1]).unwrap();

        let mut page = [0u8; PAGE_SIZE];
        assert!(matches!(
            node.encode(&mut page),
            Err(ArborError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_shape_mismatch() {
        let mut node = Node::new_internal(2);
        node.keys = vec![10];
        node.children = vec![PageId::new(3)];

        let mut page = [0u8; PAGE_SIZE];
        assert!(matches!(
            node.encode(&mut page),
            Err(ArborError::IndexCorrupted(_))
        ));
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let node = leaf(2, &[1, 2]);
        let mut page = [0u8; PAGE_SIZE];
        node.encode(&mut page).unwrap();

        let mut bad_flag = page;
        bad_flag[IS_LEAF_OFFSET] = 7;
        assert!(matches!(Node::decode(&bad_flag), Err(ArborError::CorruptPage(_))));

        let mut bad_degree = page;
        bad_degree[MAX_DEGREE_OFFSET..MAX_DEGREE_OFFSET + 4].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(Node::decode(&bad_degree), Err(ArborError::CorruptPage(_))));

        let mut bad_count = page;
        bad_count[NUM_KEYS_OFFSET..NUM_KEYS_OFFSET + 4].copy_from_slice(&4u32.to_le_bytes());
        assert!(matches!(Node::decode(&bad_count), Err(ArborError::CorruptPage(_))));

        let mut bad_len = page;
        let len_offset = NODE_HEADER_SIZE + 2 * KEY_SIZE;
        bad_len[len_offset..len_offset + 4].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
        assert!(matches!(Node::decode(&bad_len), Err(ArborError::CorruptPage(_))));

        // An all-zero page is not a node
        assert!(Node::decode(&[0u8; PAGE_SIZE]).is_err());
    }

    #[test]
    fn test_insert_refuses_overflow() {
        let mut node = leaf(2, &[1, 2, 3]);
        assert!(node.is_full());
        assert!(node.insert_entry(3, 4, Vec::new()).is_err());
        assert_eq!(node.num_keys(), 3);
    }

    #[test]
    fn test_split_leaf_keeps_separator_on_right() {
        let mut node = leaf(3, &[1, 2, 3, 4, 5]);
        let (separator, right) = node.split_leaf();

        assert_eq!(separator, 3);
        assert_eq!(node.keys, vec![1, 2]);
        assert_eq!(right.keys, vec![3, 4, 5]);
        assert_eq!(right.values[0], b"v3".to_vec());
    }

    #[test]
    fn test_split_internal_moves_median_up() {
        let mut node = Node::new_internal(3);
        node.keys = vec![10, 20, 30, 40, 50];
        node.children = (0..6).map(PageId::new).collect();

        let (median, right) = node.split_internal();

        assert_eq!(median, 30);
        assert_eq!(node.keys, vec![10, 20]);
        assert_eq!(node.children, (0..3).map(PageId::new).collect::<Vec<_>>());
        assert_eq!(right.keys, vec![40, 50]);
        assert_eq!(right.children, (3..6).map(PageId::new).collect::<Vec<_>>());
    }

    #[test]
    fn test_child_index_routes_equal_keys_right() {
        let mut node = Node::new_internal(2);
        node.keys = vec![10, 20];
        node.children = vec![PageId::new(1), PageId::new(2), PageId::new(3)];

        assert_eq!(node.child_index(5), 0);
        assert_eq!(node.child_index(10), 1);
        assert_eq!(node.child_index(15), 1);
        assert_eq!(node.child_index(20), 2);
        assert_eq!(node.child_index(99), 2);
    }
}
