//! B+ tree node layouts
//!
//! Nodes are page-sized byte images manipulated through offset accessors.
//!
//! Leaf page format:
//! - bytes 0-3: key count (i32 LE)
//! - entries of 12 bytes each from offset 4: RecordId (8) then key (4),
//!   sorted by key ascending
//! - next-leaf PageId (i32 LE) immediately after the last live entry; the
//!   trailer moves when entries shift and must be preserved across inserts
//!
//! Non-leaf page format:
//! - bytes 0-3: key count (i32 LE)
//! - bytes 4-7: leftmost child PageId
//! - (key, child PageId) pairs of 8 bytes each from offset 8

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{EngineError, EngineResult};
use crate::storage::pagefile::{PageBuf, PageFile, PageId, PAGE_SIZE};
use crate::storage::record::RecordId;

const COUNT_SIZE: usize = 4;
const KEY_SIZE: usize = 4;
const PAGE_ID_SIZE: usize = 4;

/// Width of one leaf entry: a RecordId followed by its key
pub const LEAF_ENTRY_SIZE: usize = RecordId::SIZE + KEY_SIZE;

/// Width of one non-leaf (key, child) pair
pub const NONLEAF_PAIR_SIZE: usize = KEY_SIZE + PAGE_ID_SIZE;

/// Leaf capacity: entries plus the count word and the trailer must fit a page
pub const LEAF_MAX_KEYS: usize = (PAGE_SIZE - COUNT_SIZE - PAGE_ID_SIZE) / LEAF_ENTRY_SIZE;

/// Non-leaf capacity: pairs plus the count word and the left child pointer
pub const NONLEAF_MAX_KEYS: usize = (PAGE_SIZE - COUNT_SIZE - PAGE_ID_SIZE) / NONLEAF_PAIR_SIZE;

/// Next-leaf sentinel terminating the chain
pub const NO_NEXT_LEAF: PageId = -1;

/// A leaf node holding (key, RecordId) entries and a forward chain pointer
pub struct LeafNode {
    buf: PageBuf,
}

impl LeafNode {
    /// Create an empty leaf with a terminated chain pointer
    pub fn new() -> Self {
        let mut node = LeafNode { buf: [0u8; PAGE_SIZE] };
        node.set_next_ptr(NO_NEXT_LEAF);
        node
    }

    /// Read the node image from page `pid`
    pub fn read(pid: PageId, pf: &mut PageFile) -> EngineResult<Self> {
        Ok(LeafNode { buf: pf.read(pid)? })
    }

    /// Write the node image to page `pid`
    pub fn write(&self, pid: PageId, pf: &mut PageFile) -> EngineResult<()> {
        pf.write(pid, &self.buf)
    }

    /// Number of entries in the node
    pub fn key_count(&self) -> usize {
        LittleEndian::read_i32(&self.buf[0..COUNT_SIZE]) as usize
    }

    fn set_key_count(&mut self, count: usize) {
        LittleEndian::write_i32(&mut self.buf[0..COUNT_SIZE], count as i32);
    }

    fn entry_offset(eid: usize) -> usize {
        COUNT_SIZE + eid * LEAF_ENTRY_SIZE
    }

    /// Read the (key, rid) pair of entry `eid`; `eid` must be in range
    pub fn read_entry(&self, eid: usize) -> (i32, RecordId) {
        debug_assert!(eid < self.key_count());
        let offset = Self::entry_offset(eid);
        let rid = RecordId::from_bytes(&self.buf[offset..offset + RecordId::SIZE]);
        let key = LittleEndian::read_i32(&self.buf[offset + RecordId::SIZE..offset + LEAF_ENTRY_SIZE]);
        (key, rid)
    }

    fn write_entry(&mut self, eid: usize, key: i32, rid: RecordId) {
        let offset = Self::entry_offset(eid);
        self.buf[offset..offset + RecordId::SIZE].copy_from_slice(&rid.to_bytes());
        LittleEndian::write_i32(
            &mut self.buf[offset + RecordId::SIZE..offset + LEAF_ENTRY_SIZE],
            key,
        );
    }

    fn key_at(&self, eid: usize) -> i32 {
        let offset = Self::entry_offset(eid) + RecordId::SIZE;
        LittleEndian::read_i32(&self.buf[offset..offset + KEY_SIZE])
    }

    /// Find the smallest entry index whose key is >= `search_key`
    ///
    /// Returns `(eid, found)` where `found` means an exact match; `eid` is
    /// `key_count()` when every key is smaller.
    pub fn locate(&self, search_key: i32) -> (usize, bool) {
        let count = self.key_count();
        for eid in 0..count {
            let key = self.key_at(eid);
            if key >= search_key {
                return (eid, key == search_key);
            }
        }
        (count, false)
    }

    /// Insert (key, rid) in sorted position, preserving the chain trailer
    pub fn insert(&mut self, key: i32, rid: RecordId) -> EngineResult<()> {
        let count = self.key_count();
        if count >= LEAF_MAX_KEYS {
            return Err(EngineError::NodeFull);
        }

        let (eid, _) = self.locate(key);
        let next = self.next_ptr();
        let start = Self::entry_offset(eid);
        let end = Self::entry_offset(count);
        self.buf.copy_within(start..end, start + LEAF_ENTRY_SIZE);
        self.write_entry(eid, key, rid);
        self.set_key_count(count + 1);
        self.set_next_ptr(next);
        Ok(())
    }

    /// Insert into a full node and split with the empty `sibling`
    ///
    /// The lower half (rounded up) of the combined entries stays here; the
    /// rest move to `sibling`, which also inherits this node's old chain
    /// pointer. Returns the sibling's first key for the parent. The caller
    /// re-points this node's chain at the sibling's page.
    pub fn insert_and_split(&mut self, key: i32, rid: RecordId, sibling: &mut LeafNode) -> i32 {
        debug_assert_eq!(sibling.key_count(), 0);

        let next = self.next_ptr();
        let mut entries: Vec<(i32, RecordId)> =
            (0..self.key_count()).map(|eid| self.read_entry(eid)).collect();
        let pos = entries
            .iter()
            .position(|&(k, _)| k >= key)
            .unwrap_or(entries.len());
        entries.insert(pos, (key, rid));

        let retain = (entries.len() + 1) / 2;
        for (eid, &(k, r)) in entries[..retain].iter().enumerate() {
            self.write_entry(eid, k, r);
        }
        self.set_key_count(retain);
        self.set_next_ptr(next);

        for (eid, &(k, r)) in entries[retain..].iter().enumerate() {
            sibling.write_entry(eid, k, r);
        }
        sibling.set_key_count(entries.len() - retain);
        sibling.set_next_ptr(next);

        entries[retain].0
    }

    /// PageId of the next leaf in the chain
    pub fn next_ptr(&self) -> PageId {
        let offset = Self::entry_offset(self.key_count());
        LittleEndian::read_i32(&self.buf[offset..offset + PAGE_ID_SIZE])
    }

    /// Point the chain at `pid`; the key count must match the layout
    pub fn set_next_ptr(&mut self, pid: PageId) {
        let offset = Self::entry_offset(self.key_count());
        LittleEndian::write_i32(&mut self.buf[offset..offset + PAGE_ID_SIZE], pid);
    }
}

/// An interior node holding child pointers separated by keys
pub struct NonLeafNode {
    buf: PageBuf,
}

impl NonLeafNode {
    /// Create an empty non-leaf node
    pub fn new() -> Self {
        NonLeafNode { buf: [0u8; PAGE_SIZE] }
    }

    /// Read the node image from page `pid`
    pub fn read(pid: PageId, pf: &mut PageFile) -> EngineResult<Self> {
        Ok(NonLeafNode { buf: pf.read(pid)? })
    }

    /// Write the node image to page `pid`
    pub fn write(&self, pid: PageId, pf: &mut PageFile) -> EngineResult<()> {
        pf.write(pid, &self.buf)
    }

    /// Number of keys in the node; child pointers number one more
    pub fn key_count(&self) -> usize {
        LittleEndian::read_i32(&self.buf[0..COUNT_SIZE]) as usize
    }

    fn set_key_count(&mut self, count: usize) {
        LittleEndian::write_i32(&mut self.buf[0..COUNT_SIZE], count as i32);
    }

    fn key_offset(i: usize) -> usize {
        COUNT_SIZE + PAGE_ID_SIZE + i * NONLEAF_PAIR_SIZE
    }

    fn child_offset(i: usize) -> usize {
        COUNT_SIZE + i * NONLEAF_PAIR_SIZE
    }

    fn key_at(&self, i: usize) -> i32 {
        let offset = Self::key_offset(i);
        LittleEndian::read_i32(&self.buf[offset..offset + KEY_SIZE])
    }

    fn set_key_at(&mut self, i: usize, key: i32) {
        let offset = Self::key_offset(i);
        LittleEndian::write_i32(&mut self.buf[offset..offset + KEY_SIZE], key);
    }

    fn child_at(&self, i: usize) -> PageId {
        let offset = Self::child_offset(i);
        LittleEndian::read_i32(&self.buf[offset..offset + PAGE_ID_SIZE])
    }

    fn set_child_at(&mut self, i: usize, pid: PageId) {
        let offset = Self::child_offset(i);
        LittleEndian::write_i32(&mut self.buf[offset..offset + PAGE_ID_SIZE], pid);
    }

    /// Insert a (key, child) pair; `child` becomes the pointer right of `key`
    pub fn insert(&mut self, key: i32, child: PageId) -> EngineResult<()> {
        let count = self.key_count();
        if count >= NONLEAF_MAX_KEYS {
            return Err(EngineError::NodeFull);
        }

        let mut i = 0;
        while i < count && self.key_at(i) <= key {
            i += 1;
        }
        let start = Self::key_offset(i);
        let end = Self::key_offset(count);
        self.buf.copy_within(start..end, start + NONLEAF_PAIR_SIZE);
        self.set_key_at(i, key);
        self.set_child_at(i + 1, child);
        self.set_key_count(count + 1);
        Ok(())
    }

    /// Insert into a full node and split with the empty `sibling`
    ///
    /// The combined pairs are partitioned so the lower half (rounded up)
    /// stays here; the key after them is promoted and returned, and its
    /// right-hand child becomes the sibling's leftmost pointer.
    pub fn insert_and_split(&mut self, key: i32, child: PageId, sibling: &mut NonLeafNode) -> i32 {
        debug_assert_eq!(sibling.key_count(), 0);

        let count = self.key_count();
        let left = self.child_at(0);
        let mut pairs: Vec<(i32, PageId)> =
            (0..count).map(|i| (self.key_at(i), self.child_at(i + 1))).collect();
        let pos = pairs
            .iter()
            .position(|&(k, _)| k > key)
            .unwrap_or(pairs.len());
        pairs.insert(pos, (key, child));

        let retain = (pairs.len() + 1) / 2;
        let (mid_key, sibling_left) = pairs[retain];

        self.set_child_at(0, left);
        for (i, &(k, c)) in pairs[..retain].iter().enumerate() {
            self.set_key_at(i, k);
            self.set_child_at(i + 1, c);
        }
        self.set_key_count(retain);

        sibling.set_child_at(0, sibling_left);
        for (i, &(k, c)) in pairs[retain + 1..].iter().enumerate() {
            sibling.set_key_at(i, k);
            sibling.set_child_at(i + 1, c);
        }
        sibling.set_key_count(pairs.len() - retain - 1);

        mid_key
    }

    /// Child pointer to follow for `search_key`; ties route right
    pub fn locate_child(&self, search_key: i32) -> PageId {
        let count = self.key_count();
        let mut i = 0;
        while i < count && self.key_at(i) <= search_key {
            i += 1;
        }
        self.child_at(i)
    }

    /// Initialize a fresh root as (left, key, right)
    pub fn initialize_root(&mut self, left: PageId, key: i32, right: PageId) {
        self.set_key_count(1);
        self.set_child_at(0, left);
        self.set_key_at(0, key);
        self.set_child_at(1, right);
    }
}

impl Default for LeafNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for NonLeafNode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(n: i32) -> RecordId {
        RecordId { pid: n, sid: 0 }
    }

    #[test]
    fn test_capacities() {
        assert_eq!(LEAF_MAX_KEYS, 84);
        assert_eq!(NONLEAF_MAX_KEYS, 127);
    }

    #[test]
    fn test_leaf_insert_sorted() {
        let mut leaf = LeafNode::new();
        for key in [30, 10, 20] {
            leaf.insert(key, rid(key)).unwrap();
        }

        assert_eq!(leaf.key_count(), 3);
        assert_eq!(leaf.read_entry(0), (10, rid(10)));
        assert_eq!(leaf.read_entry(1), (20, rid(20)));
        assert_eq!(leaf.read_entry(2), (30, rid(30)));
    }

    #[test]
    fn test_leaf_locate() {
        let mut leaf = LeafNode::new();
        for key in [10, 20, 30] {
            leaf.insert(key, rid(key)).unwrap();
        }

        assert_eq!(leaf.locate(20), (1, true));
        assert_eq!(leaf.locate(15), (1, false));
        assert_eq!(leaf.locate(5), (0, false));
        assert_eq!(leaf.locate(31), (3, false));
    }

    #[test]
    fn test_leaf_trailer_survives_inserts() {
        let mut leaf = LeafNode::new();
        leaf.set_next_ptr(99);
        for key in [5, 3, 8, 1] {
            leaf.insert(key, rid(key)).unwrap();
        }
        assert_eq!(leaf.next_ptr(), 99);
    }

    #[test]
    fn test_leaf_full() {
        let mut leaf = LeafNode::new();
        for key in 0..LEAF_MAX_KEYS as i32 {
            leaf.insert(key, rid(key)).unwrap();
        }
        assert!(matches!(
            leaf.insert(500, rid(500)),
            Err(EngineError::NodeFull)
        ));
    }

    #[test]
    fn test_leaf_insert_and_split() {
        let mut leaf = LeafNode::new();
        leaf.set_next_ptr(77);
        for key in 0..LEAF_MAX_KEYS as i32 {
            leaf.insert(2 * key, rid(key)).unwrap();
        }

        let mut sibling = LeafNode::new();
        let first_key = leaf.insert_and_split(85, rid(500), &mut sibling);

        let total = LEAF_MAX_KEYS + 1;
        let retain = (total + 1) / 2;
        assert_eq!(leaf.key_count(), retain);
        assert_eq!(sibling.key_count(), total - retain);
        assert_eq!(first_key, sibling.read_entry(0).0);
        // sibling inherits the old chain pointer
        assert_eq!(sibling.next_ptr(), 77);

        // entries are globally sorted across the split pair
        let mut all = Vec::new();
        for eid in 0..leaf.key_count() {
            all.push(leaf.read_entry(eid).0);
        }
        for eid in 0..sibling.key_count() {
            all.push(sibling.read_entry(eid).0);
        }
        let mut sorted = all.clone();
        sorted.sort();
        assert_eq!(all, sorted);
        assert!(all.contains(&85));
    }

    #[test]
    fn test_leaf_duplicate_keys_coexist() {
        let mut leaf = LeafNode::new();
        leaf.insert(7, rid(1)).unwrap();
        leaf.insert(7, rid(2)).unwrap();
        assert_eq!(leaf.key_count(), 2);
        assert_eq!(leaf.read_entry(0).0, 7);
        assert_eq!(leaf.read_entry(1).0, 7);
    }

    #[test]
    fn test_nonleaf_insert_and_locate() {
        let mut node = NonLeafNode::new();
        node.initialize_root(1, 20, 2);
        node.insert(40, 3).unwrap();
        node.insert(10, 4).unwrap();

        // keys: 10, 20, 40; children: 1, 4, 2, 3
        assert_eq!(node.key_count(), 3);
        assert_eq!(node.locate_child(5), 1);
        assert_eq!(node.locate_child(10), 4);
        assert_eq!(node.locate_child(15), 4);
        assert_eq!(node.locate_child(20), 2);
        assert_eq!(node.locate_child(39), 2);
        assert_eq!(node.locate_child(40), 3);
        assert_eq!(node.locate_child(100), 3);
    }

    #[test]
    fn test_nonleaf_full() {
        let mut node = NonLeafNode::new();
        node.initialize_root(0, 0, 1);
        for i in 1..NONLEAF_MAX_KEYS as i32 {
            node.insert(i * 10, i + 1).unwrap();
        }
        assert!(matches!(node.insert(9999, 200), Err(EngineError::NodeFull)));
    }

    #[test]
    fn test_nonleaf_insert_and_split_promotes() {
        let mut node = NonLeafNode::new();
        node.initialize_root(0, 10, 1);
        for i in 1..NONLEAF_MAX_KEYS as i32 {
            node.insert(10 + i * 10, i + 1).unwrap();
        }
        assert_eq!(node.key_count(), NONLEAF_MAX_KEYS);

        let mut sibling = NonLeafNode::new();
        let new_child = 500;
        let mid_key = node.insert_and_split(15, new_child, &mut sibling);

        let total = NONLEAF_MAX_KEYS + 1;
        let retain = (total + 1) / 2;
        assert_eq!(node.key_count(), retain);
        // the promoted key is in neither node
        assert_eq!(sibling.key_count(), total - retain - 1);

        // promoted key separates the halves
        for i in 0..node.key_count() {
            assert!(node.key_at(i) < mid_key);
        }
        for i in 0..sibling.key_count() {
            assert!(sibling.key_at(i) > mid_key);
        }

        // sibling's leftmost child is the pointer right of the promoted key
        assert!(sibling.child_at(0) > 0);
    }

    #[test]
    fn test_initialize_root() {
        let mut node = NonLeafNode::new();
        node.initialize_root(4, 99, 7);
        assert_eq!(node.key_count(), 1);
        assert_eq!(node.locate_child(50), 4);
        assert_eq!(node.locate_child(99), 7);
        assert_eq!(node.locate_child(200), 7);
    }
}
