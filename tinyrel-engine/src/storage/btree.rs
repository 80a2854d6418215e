//! Persistent B+ tree index over a page file
//!
//! Page 0 holds the header: tree height (i32 LE) then root PageId (i32 LE);
//! `-1` as the root id marks an empty tree. Nodes are appended from page 1
//! onward and never reclaimed. Leaves sit at depth `tree_height`, the root
//! at depth 1; leaves are chained left to right through their trailer
//! pointers.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, error, trace};

use crate::error::{EngineError, EngineResult};
use crate::storage::node::{LeafNode, NonLeafNode, NO_NEXT_LEAF};
use crate::storage::pagefile::{OpenMode, PageFile, PageId, PAGE_SIZE};
use crate::storage::record::RecordId;

/// Root sentinel of an empty tree
const ROOT_NONE: PageId = -1;

/// Position in the key-ordered sequence of leaf entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexCursor {
    /// Leaf page, or -1 once the chain is exhausted
    pub pid: PageId,
    /// Entry index within the leaf
    pub eid: usize,
}

/// A disk-resident B+ tree mapping i32 keys to record ids
pub struct BTreeIndex {
    pf: PageFile,
    root_pid: PageId,
    tree_height: i32,
    write_mode: bool,
    closed: bool,
}

impl BTreeIndex {
    /// Open an index file, creating it (with an empty-tree header) in
    /// `ReadWrite` mode
    pub fn open(path: &Path, mode: OpenMode) -> EngineResult<Self> {
        let mut pf = PageFile::open(path, mode)?;
        let write_mode = mode == OpenMode::ReadWrite;

        let (tree_height, root_pid);
        if pf.end_pid() == 0 {
            tree_height = 0;
            root_pid = ROOT_NONE;
            if write_mode {
                let mut page = [0u8; PAGE_SIZE];
                LittleEndian::write_i32(&mut page[0..4], tree_height);
                LittleEndian::write_i32(&mut page[4..8], root_pid);
                pf.write(0, &page)?;
            }
        } else {
            let page = pf.read(0)?;
            tree_height = LittleEndian::read_i32(&page[0..4]);
            root_pid = LittleEndian::read_i32(&page[4..8]);
        }

        debug!(path = %path.display(), tree_height, root_pid, "index opened");
        Ok(BTreeIndex {
            pf,
            root_pid,
            tree_height,
            write_mode,
            closed: false,
        })
    }

    /// Flush the header (in write mode) and close the index
    pub fn close(&mut self) -> EngineResult<()> {
        if self.closed {
            return Ok(());
        }
        if self.write_mode {
            self.write_header()?;
        }
        self.closed = true;
        Ok(())
    }

    fn write_header(&mut self) -> EngineResult<()> {
        let mut page = [0u8; PAGE_SIZE];
        LittleEndian::write_i32(&mut page[0..4], self.tree_height);
        LittleEndian::write_i32(&mut page[4..8], self.root_pid);
        self.pf.write(0, &page)
    }

    /// Current root page id; -1 while the tree is empty
    pub fn root_pid(&self) -> PageId {
        self.root_pid
    }

    /// Current tree height; 0 while the tree is empty
    pub fn tree_height(&self) -> i32 {
        self.tree_height
    }

    /// Insert a (key, rid) pair
    pub fn insert(&mut self, key: i32, rid: RecordId) -> EngineResult<()> {
        if self.root_pid == ROOT_NONE {
            let mut leaf = LeafNode::new();
            leaf.insert(key, rid)?;
            let pid = self.pf.end_pid();
            leaf.write(pid, &mut self.pf)?;
            self.root_pid = pid;
            self.tree_height = 1;
            debug!(root = pid, "created root leaf");
            return Ok(());
        }

        if let Some((mid_key, new_pid)) = self.insert_recursive(key, rid, self.root_pid, 1)? {
            let mut root = NonLeafNode::new();
            root.initialize_root(self.root_pid, mid_key, new_pid);
            let pid = self.pf.end_pid();
            root.write(pid, &mut self.pf)?;
            self.root_pid = pid;
            self.tree_height += 1;
            debug!(height = self.tree_height, root = pid, "root split");
        }
        Ok(())
    }

    /// Descend to the leaf level, splitting on the way back up.
    ///
    /// Returns the (promoted key, new sibling page) pair when the child at
    /// this level split, for insertion into the caller's node.
    fn insert_recursive(
        &mut self,
        key: i32,
        rid: RecordId,
        pid: PageId,
        depth: i32,
    ) -> EngineResult<Option<(i32, PageId)>> {
        if depth >= self.tree_height {
            let mut leaf = LeafNode::read(pid, &mut self.pf)?;
            return match leaf.insert(key, rid) {
                Ok(()) => {
                    leaf.write(pid, &mut self.pf)?;
                    Ok(None)
                }
                Err(EngineError::NodeFull) => {
                    let mut sibling = LeafNode::new();
                    // the sibling occupies the next free page; the source is
                    // written first so its chain pointer never dangles
                    let sibling_pid = self.pf.end_pid();
                    let first_key = leaf.insert_and_split(key, rid, &mut sibling);
                    leaf.set_next_ptr(sibling_pid);
                    leaf.write(pid, &mut self.pf)?;
                    sibling.write(sibling_pid, &mut self.pf)?;
                    trace!(from = pid, to = sibling_pid, first_key, "leaf split");
                    Ok(Some((first_key, sibling_pid)))
                }
                Err(err) => Err(err),
            };
        }

        let mut node = NonLeafNode::read(pid, &mut self.pf)?;
        let child = node.locate_child(key);
        let Some((promoted, new_child)) = self.insert_recursive(key, rid, child, depth + 1)? else {
            return Ok(None);
        };

        match node.insert(promoted, new_child) {
            Ok(()) => {
                node.write(pid, &mut self.pf)?;
                Ok(None)
            }
            Err(EngineError::NodeFull) => {
                let mut sibling = NonLeafNode::new();
                let sibling_pid = self.pf.end_pid();
                let mid_key = node.insert_and_split(promoted, new_child, &mut sibling);
                node.write(pid, &mut self.pf)?;
                sibling.write(sibling_pid, &mut self.pf)?;
                trace!(from = pid, to = sibling_pid, mid_key, "non-leaf split");
                Ok(Some((mid_key, sibling_pid)))
            }
            Err(err) => Err(err),
        }
    }

    /// Position a cursor at the first entry whose key is >= `search_key`
    ///
    /// Returns the cursor and whether the exact key was found. The cursor
    /// may sit one past the last entry of its leaf when every key there is
    /// smaller; `read_forward` and `normalize` handle that position. An
    /// empty tree yields `NoSuchRecord`.
    pub fn locate(&mut self, search_key: i32) -> EngineResult<(IndexCursor, bool)> {
        if self.root_pid == ROOT_NONE {
            return Err(EngineError::NoSuchRecord);
        }

        let mut pid = self.root_pid;
        for _ in 1..self.tree_height {
            let node = NonLeafNode::read(pid, &mut self.pf)?;
            pid = node.locate_child(search_key);
        }

        let leaf = LeafNode::read(pid, &mut self.pf)?;
        let (eid, found) = leaf.locate(search_key);
        Ok((IndexCursor { pid, eid }, found))
    }

    /// Read the entry under the cursor and advance it
    ///
    /// Advances within the leaf or hops the chain; a cursor past the end of
    /// its leaf hops before reading. `NoSuchRecord` marks an exhausted
    /// chain, with the cursor left at the -1 sentinel.
    pub fn read_forward(&mut self, cursor: &mut IndexCursor) -> EngineResult<(i32, RecordId)> {
        loop {
            if cursor.pid == NO_NEXT_LEAF {
                return Err(EngineError::NoSuchRecord);
            }
            let leaf = LeafNode::read(cursor.pid, &mut self.pf)?;
            let count = leaf.key_count();
            if cursor.eid < count {
                let (key, rid) = leaf.read_entry(cursor.eid);
                if cursor.eid + 1 >= count {
                    *cursor = IndexCursor { pid: leaf.next_ptr(), eid: 0 };
                } else {
                    cursor.eid += 1;
                }
                return Ok((key, rid));
            }
            *cursor = IndexCursor { pid: leaf.next_ptr(), eid: 0 };
        }
    }

    /// Canonicalize a cursor onto the entry the next `read_forward` returns
    ///
    /// Past-the-end leaf positions hop onto the next leaf (or the -1
    /// sentinel), so equal positions compare equal.
    pub fn normalize(&mut self, cursor: &mut IndexCursor) -> EngineResult<()> {
        while cursor.pid != NO_NEXT_LEAF {
            let leaf = LeafNode::read(cursor.pid, &mut self.pf)?;
            if cursor.eid < leaf.key_count() {
                break;
            }
            *cursor = IndexCursor { pid: leaf.next_ptr(), eid: 0 };
        }
        Ok(())
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        if self.write_mode && !self.closed {
            if let Err(err) = self.close() {
                error!(%err, "index header flush failed on drop");
            }
        }
    }
}
