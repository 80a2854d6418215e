//! Storage layer for tinyrel files
//!
//! This module handles the on-disk format of table and index files:
//! - Fixed-size page I/O
//! - Heap record pages
//! - B+ tree node layouts
//! - The persistent B+ tree index

pub mod btree;
pub mod node;
pub mod pagefile;
pub mod record;

pub use btree::{BTreeIndex, IndexCursor};
pub use pagefile::{OpenMode, PageFile, PageId, PAGE_SIZE};
pub use record::{RecordFile, RecordId};
