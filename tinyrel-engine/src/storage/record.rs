//! Heap table store
//!
//! Records are appended into fixed-size slots inside pages. Each page
//! carries a record count in its first word, followed by slots of a 4-byte
//! key, a 4-byte value length, and a fixed-width value field. Record ids
//! are (page, slot) pairs ordered lexicographically, so append order and
//! id order coincide.

use std::cmp::Ordering;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{EngineError, EngineResult};
use crate::storage::pagefile::{OpenMode, PageFile, PageId, PAGE_SIZE};

/// Maximum stored value length; longer values are truncated on append
pub const MAX_VALUE_LEN: usize = 120;

/// Record count header at the front of each page
const COUNT_SIZE: usize = 4;

/// Slot layout: key (4) + value length (4) + value field
const SLOT_SIZE: usize = 8 + MAX_VALUE_LEN;

/// Records per page
pub const RECORDS_PER_PAGE: usize = (PAGE_SIZE - COUNT_SIZE) / SLOT_SIZE;

/// Identifier of a record in the heap store: (page, slot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Page containing the record
    pub pid: PageId,
    /// Slot index within the page
    pub sid: i32,
}

impl RecordId {
    /// Packed width of a record id inside index leaf entries
    pub const SIZE: usize = 8;

    /// Pack into the on-disk leaf entry representation
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_i32(&mut buf[0..4], self.pid);
        LittleEndian::write_i32(&mut buf[4..8], self.sid);
        buf
    }

    /// Unpack from the on-disk leaf entry representation
    pub fn from_bytes(data: &[u8]) -> Self {
        RecordId {
            pid: LittleEndian::read_i32(&data[0..4]),
            sid: LittleEndian::read_i32(&data[4..8]),
        }
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.pid, self.sid).cmp(&(other.pid, other.sid))
    }
}

/// A heap table file of (key, value) records
pub struct RecordFile {
    pf: PageFile,
    end_rid: RecordId,
}

impl RecordFile {
    /// Open a table file, creating it in `ReadWrite` mode
    pub fn open(path: &Path, mode: OpenMode) -> EngineResult<Self> {
        let mut pf = PageFile::open(path, mode)?;

        let end_rid = if pf.end_pid() == 0 {
            RecordId::default()
        } else {
            let last = pf.end_pid() - 1;
            let page = pf.read(last)?;
            let count = LittleEndian::read_i32(&page[0..COUNT_SIZE]);
            if count as usize >= RECORDS_PER_PAGE {
                RecordId { pid: last + 1, sid: 0 }
            } else {
                RecordId { pid: last, sid: count }
            }
        };

        Ok(RecordFile { pf, end_rid })
    }

    /// End-of-file record id: one past the last record, the next append spot
    pub fn end_rid(&self) -> RecordId {
        self.end_rid
    }

    /// Append a record, returning its id
    pub fn append(&mut self, key: i32, value: &str) -> EngineResult<RecordId> {
        let rid = self.end_rid;

        let mut page = if rid.sid == 0 {
            [0u8; PAGE_SIZE]
        } else {
            self.pf.read(rid.pid)?
        };

        let stored = &value.as_bytes()[..value.len().min(MAX_VALUE_LEN)];
        let offset = COUNT_SIZE + rid.sid as usize * SLOT_SIZE;
        LittleEndian::write_i32(&mut page[offset..offset + 4], key);
        LittleEndian::write_i32(&mut page[offset + 4..offset + 8], stored.len() as i32);
        page[offset + 8..offset + 8 + stored.len()].copy_from_slice(stored);
        LittleEndian::write_i32(&mut page[0..COUNT_SIZE], rid.sid + 1);

        self.pf.write(rid.pid, &page)?;

        self.end_rid = if rid.sid as usize + 1 >= RECORDS_PER_PAGE {
            RecordId { pid: rid.pid + 1, sid: 0 }
        } else {
            RecordId { pid: rid.pid, sid: rid.sid + 1 }
        };
        Ok(rid)
    }

    /// Read the record with the given id
    pub fn read(&mut self, rid: RecordId) -> EngineResult<(i32, String)> {
        if rid.pid < 0 || rid.sid < 0 || rid.sid as usize >= RECORDS_PER_PAGE || rid >= self.end_rid {
            return Err(EngineError::FileReadFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("record ({}, {}) out of range", rid.pid, rid.sid),
            )));
        }

        let page = self.pf.read(rid.pid)?;
        let offset = COUNT_SIZE + rid.sid as usize * SLOT_SIZE;
        let key = LittleEndian::read_i32(&page[offset..offset + 4]);
        let len = LittleEndian::read_i32(&page[offset + 4..offset + 8]) as usize;
        let len = len.min(MAX_VALUE_LEN);
        let value = String::from_utf8_lossy(&page[offset + 8..offset + 8 + len]).into_owned();
        Ok((key, value))
    }

    /// Read the record under `cursor` and advance it, or report end of scan
    ///
    /// Start a scan from `RecordId::default()`; ids are visited in order.
    pub fn next(&mut self, cursor: &mut RecordId) -> EngineResult<Option<(i32, String)>> {
        if *cursor >= self.end_rid {
            return Ok(None);
        }
        let tuple = self.read(*cursor)?;
        *cursor = if cursor.sid as usize + 1 >= RECORDS_PER_PAGE {
            RecordId { pid: cursor.pid + 1, sid: 0 }
        } else {
            RecordId { pid: cursor.pid, sid: cursor.sid + 1 }
        };
        Ok(Some(tuple))
    }
}
