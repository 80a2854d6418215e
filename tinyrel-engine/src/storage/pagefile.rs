//! Page I/O for tinyrel files
//!
//! Table and index files are arrays of fixed-size pages addressed by a
//! signed 32-bit `PageId`; `-1` is the "absent" sentinel used by the tree
//! layer. The page file owns the file descriptor and a small write-through
//! LRU cache, the only buffering the engine performs.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use tracing::trace;

use crate::error::{EngineError, EngineResult};

/// Size of every page, in bytes
pub const PAGE_SIZE: usize = 1024;

/// Index of a page within a file; -1 denotes "absent"
pub type PageId = i32;

/// A raw page image
pub type PageBuf = [u8; PAGE_SIZE];

/// Number of pages the built-in cache keeps in memory
const CACHE_PAGES: usize = 64;

/// File open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; the file must already exist
    ReadOnly,
    /// Read-write; the file is created when missing
    ReadWrite,
}

/// A file of fixed-size pages
pub struct PageFile {
    file: File,
    mode: OpenMode,
    end_pid: PageId,
    cache: LruCache<PageId, PageBuf>,
}

impl PageFile {
    /// Open a page file, creating it in `ReadWrite` mode
    pub fn open(path: &Path, mode: OpenMode) -> EngineResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .create(mode == OpenMode::ReadWrite)
            .open(path)
            .map_err(EngineError::FileOpenFailed)?;

        let len = file.metadata().map_err(EngineError::FileOpenFailed)?.len();
        let end_pid = (len / PAGE_SIZE as u64) as PageId;
        trace!(path = %path.display(), end_pid, "page file opened");

        Ok(PageFile {
            file,
            mode,
            end_pid,
            cache: LruCache::new(NonZeroUsize::new(CACHE_PAGES).unwrap()),
        })
    }

    /// First free page id; the next appended page lands here
    pub fn end_pid(&self) -> PageId {
        self.end_pid
    }

    /// Read a full page
    pub fn read(&mut self, pid: PageId) -> EngineResult<PageBuf> {
        if pid < 0 || pid >= self.end_pid {
            return Err(EngineError::FileReadFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("page {} out of range", pid),
            )));
        }

        if let Some(page) = self.cache.get(&pid) {
            return Ok(*page);
        }

        let mut page = [0u8; PAGE_SIZE];
        self.file
            .seek(SeekFrom::Start(pid as u64 * PAGE_SIZE as u64))
            .map_err(EngineError::FileReadFailed)?;
        self.file
            .read_exact(&mut page)
            .map_err(EngineError::FileReadFailed)?;

        self.cache.put(pid, page);
        Ok(page)
    }

    /// Write a full page; writing at `end_pid()` extends the file
    pub fn write(&mut self, pid: PageId, page: &PageBuf) -> EngineResult<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(EngineError::FileWriteFailed(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is open read-only",
            )));
        }
        if pid < 0 || pid > self.end_pid {
            return Err(EngineError::FileWriteFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("page {} past end of file", pid),
            )));
        }

        self.file
            .seek(SeekFrom::Start(pid as u64 * PAGE_SIZE as u64))
            .map_err(EngineError::FileWriteFailed)?;
        self.file
            .write_all(page)
            .map_err(EngineError::FileWriteFailed)?;

        if pid == self.end_pid {
            self.end_pid += 1;
        }
        self.cache.put(pid, *page);
        Ok(())
    }
}
