use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O: it maps page
/// numbers to fixed-size slots of a single database file and hands out
/// fresh page numbers.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicU32,
    free_pages: Mutex<Vec<PageId>>,
}

impl DiskManager {
    /// Open (or create) the database file at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        // Resume allocation after the last page already on disk.
        let file_size = file.metadata()?.len();
        let next_page_id = (file_size / PAGE_SIZE as u64) as PageId;

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: AtomicU32::new(next_page_id),
            free_pages: Mutex::new(Vec::new()),
        })
    }

    /// Read a page from disk into `buf`. A page past the end of the file
    /// has never been written back; it reads as zeroes.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Write a page image to disk.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(())
    }

    /// Hand out a page number, reusing deallocated pages before growing
    /// the file.
    pub fn allocate_page(&self) -> PageId {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return page_id;
        }
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Return a page number to the allocator.
    pub fn deallocate_page(&self, page_id: PageId) {
        if page_id == INVALID_PAGE_ID {
            return;
        }
        self.free_pages.lock().push(page_id);
    }
}
