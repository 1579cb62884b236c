use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::{ClockReplacer, LruReplacer, Replacer, ReplacerKind};
use crate::storage::disk::DiskManager;

/// Bookkeeping for one frame. Guarded by the pool mutex, never by the
/// page latch.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

/// All mutable pool metadata behind one mutex: the page table, the free
/// list, the replacer and the per-frame metadata. Every frame is in
/// exactly one of {free list, mapped & pinned, mapped & evictable}.
struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
    frames: Vec<FrameMeta>,
}

/// Fixed-size cache of disk pages. Page content and its reader-writer
/// latch live outside the metadata mutex, so readers and writers of page
/// bytes do not serialize against table lookups.
pub struct BufferPoolManager {
    pool_size: usize,
    pages: Vec<PagePtr>,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Create a buffer pool over the database file at `db_path`, using
    /// LRU replacement.
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        Self::with_replacer(pool_size, db_path, ReplacerKind::Lru)
    }

    pub fn with_replacer(
        pool_size: usize,
        db_path: impl AsRef<Path>,
        kind: ReplacerKind,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);

        let replacer: Box<dyn Replacer> = match kind {
            ReplacerKind::Lru => Box::new(LruReplacer::new(pool_size)),
            ReplacerKind::Clock => Box::new(ClockReplacer::new(pool_size)),
        };

        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            pages.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(FrameMeta::new());
            free_list.push_back(i as FrameId);
        }

        Ok(Self {
            pool_size,
            pages,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                replacer,
                frames,
            }),
            disk_manager,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Fetch a page, pinning its frame. Reads from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        let mut inner = self.inner.lock();

        if let Some(frame_id) = inner.page_table.get(&page_id).copied() {
            let idx = frame_id as usize;
            if inner.frames[idx].pin_count == 0 {
                inner.replacer.pin(frame_id);
            }
            inner.frames[idx].pin_count += 1;
            return Ok(self.pages[idx].clone());
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let idx = frame_id as usize;

        // The frame is unreachable from other threads (not in the table,
        // pin count 0, metadata mutex held), so the content latch is
        // uncontended here.
        {
            let mut page = self.pages[idx].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page.data) {
                drop(page);
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
            page.page_id = page_id;
        }

        inner.page_table.insert(page_id, frame_id);
        let meta = &mut inner.frames[idx];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        Ok(self.pages[idx].clone())
    }

    /// Allocate a brand-new zeroed page, pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;
        let idx = frame_id as usize;

        let page_id = self.disk_manager.allocate_page();

        {
            let mut page = self.pages[idx].write();
            page.page_id = page_id;
            page.data.fill(0);
        }

        inner.page_table.insert(page_id, frame_id);
        let meta = &mut inner.frames[idx];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        Ok((self.pages[idx].clone(), page_id))
    }

    /// Drop one pin on a page, folding in the caller's dirty flag. When
    /// the pin count reaches zero the frame becomes evictable. Unknown or
    /// already-unpinned pages are a no-op.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return true,
        };
        let idx = frame_id as usize;
        if inner.frames[idx].pin_count == 0 {
            return true;
        }

        inner.frames[idx].pin_count -= 1;
        inner.frames[idx].is_dirty |= is_dirty;
        if inner.frames[idx].pin_count == 0 {
            inner.replacer.unpin(frame_id);
        }
        true
    }

    /// Write a cached page back to disk under its read latch and clear
    /// the dirty flag. Returns `Ok(false)` if the page is not cached.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(false),
        };
        let idx = frame_id as usize;

        {
            let page = self.pages[idx].read();
            self.disk_manager.write_page(page_id, &page.data)?;
        }
        inner.frames[idx].is_dirty = false;
        Ok(true)
    }

    /// Flush every dirty cached page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let mapped: Vec<(PageId, FrameId)> =
            inner.page_table.iter().map(|(&p, &f)| (p, f)).collect();
        for (page_id, frame_id) in mapped {
            let idx = frame_id as usize;
            if !inner.frames[idx].is_dirty {
                continue;
            }
            {
                let page = self.pages[idx].read();
                self.disk_manager.write_page(page_id, &page.data)?;
            }
            inner.frames[idx].is_dirty = false;
        }
        Ok(())
    }

    /// Remove a page from the pool and deallocate its disk page. Returns
    /// `Ok(false)` if the page is pinned. Absent pages deallocate only.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();

        if let Some(frame_id) = inner.page_table.get(&page_id).copied() {
            let idx = frame_id as usize;
            if inner.frames[idx].pin_count > 0 {
                return Ok(false);
            }
            inner.page_table.remove(&page_id);
            inner.replacer.pin(frame_id);
            let meta = &mut inner.frames[idx];
            meta.page_id = INVALID_PAGE_ID;
            meta.is_dirty = false;
            inner.free_list.push_back(frame_id);
        }

        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    /// Take a frame from the free list, or evict a victim, writing its
    /// old tenant back if dirty. On return the frame is unmapped with pin
    /// count 0.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match inner.replacer.victim() {
            Some(id) => id,
            None => {
                warn!("buffer pool exhausted: all {} frames pinned", self.pool_size);
                return Err(BufferPoolError::PoolExhausted);
            }
        };
        let idx = frame_id as usize;

        let old_page_id = inner.frames[idx].page_id;
        if inner.frames[idx].is_dirty {
            debug!("evicting dirty page {} from frame {}", old_page_id, frame_id);
            // pin count is 0 and the metadata mutex is held, so the frame
            // is unreachable; no content latch needed.
            let page = self.pages[idx].read();
            if let Err(e) = self.disk_manager.write_page(old_page_id, &page.data) {
                // Put the victim back; losing the frame would drop the
                // page's only copy.
                drop(page);
                inner.replacer.unpin(frame_id);
                return Err(e.into());
            }
            inner.frames[idx].is_dirty = false;
        }
        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }
}
