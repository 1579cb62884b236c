mod delete;
mod insert;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::debug;

use crate::common::types::{
    PageId, PagePtr, PageReadGuard, PageWriteGuard, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID,
    PAGE_SIZE, RID_ENCODED_LEN,
};
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::TreeIterator;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{
    InternalRef, LeafRef, NodeRef, INTERNAL_HEADER_SIZE, LEAF_HEADER_SIZE,
};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{HeaderPageMut, HeaderPageRef};

/// How a root-to-leaf descent latches the pages it visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LatchMode {
    /// Read latches everywhere; parents released immediately.
    Read,
    /// Optimistic write: read latches on internals, write latch on the
    /// leaf; parents released immediately.
    Update,
    /// Pessimistic insert: write latches; parents held until the child
    /// cannot split.
    Insert,
    /// Pessimistic delete: write latches; parents held until the child
    /// cannot underflow.
    Delete,
}

/// An owned page latch of either polarity.
pub(crate) enum PageLatch {
    Read(PageReadGuard),
    Write(PageWriteGuard),
}

impl PageLatch {
    pub(crate) fn data(&self) -> &[u8] {
        match self {
            PageLatch::Read(guard) => &guard.data,
            PageLatch::Write(guard) => &guard.data,
        }
    }

    pub(crate) fn write_data(&mut self) -> &mut [u8] {
        match self {
            PageLatch::Write(guard) => &mut guard.data,
            PageLatch::Read(_) => unreachable!("descent holds a write latch here"),
        }
    }

    fn is_write(&self) -> bool {
        matches!(self, PageLatch::Write(_))
    }
}

pub(crate) struct LatchEntry {
    pub(crate) page_id: PageId,
    pub(crate) latch: PageLatch,
}

/// Latches held by one descent, in acquisition (root-to-leaf) order.
/// Lives on the descending thread's stack and is never shared.
pub(crate) struct LatchRegistry {
    buffer_pool: Arc<BufferPoolManager>,
    entries: Vec<LatchEntry>,
}

impl LatchRegistry {
    fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            entries: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entry(&self, index: usize) -> &LatchEntry {
        &self.entries[index]
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut LatchEntry {
        &mut self.entries[index]
    }

    /// Disjoint mutable access to an ancestor/descendant pair.
    pub(crate) fn pair_mut(
        &mut self,
        first: usize,
        second: usize,
    ) -> (&mut LatchEntry, &mut LatchEntry) {
        debug_assert!(first < second);
        let (head, tail) = self.entries.split_at_mut(second);
        (&mut head[first], &mut tail[0])
    }

    fn push(&mut self, entry: LatchEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn take_last(&mut self) -> Option<LatchEntry> {
        self.entries.pop()
    }

    /// Unlatch and unpin everything, oldest first. Pages held under a
    /// write latch are unpinned dirty when `dirty` is set.
    pub(crate) fn release_all(&mut self, dirty: bool) {
        for entry in self.entries.drain(..) {
            let was_write = entry.latch.is_write();
            drop(entry.latch);
            self.buffer_pool.unpin_page(entry.page_id, dirty && was_write);
        }
    }
}

impl Drop for LatchRegistry {
    fn drop(&mut self) {
        self.release_all(true);
    }
}

/// Thread-safe B+ tree index over fixed-width keys, mapping each key to
/// one record id. Pages are fetched through the buffer pool and latched
/// hand-over-hand during descents.
pub struct BPlusTree<K: IndexKey> {
    name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: AtomicU32,
    leaf_max_size: usize,
    internal_max_size: usize,
    _key: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Create an empty tree. The root is materialized lazily on the
    /// first insert and registered in the header directory under `name`.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let leaf_entry = K::ENCODED_LEN + RID_ENCODED_LEN;
        let internal_entry = K::ENCODED_LEN + 4;
        // a page must fit max_size entries: splits run one entry over the
        // stable bound
        if leaf_max_size < 3
            || internal_max_size < 3
            || LEAF_HEADER_SIZE + leaf_max_size * leaf_entry > PAGE_SIZE
            || INTERNAL_HEADER_SIZE + internal_max_size * internal_entry > PAGE_SIZE
        {
            return Err(BTreeError::InvalidOrder);
        }

        Ok(Self {
            name: name.into(),
            buffer_pool,
            root_page_id: AtomicU32::new(INVALID_PAGE_ID),
            leaf_max_size,
            internal_max_size,
            _key: PhantomData,
        })
    }

    /// Create a tree whose orders are derived from the page capacity for
    /// this key width.
    pub fn with_default_orders(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let leaf_max = (PAGE_SIZE - LEAF_HEADER_SIZE) / (K::ENCODED_LEN + RID_ENCODED_LEN);
        let internal_max = (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::ENCODED_LEN + 4);
        Self::new(name, buffer_pool, leaf_max, internal_max)
    }

    /// Re-attach to an index previously registered in the header
    /// directory of this database file.
    pub fn open(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let tree = Self::new(name, buffer_pool, leaf_max_size, internal_max_size)?;

        let page = tree.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root = {
            let guard = page.read();
            HeaderPageRef::new(&guard.data).get_root_id(&tree.name)
        };
        tree.buffer_pool.unpin_page(HEADER_PAGE_ID, false);

        if let Some(root_page_id) = root {
            tree.root_page_id.store(root_page_id, Ordering::SeqCst);
        }
        Ok(tree)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id.load(Ordering::SeqCst) == INVALID_PAGE_ID
    }

    pub(crate) fn root(&self) -> PageId {
        self.root_page_id.load(Ordering::SeqCst)
    }

    pub(crate) fn set_root(&self, page_id: PageId) {
        self.root_page_id.store(page_id, Ordering::SeqCst);
    }

    pub(crate) fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub(crate) fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub(crate) fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    /// Point lookup.
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut registry = self.find_leaf(Some(key), LatchMode::Read)?;
        let result = {
            let entry = registry.entry(registry.len() - 1);
            LeafRef::<K>::new(entry.latch.data()).lookup(key)
        };
        registry.release_all(false);
        Ok(result)
    }

    /// Iterate every entry in ascending key order.
    pub fn iter(&self) -> Result<TreeIterator<K>, BTreeError> {
        if self.is_empty() {
            return Ok(TreeIterator::end(self.buffer_pool.clone()));
        }
        let mut registry = self.find_leaf(None, LatchMode::Read)?;
        self.iterator_from_registry(&mut registry, 0)
    }

    /// Iterate entries with key >= `key` in ascending order.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>, BTreeError> {
        if self.is_empty() {
            return Ok(TreeIterator::end(self.buffer_pool.clone()));
        }
        let mut registry = self.find_leaf(Some(key), LatchMode::Read)?;
        let index = {
            let entry = registry.entry(registry.len() - 1);
            LeafRef::<K>::new(entry.latch.data()).key_index(key)
        };
        self.iterator_from_registry(&mut registry, index)
    }

    fn iterator_from_registry(
        &self,
        registry: &mut LatchRegistry,
        index: usize,
    ) -> Result<TreeIterator<K>, BTreeError> {
        let entry = match registry.take_last() {
            Some(entry) => entry,
            None => return Ok(TreeIterator::end(self.buffer_pool.clone())),
        };
        match entry.latch {
            PageLatch::Read(guard) => {
                TreeIterator::new(self.buffer_pool.clone(), Some(guard), index)
            }
            PageLatch::Write(_) => unreachable!("iterators descend with read latches"),
        }
    }

    /// Latch one page according to the descent mode. In UPDATE mode the
    /// node kind picks the polarity: the pin plus the still-held parent
    /// latch keep the node's kind and key range stable across the
    /// read-to-write upgrade.
    fn acquire_latch(&self, page: &PagePtr, mode: LatchMode) -> PageLatch {
        match mode {
            LatchMode::Read => PageLatch::Read(page.read_arc()),
            LatchMode::Insert | LatchMode::Delete => PageLatch::Write(page.write_arc()),
            LatchMode::Update => {
                let guard = page.read_arc();
                if !NodeRef::new(&guard.data).is_leaf() {
                    PageLatch::Read(guard)
                } else {
                    drop(guard);
                    PageLatch::Write(page.write_arc())
                }
            }
        }
    }

    /// Crab from the root to the leaf responsible for `key` (or the
    /// leftmost leaf when `key` is `None`). The returned registry ends
    /// with the leaf; ancestors that could still be restructured by this
    /// operation remain latched in front of it.
    pub(crate) fn find_leaf(
        &self,
        key: Option<&K>,
        mode: LatchMode,
    ) -> Result<LatchRegistry, BTreeError> {
        let mut registry = LatchRegistry::new(self.buffer_pool.clone());
        let mut next_page_id = self.root();
        let mut first_round = true;

        loop {
            let page = self.buffer_pool.fetch_page(next_page_id)?;
            let latch = self.acquire_latch(&page, mode);

            // A concurrent split or root collapse may have replaced the
            // root after we loaded its id.
            if first_round && next_page_id != self.root() {
                drop(latch);
                self.buffer_pool.unpin_page(next_page_id, false);
                next_page_id = self.root();
                continue;
            }
            first_round = false;

            let (is_leaf, release_parents, child) = {
                let node = NodeRef::new(latch.data());
                let release = match mode {
                    LatchMode::Read | LatchMode::Update => true,
                    LatchMode::Insert => node.size() < node.max_size() - 1,
                    LatchMode::Delete => node.size() > node.min_size(),
                };
                if node.is_leaf() {
                    (true, release, INVALID_PAGE_ID)
                } else {
                    let internal = InternalRef::<K>::new(latch.data());
                    let child = match key {
                        Some(k) => internal.lookup(k),
                        None => internal.value_at(0),
                    };
                    (false, release, child)
                }
            };

            if release_parents {
                registry.release_all(false);
            }
            registry.push(LatchEntry {
                page_id: next_page_id,
                latch,
            });

            if is_leaf {
                return Ok(registry);
            }
            next_page_id = child;
        }
    }

    /// Record the current root page id in the page-0 directory.
    pub(crate) fn update_root_page_id(&self, insert_record: bool) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root = self.root();
        {
            let mut guard = page.write();
            let mut header = HeaderPageMut::new(&mut guard.data);
            if !insert_record || !header.insert_record(&self.name, root) {
                header.update_record(&self.name, root);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        debug!("index {}: root page id now {}", self.name, root);
        Ok(())
    }
}
