use std::marker::PhantomData;
use std::sync::Arc;

use crate::common::types::{PageReadGuard, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::LeafRef;
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over `(key, Rid)` entries in ascending key order.
/// Holds the read latch and pin of exactly one leaf at a time, walking
/// the leaf chain hand-over-hand.
pub struct TreeIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    leaf: Option<PageReadGuard>,
    index: usize,
    _key: PhantomData<K>,
}

impl<K: IndexKey> TreeIterator<K> {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        leaf: Option<PageReadGuard>,
        index: usize,
    ) -> Result<Self, BTreeError> {
        let mut iter = Self {
            buffer_pool,
            leaf,
            index,
            _key: PhantomData,
        };
        // the landing position may sit past the last entry of its leaf
        iter.skip_exhausted()?;
        Ok(iter)
    }

    pub(crate) fn end(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            leaf: None,
            index: 0,
            _key: PhantomData,
        }
    }

    /// Past the last entry?
    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    fn release_current(&mut self) {
        if let Some(guard) = self.leaf.take() {
            let page_id = guard.page_id;
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false);
        }
    }

    /// Walk forward until `index` points at a real entry, crossing leaf
    /// links as needed. The successor's latch is taken before the current
    /// leaf's latch is dropped.
    fn skip_exhausted(&mut self) -> Result<(), BTreeError> {
        loop {
            let next_page_id = match self.leaf.as_ref() {
                None => return Ok(()),
                Some(guard) => {
                    let leaf = LeafRef::<K>::new(&guard.data);
                    if self.index < leaf.size() {
                        return Ok(());
                    }
                    leaf.next_page_id()
                }
            };

            if next_page_id == INVALID_PAGE_ID {
                self.release_current();
                return Ok(());
            }

            let next_page = match self.buffer_pool.fetch_page(next_page_id) {
                Ok(page) => page,
                Err(e) => {
                    self.release_current();
                    return Err(e.into());
                }
            };
            let next_guard = next_page.read_arc();
            self.release_current();
            self.leaf = Some(next_guard);
            self.index = 0;
        }
    }
}

impl<K: IndexKey> Iterator for TreeIterator<K> {
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = {
            let guard = self.leaf.as_ref()?;
            LeafRef::<K>::new(&guard.data).item(self.index)
        };
        self.index += 1;
        if let Err(e) = self.skip_exhausted() {
            return Some(Err(e));
        }
        Some(Ok(item))
    }
}

impl<K: IndexKey> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        self.release_current();
    }
}
