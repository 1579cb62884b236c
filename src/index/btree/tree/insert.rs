use std::sync::atomic::Ordering;

use log::debug;

use crate::common::types::{PageId, PageWriteGuard, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{write_parent, InternalMut, LeafMut, NodeRef};
use crate::index::btree::tree::{BPlusTree, LatchMode, LatchRegistry};

impl<K: IndexKey> BPlusTree<K> {
    /// Insert a key/record pair. Returns `false` when the key is already
    /// present; the tree is unchanged in that case.
    pub fn insert(&self, key: &K, rid: Rid) -> Result<bool, BTreeError> {
        if self.is_empty() && self.start_new_tree(key, rid)? {
            return Ok(true);
        }
        self.insert_into_leaf(key, rid)
    }

    /// Materialize the first root as a single leaf. Returns `false` when
    /// another thread won the race; the caller re-enters the normal
    /// insert path.
    fn start_new_tree(&self, key: &K, rid: Rid) -> Result<bool, BTreeError> {
        let (page, page_id) = self.buffer_pool().new_page()?;
        let mut guard = page.write_arc();

        if self
            .root_page_id
            .compare_exchange(INVALID_PAGE_ID, page_id, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            drop(guard);
            self.buffer_pool().unpin_page(page_id, false);
            self.buffer_pool().delete_page(page_id)?;
            return Ok(false);
        }

        {
            let mut leaf = LeafMut::<K>::new(&mut guard.data);
            leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size());
            leaf.insert(key, rid);
        }
        drop(guard);
        self.buffer_pool().unpin_page(page_id, true);
        self.update_root_page_id(true)?;
        debug!("index {}: started new tree at page {}", self.name(), page_id);
        Ok(true)
    }

    fn insert_into_leaf(&self, key: &K, rid: Rid) -> Result<bool, BTreeError> {
        // optimistic round: only the leaf is write-latched
        let mut registry = self.find_leaf(Some(key), LatchMode::Update)?;
        if let Some(inserted) = self.try_insert_in_leaf(&mut registry, key, rid) {
            return Ok(inserted);
        }
        registry.release_all(false);
        drop(registry);

        // pessimistic round: ancestors that may split stay latched
        let mut registry = self.find_leaf(Some(key), LatchMode::Insert)?;
        if let Some(inserted) = self.try_insert_in_leaf(&mut registry, key, rid) {
            return Ok(inserted);
        }

        let leaf_index = registry.len() - 1;
        let (new_page, new_page_id) = self.buffer_pool().new_page()?;
        let mut new_guard = new_page.write_arc();

        let separator = {
            let entry = registry.entry_mut(leaf_index);
            let mut leaf = LeafMut::<K>::new(entry.latch.write_data());
            leaf.insert(key, rid);

            let mut sibling = LeafMut::<K>::new(&mut new_guard.data);
            sibling.init(new_page_id, leaf.as_ref().parent_page_id(), self.leaf_max_size());
            leaf.move_half_to(&mut sibling);
            sibling.set_next_page_id(leaf.as_ref().next_page_id());
            leaf.set_next_page_id(new_page_id);
            sibling.as_ref().key_at(0)
        };
        debug!(
            "index {}: split leaf {} into {}",
            self.name(),
            registry.entry(leaf_index).page_id,
            new_page_id
        );

        self.insert_into_parent(&mut registry, leaf_index, &separator, &mut new_guard, new_page_id)?;

        drop(new_guard);
        self.buffer_pool().unpin_page(new_page_id, true);
        registry.release_all(true);
        Ok(true)
    }

    /// Try to resolve the insert inside the latched leaf.
    /// `Some(true)` = inserted, `Some(false)` = duplicate key, `None` =
    /// the leaf must split and this round cannot do it.
    fn try_insert_in_leaf(
        &self,
        registry: &mut LatchRegistry,
        key: &K,
        rid: Rid,
    ) -> Option<bool> {
        let leaf_index = registry.len() - 1;
        let outcome = {
            let entry = registry.entry_mut(leaf_index);
            let mut leaf = LeafMut::<K>::new(entry.latch.write_data());
            let size = leaf.as_ref().size();
            if size < leaf.as_ref().max_size() - 1 {
                Some(leaf.insert(key, rid) > size)
            } else {
                let idx = leaf.as_ref().key_index(key);
                if idx < size && leaf.as_ref().key_at(idx) == *key {
                    Some(false)
                } else {
                    None
                }
            }
        };
        if let Some(inserted) = outcome {
            registry.release_all(inserted);
        }
        outcome
    }

    /// Wire a freshly split-off sibling into the parent of `old_index`'s
    /// node, growing a new root when the old node was the root. The
    /// parent, when one exists, is the preceding registry entry: the
    /// descent kept it latched precisely because this split was possible.
    fn insert_into_parent(
        &self,
        registry: &mut LatchRegistry,
        old_index: usize,
        separator: &K,
        new_guard: &mut PageWriteGuard,
        new_page_id: PageId,
    ) -> Result<(), BTreeError> {
        let (old_page_id, parent_page_id) = {
            let node = NodeRef::new(registry.entry(old_index).latch.data());
            (node.page_id(), node.parent_page_id())
        };

        if parent_page_id == INVALID_PAGE_ID {
            let (root_page, root_page_id) = self.buffer_pool().new_page()?;
            {
                let mut root_guard = root_page.write();
                let mut root = InternalMut::<K>::new(&mut root_guard.data);
                root.init(root_page_id, INVALID_PAGE_ID, self.internal_max_size());
                root.populate_new_root(old_page_id, separator, new_page_id);
            }
            write_parent(registry.entry_mut(old_index).latch.write_data(), root_page_id);
            write_parent(&mut new_guard.data, root_page_id);

            self.buffer_pool().unpin_page(root_page_id, true);
            self.set_root(root_page_id);
            self.update_root_page_id(false)?;
            debug!(
                "index {}: new root {} over {} and {}",
                self.name(),
                root_page_id,
                old_page_id,
                new_page_id
            );
            return Ok(());
        }

        let parent_index = old_index - 1;
        debug_assert_eq!(registry.entry(parent_index).page_id, parent_page_id);

        let parent_full = {
            let entry = registry.entry_mut(parent_index);
            let mut parent = InternalMut::<K>::new(entry.latch.write_data());
            parent.insert_node_after(old_page_id, separator, new_page_id);
            parent.as_ref().size() == parent.as_ref().max_size()
        };
        if !parent_full {
            return Ok(());
        }

        let (sibling_page, sibling_page_id) = self.buffer_pool().new_page()?;
        let mut sibling_guard = sibling_page.write_arc();
        let (promoted, moved_children) = {
            let entry = registry.entry_mut(parent_index);
            let mut parent = InternalMut::<K>::new(entry.latch.write_data());
            let mut sibling = InternalMut::<K>::new(&mut sibling_guard.data);
            sibling.init(
                sibling_page_id,
                parent.as_ref().parent_page_id(),
                self.internal_max_size(),
            );
            parent.move_half_to(&mut sibling);

            let view = sibling.as_ref();
            let moved: Vec<PageId> = (0..view.size()).map(|i| view.value_at(i)).collect();
            (view.key_at(0), moved)
        };
        debug!(
            "index {}: split internal {} into {}",
            self.name(),
            parent_page_id,
            sibling_page_id
        );
        self.adopt_children(&moved_children, sibling_page_id)?;

        self.insert_into_parent(registry, parent_index, &promoted, &mut sibling_guard, sibling_page_id)?;

        drop(sibling_guard);
        self.buffer_pool().unpin_page(sibling_page_id, true);
        Ok(())
    }

    /// Point relocated children at their new parent. The children are
    /// only reachable through pages this thread has write-latched.
    pub(crate) fn adopt_children(
        &self,
        children: &[PageId],
        parent_page_id: PageId,
    ) -> Result<(), BTreeError> {
        for &child_id in children {
            let page = self.buffer_pool().fetch_page(child_id)?;
            {
                let mut guard = page.write();
                write_parent(&mut guard.data, parent_page_id);
            }
            self.buffer_pool().unpin_page(child_id, true);
        }
        Ok(())
    }
}
