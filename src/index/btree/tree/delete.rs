use log::debug;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{InternalMut, InternalRef, LeafMut, NodeRef};
use crate::index::btree::tree::{BPlusTree, LatchMode, LatchRegistry};

/// What the parent needs after a merge removed one of its separators.
enum ParentOutcome {
    Done,
    Rebalance,
    /// The root shrank to a single child; that child is the new root.
    Collapsed(PageId),
}

impl<K: IndexKey> BPlusTree<K> {
    /// Remove a key. Absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        if self.is_empty() {
            return Ok(());
        }

        // optimistic round: only the leaf is write-latched
        let mut registry = self.find_leaf(Some(key), LatchMode::Update)?;
        if self.try_remove_in_leaf(&mut registry, key) {
            return Ok(());
        }
        registry.release_all(false);
        drop(registry);

        // pessimistic round: ancestors that may underflow stay latched
        let mut registry = self.find_leaf(Some(key), LatchMode::Delete)?;
        if self.try_remove_in_leaf(&mut registry, key) {
            return Ok(());
        }

        let leaf_index = registry.len() - 1;
        {
            let entry = registry.entry_mut(leaf_index);
            let mut leaf = LeafMut::<K>::new(entry.latch.write_data());
            leaf.remove(key);
        }

        let mut discarded = Vec::new();
        self.rebalance(&mut registry, leaf_index, &mut discarded)?;
        registry.release_all(true);
        drop(registry);

        // emptied pages go back to the pool only after every latch is
        // down, so the pool never waits on this thread
        for page_id in discarded {
            self.buffer_pool().delete_page(page_id)?;
        }
        Ok(())
    }

    /// Try to resolve the removal inside the latched leaf. `true` means
    /// handled (removed, or the key was absent); `false` means the leaf
    /// would underflow and this round cannot rebalance it.
    fn try_remove_in_leaf(&self, registry: &mut LatchRegistry, key: &K) -> bool {
        let leaf_index = registry.len() - 1;
        let outcome = {
            let entry = registry.entry_mut(leaf_index);
            let mut leaf = LeafMut::<K>::new(entry.latch.write_data());
            let size = leaf.as_ref().size();
            let min_size = if leaf.as_ref().is_root() {
                0
            } else {
                leaf.as_ref().min_size()
            };
            if size > min_size {
                Some(leaf.remove(key) < size)
            } else {
                let idx = leaf.as_ref().key_index(key);
                if idx >= size || leaf.as_ref().key_at(idx) != *key {
                    Some(false)
                } else {
                    None
                }
            }
        };
        if let Some(removed) = outcome {
            registry.release_all(removed);
        }
        outcome.is_some()
    }

    /// Fix an underflowed non-root node by merging with or borrowing from
    /// a sibling. The parent is the preceding registry entry: the descent
    /// kept it latched precisely because this underflow was possible.
    fn rebalance(
        &self,
        registry: &mut LatchRegistry,
        node_index: usize,
        discarded: &mut Vec<PageId>,
    ) -> Result<(), BTreeError> {
        debug_assert!(node_index > 0, "the root never rebalances");
        let parent_index = node_index - 1;

        let (node_page_id, node_is_leaf, node_size, node_max_size) = {
            let node = NodeRef::new(registry.entry(node_index).latch.data());
            (node.page_id(), node.is_leaf(), node.size(), node.max_size())
        };

        // prefer the immediate left sibling; the leftmost child borrows
        // from its right neighbor instead
        let (node_child_index, neighbor_page_id) = {
            let parent = InternalRef::<K>::new(registry.entry(parent_index).latch.data());
            let Some(child_index) = parent.value_index(node_page_id) else {
                debug_assert!(false, "node {} missing from latched parent", node_page_id);
                return Ok(());
            };
            let neighbor_index = if child_index > 0 { child_index - 1 } else { 1 };
            (child_index, parent.value_at(neighbor_index))
        };

        let neighbor_page = self.buffer_pool().fetch_page(neighbor_page_id)?;
        let mut neighbor_guard = neighbor_page.write_arc();
        let neighbor_size = NodeRef::new(&neighbor_guard.data).size();

        if neighbor_size + node_size <= node_max_size {
            let (outcome, absorber_page_id) = if node_is_leaf {
                self.coalesce_leaf(
                    registry,
                    node_index,
                    &mut neighbor_guard.data,
                    neighbor_page_id,
                    node_child_index,
                    discarded,
                )
            } else {
                self.coalesce_internal(
                    registry,
                    node_index,
                    &mut neighbor_guard.data,
                    neighbor_page_id,
                    node_child_index,
                    discarded,
                )?
            };
            drop(neighbor_guard);
            self.buffer_pool().unpin_page(neighbor_page_id, true);

            match outcome {
                ParentOutcome::Done => {}
                ParentOutcome::Rebalance => {
                    self.rebalance(registry, parent_index, discarded)?;
                }
                ParentOutcome::Collapsed(new_root) => {
                    debug_assert_eq!(new_root, absorber_page_id);
                    self.set_root(new_root);
                    self.update_root_page_id(false)?;
                    debug!("index {}: root collapsed into page {}", self.name(), new_root);
                }
            }
        } else {
            if node_is_leaf {
                self.redistribute_leaf(registry, node_index, &mut neighbor_guard.data, node_child_index);
            } else {
                self.redistribute_internal(
                    registry,
                    node_index,
                    &mut neighbor_guard.data,
                    node_child_index,
                )?;
            }
            drop(neighbor_guard);
            self.buffer_pool().unpin_page(neighbor_page_id, true);
        }
        Ok(())
    }

    /// Inspect the parent after one of its separators was removed. A
    /// root down to one child collapses; the caller already cleared the
    /// absorber's parent pointer in that case.
    fn parent_outcome(parent: &mut InternalMut<'_, K>, discarded: &mut Vec<PageId>) -> ParentOutcome {
        let (is_root, size, min_size, page_id) = {
            let view = parent.as_ref();
            (view.is_root(), view.size(), view.min_size(), view.page_id())
        };
        if is_root {
            if size == 1 {
                let only_child = parent.remove_and_return_only_child();
                discarded.push(page_id);
                return ParentOutcome::Collapsed(only_child);
            }
            return ParentOutcome::Done;
        }
        if size < min_size {
            return ParentOutcome::Rebalance;
        }
        ParentOutcome::Done
    }

    /// Merge the right page of a leaf sibling pair into the left one and
    /// drop their separator from the parent.
    fn coalesce_leaf(
        &self,
        registry: &mut LatchRegistry,
        node_index: usize,
        neighbor_data: &mut [u8],
        neighbor_page_id: PageId,
        node_child_index: usize,
        discarded: &mut Vec<PageId>,
    ) -> (ParentOutcome, PageId) {
        let parent_index = node_index - 1;
        let (parent_entry, node_entry) = registry.pair_mut(parent_index, node_index);
        let mut parent = InternalMut::<K>::new(parent_entry.latch.write_data());
        let mut node = LeafMut::<K>::new(node_entry.latch.write_data());
        let mut neighbor = LeafMut::<K>::new(neighbor_data);

        let absorber_page_id;
        if node_child_index > 0 {
            // neighbor | node
            node.move_all_to(&mut neighbor);
            parent.remove(node_child_index);
            discarded.push(node.as_ref().page_id());
            absorber_page_id = neighbor_page_id;
        } else {
            // node | neighbor
            neighbor.move_all_to(&mut node);
            parent.remove(1);
            discarded.push(neighbor_page_id);
            absorber_page_id = node.as_ref().page_id();
        }

        // a root down to this last pair makes the absorber the new root
        if parent.as_ref().is_root() && parent.as_ref().size() == 1 {
            if node_child_index > 0 {
                neighbor.set_parent_page_id(INVALID_PAGE_ID);
            } else {
                node.set_parent_page_id(INVALID_PAGE_ID);
            }
        }
        (Self::parent_outcome(&mut parent, discarded), absorber_page_id)
    }

    /// Merge the right page of an internal sibling pair into the left
    /// one, pulling the parent separator down, and re-parent the moved
    /// children.
    fn coalesce_internal(
        &self,
        registry: &mut LatchRegistry,
        node_index: usize,
        neighbor_data: &mut [u8],
        neighbor_page_id: PageId,
        node_child_index: usize,
        discarded: &mut Vec<PageId>,
    ) -> Result<(ParentOutcome, PageId), BTreeError> {
        let parent_index = node_index - 1;
        let (outcome, moved_children, absorber_page_id) = {
            let (parent_entry, node_entry) = registry.pair_mut(parent_index, node_index);
            let mut parent = InternalMut::<K>::new(parent_entry.latch.write_data());
            let mut node = InternalMut::<K>::new(node_entry.latch.write_data());
            let mut neighbor = InternalMut::<K>::new(neighbor_data);

            let absorber_page_id;
            let moved: Vec<PageId>;
            if node_child_index > 0 {
                // neighbor | node
                let separator = parent.as_ref().key_at(node_child_index);
                let start = neighbor.as_ref().size();
                node.move_all_to(&mut neighbor, &separator);
                let view = neighbor.as_ref();
                moved = (start..view.size()).map(|i| view.value_at(i)).collect();
                parent.remove(node_child_index);
                discarded.push(node.as_ref().page_id());
                absorber_page_id = neighbor_page_id;
            } else {
                // node | neighbor
                let separator = parent.as_ref().key_at(1);
                let start = node.as_ref().size();
                neighbor.move_all_to(&mut node, &separator);
                let view = node.as_ref();
                moved = (start..view.size()).map(|i| view.value_at(i)).collect();
                parent.remove(1);
                discarded.push(neighbor_page_id);
                absorber_page_id = node.as_ref().page_id();
            }

            if parent.as_ref().is_root() && parent.as_ref().size() == 1 {
                if node_child_index > 0 {
                    neighbor.set_parent_page_id(INVALID_PAGE_ID);
                } else {
                    node.set_parent_page_id(INVALID_PAGE_ID);
                }
            }
            let outcome = Self::parent_outcome(&mut parent, discarded);
            (outcome, moved, absorber_page_id)
        };

        self.adopt_children(&moved_children, absorber_page_id)?;
        Ok((outcome, absorber_page_id))
    }

    /// Borrow one entry from a leaf sibling across the parent separator.
    fn redistribute_leaf(
        &self,
        registry: &mut LatchRegistry,
        node_index: usize,
        neighbor_data: &mut [u8],
        node_child_index: usize,
    ) {
        let parent_index = node_index - 1;
        let (parent_entry, node_entry) = registry.pair_mut(parent_index, node_index);
        let mut parent = InternalMut::<K>::new(parent_entry.latch.write_data());
        let mut node = LeafMut::<K>::new(node_entry.latch.write_data());
        let mut neighbor = LeafMut::<K>::new(neighbor_data);

        if node_child_index > 0 {
            // neighbor | node: take the neighbor's last entry
            neighbor.move_last_to_front_of(&mut node);
            let new_separator = node.as_ref().key_at(0);
            parent.set_key_at(node_child_index, &new_separator);
        } else {
            // node | neighbor: take the neighbor's first entry
            neighbor.move_first_to_end_of(&mut node);
            let new_separator = neighbor.as_ref().key_at(0);
            parent.set_key_at(1, &new_separator);
        }
    }

    /// Borrow one entry from an internal sibling, rotating the parent
    /// separator through the moved slot, and re-parent the moved child.
    fn redistribute_internal(
        &self,
        registry: &mut LatchRegistry,
        node_index: usize,
        neighbor_data: &mut [u8],
        node_child_index: usize,
    ) -> Result<(), BTreeError> {
        let parent_index = node_index - 1;
        let (moved_child, node_page_id) = {
            let (parent_entry, node_entry) = registry.pair_mut(parent_index, node_index);
            let mut parent = InternalMut::<K>::new(parent_entry.latch.write_data());
            let mut node = InternalMut::<K>::new(node_entry.latch.write_data());
            let mut neighbor = InternalMut::<K>::new(neighbor_data);

            if node_child_index > 0 {
                // neighbor | node
                let separator = parent.as_ref().key_at(node_child_index);
                let neighbor_last = neighbor.as_ref().size() - 1;
                let promoted = neighbor.as_ref().key_at(neighbor_last);
                let moved_child = neighbor.as_ref().value_at(neighbor_last);
                neighbor.move_last_to_front_of(&mut node, &separator);
                parent.set_key_at(node_child_index, &promoted);
                (moved_child, node.as_ref().page_id())
            } else {
                // node | neighbor
                let separator = parent.as_ref().key_at(1);
                let moved_child = neighbor.as_ref().value_at(0);
                neighbor.move_first_to_end_of(&mut node, &separator);
                let promoted = neighbor.as_ref().key_at(0);
                parent.set_key_at(1, &promoted);
                (moved_child, node.as_ref().page_id())
            }
        };
        self.adopt_children(&[moved_child], node_page_id)
    }
}
