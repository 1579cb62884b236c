mod internal;
mod leaf;

pub use internal::{InternalMut, InternalRef};
pub use leaf::{LeafMut, LeafRef};

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, INVALID_PAGE_ID};

// Common tree-page header layout:
//   page_type: u8, size: u32, max_size: u32, parent_page_id: u32,
//   page_id: u32
pub(crate) const PAGE_TYPE_OFFSET: usize = 0;
pub(crate) const SIZE_OFFSET: usize = 1;
pub(crate) const MAX_SIZE_OFFSET: usize = 5;
pub(crate) const PARENT_OFFSET: usize = 9;
pub(crate) const PAGE_ID_OFFSET: usize = 13;
pub(crate) const COMMON_HEADER_SIZE: usize = 17;

// Leaf pages add next_page_id: u32 before the entry array.
pub(crate) const LEAF_NEXT_OFFSET: usize = COMMON_HEADER_SIZE;
pub(crate) const LEAF_HEADER_SIZE: usize = COMMON_HEADER_SIZE + 4;
pub(crate) const INTERNAL_HEADER_SIZE: usize = COMMON_HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Leaf = 1,
    Internal = 2,
}

pub(crate) fn read_size(data: &[u8]) -> usize {
    LittleEndian::read_u32(&data[SIZE_OFFSET..SIZE_OFFSET + 4]) as usize
}

pub(crate) fn write_size(data: &mut [u8], size: usize) {
    LittleEndian::write_u32(&mut data[SIZE_OFFSET..SIZE_OFFSET + 4], size as u32);
}

pub(crate) fn read_max_size(data: &[u8]) -> usize {
    LittleEndian::read_u32(&data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]) as usize
}

pub(crate) fn read_parent(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[PARENT_OFFSET..PARENT_OFFSET + 4])
}

pub(crate) fn write_parent(data: &mut [u8], parent: PageId) {
    LittleEndian::write_u32(&mut data[PARENT_OFFSET..PARENT_OFFSET + 4], parent);
}

pub(crate) fn read_page_id(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4])
}

/// Type-agnostic view over the common header, used during descent before
/// the node kind is known.
pub struct NodeRef<'a> {
    data: &'a [u8],
}

impl<'a> NodeRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn node_type(&self) -> NodeType {
        match self.data[PAGE_TYPE_OFFSET] {
            1 => NodeType::Leaf,
            _ => NodeType::Internal,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type() == NodeType::Leaf
    }

    pub fn size(&self) -> usize {
        read_size(self.data)
    }

    pub fn max_size(&self) -> usize {
        read_max_size(self.data)
    }

    /// Lower occupancy bound for non-root pages: a leaf keeps at least
    /// ceil((max_size - 1) / 2) entries, an internal page at least
    /// ceil(max_size / 2) children.
    pub fn min_size(&self) -> usize {
        if self.is_leaf() {
            self.max_size() / 2
        } else {
            (self.max_size() + 1) / 2
        }
    }

    pub fn parent_page_id(&self) -> PageId {
        read_parent(self.data)
    }

    pub fn page_id(&self) -> PageId {
        read_page_id(self.data)
    }

    pub fn is_root(&self) -> bool {
        self.parent_page_id() == INVALID_PAGE_ID
    }
}

pub(crate) fn init_common_header(
    data: &mut [u8],
    node_type: NodeType,
    page_id: PageId,
    parent_id: PageId,
    max_size: usize,
) {
    data[PAGE_TYPE_OFFSET] = node_type as u8;
    write_size(data, 0);
    LittleEndian::write_u32(&mut data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4], max_size as u32);
    write_parent(data, parent_id);
    LittleEndian::write_u32(&mut data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4], page_id);
}
