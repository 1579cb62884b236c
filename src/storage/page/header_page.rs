use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, PAGE_SIZE};

/// Maximum length of an index name stored in the directory.
pub const MAX_NAME_LEN: usize = 32;

const RECORD_SIZE: usize = MAX_NAME_LEN + 4;
const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

/// Directory capacity of the header page.
pub const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Read-only view over page 0, the `(index name -> root page id)`
/// directory. Names are NUL-padded fixed-width strings.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        LittleEndian::read_u32(&self.data[COUNT_OFFSET..COUNT_OFFSET + 4]) as usize
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_OFFSET + index * RECORD_SIZE
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let off = Self::record_offset(index);
        let name = &self.data[off..off + MAX_NAME_LEN];
        let end = name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        &name[..end]
    }

    fn find(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.name_at(i) == name.as_bytes())
    }

    /// Root page id registered under `name`, if any.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|i| {
            let off = Self::record_offset(i) + MAX_NAME_LEN;
            LittleEndian::read_u32(&self.data[off..off + 4])
        })
    }
}

/// Mutable view over the header directory.
pub struct HeaderPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPageMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn as_ref(&self) -> HeaderPageRef<'_> {
        HeaderPageRef::new(self.data)
    }

    fn set_record_count(&mut self, count: usize) {
        LittleEndian::write_u32(&mut self.data[COUNT_OFFSET..COUNT_OFFSET + 4], count as u32);
    }

    fn write_record(&mut self, index: usize, name: &str, root_page_id: PageId) {
        let off = HeaderPageRef::record_offset(index);
        let name_buf = &mut self.data[off..off + MAX_NAME_LEN];
        name_buf.fill(0);
        name_buf[..name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(
            &mut self.data[off + MAX_NAME_LEN..off + MAX_NAME_LEN + 4],
            root_page_id,
        );
    }

    /// Register a new index. Fails when the name is taken, too long, or
    /// the directory is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.len() > MAX_NAME_LEN || name.is_empty() {
            return false;
        }
        let count = self.as_ref().record_count();
        if count >= MAX_RECORDS || self.as_ref().find(name).is_some() {
            return false;
        }
        self.write_record(count, name, root_page_id);
        self.set_record_count(count + 1);
        true
    }

    /// Update an existing record. Fails when the name is absent.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match self.as_ref().find(name) {
            Some(i) => {
                let off = HeaderPageRef::record_offset(i) + MAX_NAME_LEN;
                LittleEndian::write_u32(&mut self.data[off..off + 4], root_page_id);
                true
            }
            None => false,
        }
    }

    /// Drop a record, compacting the directory. Fails when absent.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let count = self.as_ref().record_count();
        match self.as_ref().find(name) {
            Some(i) => {
                let from = HeaderPageRef::record_offset(i + 1);
                let to = HeaderPageRef::record_offset(count);
                self.data.copy_within(from..to, HeaderPageRef::record_offset(i));
                self.set_record_count(count - 1);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPageMut::new(&mut data);

        assert!(header.insert_record("orders_pk", 7));
        assert!(header.insert_record("users_pk", 12));
        assert!(!header.insert_record("orders_pk", 9));

        let view = HeaderPageRef::new(&data);
        assert_eq!(view.record_count(), 2);
        assert_eq!(view.get_root_id("orders_pk"), Some(7));
        assert_eq!(view.get_root_id("users_pk"), Some(12));
        assert_eq!(view.get_root_id("missing"), None);
    }

    #[test]
    fn test_update_record() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPageMut::new(&mut data);

        assert!(!header.update_record("idx", 3));
        assert!(header.insert_record("idx", 3));
        assert!(header.update_record("idx", 44));
        assert_eq!(HeaderPageRef::new(&data).get_root_id("idx"), Some(44));
    }

    #[test]
    fn test_delete_record_compacts() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPageMut::new(&mut data);

        header.insert_record("a", 1);
        header.insert_record("b", 2);
        header.insert_record("c", 3);
        assert!(header.delete_record("b"));

        let view = HeaderPageRef::new(&data);
        assert_eq!(view.record_count(), 2);
        assert_eq!(view.get_root_id("a"), Some(1));
        assert_eq!(view.get_root_id("c"), Some(3));
        assert_eq!(view.get_root_id("b"), None);
    }

    #[test]
    fn test_name_length_limit() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPageMut::new(&mut data);
        let long_name = "x".repeat(MAX_NAME_LEN + 1);
        assert!(!header.insert_record(&long_name, 1));
        assert!(header.insert_record(&"y".repeat(MAX_NAME_LEN), 1));
    }
}
