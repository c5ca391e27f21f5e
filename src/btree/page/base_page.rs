use super::{BTreePageID, PageCategory, EMPTY_PAGE_INDEX};
use crate::{
    btree::page_cache::PageCache,
    io::{TinyReader, TinyWriter},
};

/// The state shared by all page categories: the page id and the
/// parent page index. A parent index of 0 means the page is the root
/// and its parent is the root pointer page.
pub struct BTreeBasePage {
    pid: BTreePageID,
    parent_page_index: u32,
}

impl BTreeBasePage {
    pub fn new(pid: &BTreePageID) -> BTreeBasePage {
        BTreeBasePage {
            pid: *pid,
            parent_page_index: EMPTY_PAGE_INDEX,
        }
    }

    pub fn get_pid(&self) -> BTreePageID {
        self.pid
    }

    pub fn get_parent_pid(&self) -> BTreePageID {
        let category = if self.parent_page_index == EMPTY_PAGE_INDEX {
            PageCategory::RootPointer
        } else {
            PageCategory::Internal
        };
        BTreePageID::new(category, self.pid.get_table_id(), self.parent_page_index)
    }

    pub fn set_parent_pid(&mut self, pid: &BTreePageID) {
        self.parent_page_index = pid.page_index;
    }

    pub(super) fn write_parent(&self, writer: &mut TinyWriter) {
        self.get_parent_pid().write_to(writer);
    }

    pub(super) fn read_parent(reader: &mut TinyReader) -> u32 {
        let page_index: u32 = reader.read();
        let _category_byte: u8 = reader.read();
        page_index
    }

    pub(super) fn set_parent_index(&mut self, index: u32) {
        self.parent_page_index = index;
    }

    pub fn empty_page_data() -> Vec<u8> {
        vec![0; PageCache::get_page_size()]
    }
}
