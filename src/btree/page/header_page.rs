use bit_vec::BitVec;

use super::{
    BTreeBasePage, BTreePage, BTreePageID, PageCategory, EMPTY_PAGE_INDEX,
};
use crate::{
    btree::{
        consts::{CATEGORY_SIZE, INDEX_SIZE},
        page_cache::PageCache,
    },
    error::TinyError,
    io::{TinyReader, TinyWriter},
    storage::schema::TableSchema,
};

// next and prev pointers
const HEADER_OVERHEAD: usize = 2 * (INDEX_SIZE + CATEGORY_SIZE);

/// A page of the free list. Bit `i` of the header page with ordinal
/// `h` in the chain describes data page `h * slots + i + 1`: set
/// means in use, clear means free for reuse.
pub struct BTreeHeaderPage {
    base: BTreeBasePage,

    next_page_index: u32,
    prev_page_index: u32,

    // slot status bitmap, true means the covered page is in use
    header: BitVec<u32>,

    slot_count: usize,
}

impl BTreeHeaderPage {
    /// The number of data pages a single header page covers.
    pub fn calculate_slots_count() -> usize {
        8 * (PageCache::get_page_size() - HEADER_OVERHEAD)
    }

    pub fn get_slots_count(&self) -> usize {
        self.slot_count
    }

    /// Mark every covered page as in use. Called on freshly created
    /// header pages, since any page in the covered range may be live.
    pub fn set_all_used(&mut self) {
        self.header = BitVec::from_elem(self.slot_count, true);
    }

    // mark the slot as used/free
    pub fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    pub fn get_empty_slot(&self) -> Option<usize> {
        for i in 0..self.slot_count {
            if !self.header[i] {
                return Some(i);
            }
        }
        None
    }

    pub fn get_next_pid(&self) -> Option<BTreePageID> {
        self.sibling_pid(self.next_page_index)
    }

    pub fn set_next_pid(&mut self, pid: Option<BTreePageID>) {
        self.next_page_index =
            pid.map_or(EMPTY_PAGE_INDEX, |pid| pid.page_index);
    }

    pub fn get_prev_pid(&self) -> Option<BTreePageID> {
        self.sibling_pid(self.prev_page_index)
    }

    pub fn set_prev_pid(&mut self, pid: Option<BTreePageID>) {
        self.prev_page_index =
            pid.map_or(EMPTY_PAGE_INDEX, |pid| pid.page_index);
    }

    fn sibling_pid(&self, page_index: u32) -> Option<BTreePageID> {
        if page_index == EMPTY_PAGE_INDEX {
            return None;
        }
        Some(BTreePageID::new(
            PageCategory::Header,
            self.get_pid().get_table_id(),
            page_index,
        ))
    }
}

impl BTreePage for BTreeHeaderPage {
    fn new(
        pid: &BTreePageID,
        bytes: &[u8],
        _schema: &TableSchema,
        _key_field: usize,
    ) -> Result<Self, TinyError> {
        let slot_count = Self::calculate_slots_count();

        let mut reader = TinyReader::new(bytes);

        let next_page_index: u32 = reader.read();
        let _next_category: u8 = reader.read();
        let prev_page_index: u32 = reader.read();
        let _prev_category: u8 = reader.read();

        let header = BitVec::from_bytes(reader.read_exact(slot_count / 8));

        Ok(Self {
            base: BTreeBasePage::new(pid),
            next_page_index,
            prev_page_index,
            header,
            slot_count,
        })
    }

    fn get_pid(&self) -> BTreePageID {
        self.base.get_pid()
    }

    fn get_parent_pid(&self) -> BTreePageID {
        self.base.get_parent_pid()
    }

    fn set_parent_pid(&mut self, pid: &BTreePageID) {
        self.base.set_parent_pid(pid)
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = TinyWriter::new();

        writer.write(&self.next_page_index);
        writer.write(&PageCategory::Header.to_byte());
        writer.write(&self.prev_page_index);
        writer.write(&PageCategory::Header.to_byte());

        writer.write_bytes(&self.header.to_bytes());

        writer.to_padded_bytes(PageCache::get_page_size())
    }
}
