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
    io::{Encodeable, TinyReader, TinyWriter},
    storage::{
        schema::TableSchema,
        tuple::{Cell, Tuple, WrappedTuple},
    },
    types::{Pod, TinyResult},
    utils::HandyRwLock,
};

/// A leaf node: tuples sorted on the key field, linked to the
/// neighbor leaves so a scan can walk the whole tree in key order
/// without touching internal pages.
pub struct BTreeLeafPage {
    base: BTreeBasePage,

    pub slot_count: usize,

    // slot status bitmap
    header: BitVec<u32>,

    // all tuple slots, including the unoccupied ones
    tuples: Vec<Tuple>,

    pub schema: TableSchema,

    right_sibling_index: u32,
    left_sibling_index: u32,

    key_field: usize,
}

impl BTreeLeafPage {
    /// The maximum number of tuples a page can hold under the given
    /// schema.
    pub fn calculate_slots_count(schema: &TableSchema) -> usize {
        let bits_per_tuple_including_header = schema.get_size() * 8 + 1;
        // extra bytes are: the parent pointer and the two sibling
        // pointers
        let extra_bits = (3 * INDEX_SIZE + CATEGORY_SIZE) * 8;
        (PageCache::get_page_size() * 8 - extra_bits)
            / bits_per_tuple_including_header
    }

    fn get_header_size(slot_count: usize) -> usize {
        slot_count / 8 + 1
    }

    pub fn get_slots_count(&self) -> usize {
        self.slot_count
    }

    pub fn empty_slots_count(&self) -> usize {
        (0..self.slot_count)
            .filter(|i| !self.is_slot_used(*i))
            .count()
    }

    /// Returns the number of tuples currently stored on this page.
    pub fn tuples_count(&self) -> usize {
        self.slot_count - self.empty_slots_count()
    }

    /// Whether the page satisfies the minimum-occupancy invariant.
    /// The root is exempt.
    pub fn stable(&self) -> bool {
        if self.get_parent_pid().category == PageCategory::RootPointer {
            return true;
        }

        self.tuples_count() >= self.slot_count / 2
    }

    pub fn set_right_pid(&mut self, pid: Option<BTreePageID>) {
        self.right_sibling_index =
            pid.map_or(EMPTY_PAGE_INDEX, |pid| pid.page_index);
    }

    pub fn get_right_pid(&self) -> Option<BTreePageID> {
        self.sibling_pid(self.right_sibling_index)
    }

    pub fn set_left_pid(&mut self, pid: Option<BTreePageID>) {
        self.left_sibling_index =
            pid.map_or(EMPTY_PAGE_INDEX, |pid| pid.page_index);
    }

    pub fn get_left_pid(&self) -> Option<BTreePageID> {
        self.sibling_pid(self.left_sibling_index)
    }

    fn sibling_pid(&self, page_index: u32) -> Option<BTreePageID> {
        if page_index == EMPTY_PAGE_INDEX {
            return None;
        }
        Some(BTreePageID::new(
            PageCategory::Leaf,
            self.get_pid().get_table_id(),
            page_index,
        ))
    }

    fn get_key(&self, slot_index: usize) -> Cell {
        self.tuples[slot_index].get_cell(self.key_field)
    }

    /// Adds the tuple to the page such that all records remain
    /// sorted on the key field.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> TinyResult {
        // find the first empty slot
        let mut first_empty_slot: i64 = -1;
        for i in 0..self.slot_count {
            if !self.is_slot_used(i) {
                first_empty_slot = i as i64;
                break;
            }
        }

        if first_empty_slot == -1 {
            return Err(TinyError::db(&format!(
                "no empty slot on page {}",
                self.get_pid(),
            )));
        }

        // Find the last slot whose key is less than or equal to the
        // key being inserted.
        //
        // -1 means there is no such key, so the tuple belongs in
        // slot 0.
        let key = tuple.get_cell(self.key_field);
        let mut last_less_slot: i64 = -1;
        for i in 0..self.slot_count {
            if self.is_slot_used(i) {
                if self.get_key(i) <= key {
                    last_less_slot = i as i64;
                } else {
                    break;
                }
            }
        }

        // shift records back or forward to fill the empty slot and
        // make room for the new record while keeping records sorted
        let good_slot: usize;
        if first_empty_slot < last_less_slot {
            for i in first_empty_slot..last_less_slot {
                self.move_tuple((i + 1) as usize, i as usize);
            }
            good_slot = last_less_slot as usize;
        } else {
            for i in (last_less_slot + 1..first_empty_slot).rev() {
                self.move_tuple(i as usize, (i + 1) as usize);
            }
            good_slot = (last_less_slot + 1) as usize;
        }

        self.tuples[good_slot] = tuple.clone();
        self.mark_slot_status(good_slot, true);
        Ok(())
    }

    // Move a tuple from one slot to another, the destination must be
    // empty.
    fn move_tuple(&mut self, from: usize, to: usize) {
        if !self.is_slot_used(from) {
            return;
        }

        self.tuples[to] = self.tuples[from].clone();
        self.mark_slot_status(to, true);
        self.mark_slot_status(from, false);
    }

    pub fn get_tuple(&self, slot_index: usize) -> Option<Tuple> {
        if self.is_slot_used(slot_index) {
            return Some(self.tuples[slot_index].clone());
        }
        None
    }

    pub fn delete_tuple(&mut self, slot_index: usize) -> TinyResult {
        if !self.is_slot_used(slot_index) {
            return Err(TinyError::db(&format!(
                "deleting a tuple that does not exist, page: {}, slot: {}",
                self.get_pid(),
                slot_index,
            )));
        }

        self.mark_slot_status(slot_index, false);
        Ok(())
    }

    /// Returns true if the associated slot on this page is filled.
    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    pub fn check_integrity(
        &self,
        parent_pid: &BTreePageID,
        lower_bound: &Option<Cell>,
        upper_bound: &Option<Cell>,
        check_occupancy: bool,
        depth: usize,
    ) -> TinyResult {
        if self.get_pid().category != PageCategory::Leaf {
            return Err(TinyError::db(&format!(
                "page {} is not a leaf page",
                self.get_pid(),
            )));
        }

        if &self.get_parent_pid() != parent_pid {
            return Err(TinyError::db(&format!(
                "parent mismatch on {}: recorded {}, expected {}",
                self.get_pid(),
                self.get_parent_pid(),
                parent_pid,
            )));
        }

        let mut previous = lower_bound.clone();
        let it = BTreeLeafPageIterator::new(self);
        for tuple in it {
            let key = tuple.get_cell(self.key_field);
            if let Some(previous) = &previous {
                if previous > &key {
                    return Err(TinyError::db(&format!(
                        "tuples out of order on {}: {:?} before {:?}",
                        self.get_pid(),
                        previous,
                        key,
                    )));
                }
            }
            previous = Some(key);
        }

        if let (Some(previous), Some(upper_bound)) = (&previous, upper_bound) {
            if previous > upper_bound {
                return Err(TinyError::db(&format!(
                    "the last key of {} exceeds the upper bound: {:?} > {:?}",
                    self.get_pid(),
                    previous,
                    upper_bound,
                )));
            }
        }

        if check_occupancy && depth > 0 {
            if self.tuples_count() < self.slot_count / 2 {
                return Err(TinyError::db(&format!(
                    "occupancy violation on {}: {} tuples, cap {}",
                    self.get_pid(),
                    self.tuples_count(),
                    self.slot_count,
                )));
            }
        }

        Ok(())
    }
}

impl BTreePage for BTreeLeafPage {
    fn new(
        pid: &BTreePageID,
        bytes: &[u8],
        schema: &TableSchema,
        key_field: usize,
    ) -> Result<Self, TinyError> {
        let slot_count = Self::calculate_slots_count(schema);
        let header_size = Self::get_header_size(slot_count);

        let mut reader = TinyReader::new(bytes);

        let parent_index = BTreeBasePage::read_parent(&mut reader);
        let left_sibling_index: u32 = reader.read();
        let right_sibling_index: u32 = reader.read();

        let header = BitVec::from_bytes(reader.read_exact(header_size));

        let mut tuples = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            tuples.push(Tuple::read_from(&mut reader, schema));
        }

        let mut base = BTreeBasePage::new(pid);
        base.set_parent_index(parent_index);

        Ok(Self {
            base,
            slot_count,
            header,
            tuples,
            schema: schema.clone(),
            right_sibling_index,
            left_sibling_index,
            key_field,
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

        self.base.write_parent(&mut writer);
        writer.write(&self.left_sibling_index);
        writer.write(&self.right_sibling_index);

        writer.write_bytes(&self.header.to_bytes());

        for tuple in &self.tuples {
            writer.write_bytes(&tuple.to_bytes());
        }

        writer.to_padded_bytes(PageCache::get_page_size())
    }
}

pub struct BTreeLeafPageIterator<'page> {
    page: &'page BTreeLeafPage,
    cursor: i64,
    reverse_cursor: i64,
}

impl<'page> BTreeLeafPageIterator<'page> {
    pub fn new(page: &'page BTreeLeafPage) -> Self {
        Self {
            page,
            cursor: -1,
            reverse_cursor: page.slot_count as i64,
        }
    }
}

impl Iterator for BTreeLeafPageIterator<'_> {
    type Item = WrappedTuple;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.cursor += 1;
            let cursor = self.cursor as usize;
            if cursor >= self.page.slot_count {
                return None;
            }

            if self.page.is_slot_used(cursor) {
                return Some(WrappedTuple::new(
                    self.page.tuples[cursor].clone(),
                    cursor,
                    self.page.get_pid(),
                ));
            }
        }
    }
}

impl DoubleEndedIterator for BTreeLeafPageIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            self.reverse_cursor -= 1;
            if self.reverse_cursor < 0 {
                return None;
            }

            let cursor = self.reverse_cursor as usize;
            if self.page.is_slot_used(cursor) {
                return Some(WrappedTuple::new(
                    self.page.tuples[cursor].clone(),
                    cursor,
                    self.page.get_pid(),
                ));
            }
        }
    }
}

/// Same as `BTreeLeafPageIterator`, but owns a shared reference to
/// the page so it can outlive a borrow scope. The page lock is taken
/// per step.
pub struct BTreeLeafPageIteratorRc {
    page: Pod<BTreeLeafPage>,
    cursor: i64,
    reverse_cursor: i64,
}

impl BTreeLeafPageIteratorRc {
    pub fn new(page: Pod<BTreeLeafPage>) -> Self {
        let slot_count = page.rl().get_slots_count();
        Self {
            page,
            cursor: -1,
            reverse_cursor: slot_count as i64,
        }
    }
}

impl Iterator for BTreeLeafPageIteratorRc {
    type Item = WrappedTuple;

    fn next(&mut self) -> Option<Self::Item> {
        let page = self.page.rl();
        loop {
            self.cursor += 1;
            let cursor = self.cursor as usize;
            if cursor >= page.slot_count {
                return None;
            }

            if page.is_slot_used(cursor) {
                return Some(WrappedTuple::new(
                    page.tuples[cursor].clone(),
                    cursor,
                    page.get_pid(),
                ));
            }
        }
    }
}

impl DoubleEndedIterator for BTreeLeafPageIteratorRc {
    fn next_back(&mut self) -> Option<Self::Item> {
        let page = self.page.rl();
        loop {
            self.reverse_cursor -= 1;
            if self.reverse_cursor < 0 {
                return None;
            }

            let cursor = self.reverse_cursor as usize;
            if page.is_slot_used(cursor) {
                return Some(WrappedTuple::new(
                    page.tuples[cursor].clone(),
                    cursor,
                    page.get_pid(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::init_log;

    #[test]
    fn test_leaf_page_round_trip() {
        init_log();

        let schema = TableSchema::small_int_schema(2);
        let pid = BTreePageID::new(PageCategory::Leaf, 3, 7);

        let mut page = BTreeLeafPage::new(
            &pid,
            &BTreeBasePage::empty_page_data(),
            &schema,
            0,
        )
        .unwrap();
        for value in [5_i64, -1, 12, 3].iter() {
            page.insert_tuple(&Tuple::new_int_tuples(*value, 2)).unwrap();
        }
        page.set_left_pid(Some(BTreePageID::new(PageCategory::Leaf, 3, 6)));
        page.set_right_pid(Some(BTreePageID::new(PageCategory::Leaf, 3, 8)));
        page.set_parent_pid(&BTreePageID::new(PageCategory::Internal, 3, 2));

        let decoded =
            BTreeLeafPage::new(&pid, &page.get_page_data(), &schema, 0)
                .unwrap();

        assert_eq!(decoded.tuples_count(), 4);
        let original: Vec<Cell> = BTreeLeafPageIterator::new(&page)
            .map(|t| t.get_cell(0))
            .collect();
        let restored: Vec<Cell> = BTreeLeafPageIterator::new(&decoded)
            .map(|t| t.get_cell(0))
            .collect();
        assert_eq!(original, restored);

        assert_eq!(decoded.get_left_pid(), page.get_left_pid());
        assert_eq!(decoded.get_right_pid(), page.get_right_pid());
        assert_eq!(decoded.get_parent_pid(), page.get_parent_pid());
    }

    #[test]
    fn test_insert_keeps_sorted_order() {
        init_log();

        let schema = TableSchema::small_int_schema(2);
        let pid = BTreePageID::new(PageCategory::Leaf, 3, 7);

        let mut page = BTreeLeafPage::new(
            &pid,
            &BTreeBasePage::empty_page_data(),
            &schema,
            0,
        )
        .unwrap();
        for value in [9_i64, 2, 7, 2, -4, 100].iter() {
            page.insert_tuple(&Tuple::new_int_tuples(*value, 2)).unwrap();
        }

        let keys: Vec<Cell> = BTreeLeafPageIterator::new(&page)
            .map(|t| t.get_cell(0))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
