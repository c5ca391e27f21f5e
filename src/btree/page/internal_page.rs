use std::fmt;

use bit_vec::BitVec;

use super::{BTreeBasePage, BTreePage, BTreePageID, PageCategory};
use crate::{
    btree::{
        consts::{CATEGORY_SIZE, INDEX_SIZE},
        page_cache::PageCache,
    },
    error::TinyError,
    io::{Encodeable, TinyReader, TinyWriter},
    storage::{
        schema::{TableSchema, Type},
        tuple::Cell,
    },
    types::TinyResult,
};

/// An internal node: an ordered sequence of entries `(key, left
/// child, right child)` where adjacent entries share a child, stored
/// as one more child pointer than keys.
///
/// Slot 0 only carries the left-most child pointer; its key slot is
/// never used. The left child of the nth entry is not always located
/// in slot n-1, but in the nearest lower slot marked as used.
pub struct BTreeInternalPage {
    base: BTreeBasePage,

    keys: Vec<Cell>,

    // raw page indexes; all children share one category
    children: Vec<u32>,
    children_category: PageCategory,

    slot_count: usize,

    // slot status bitmap
    header: BitVec<u32>,

    key_type: Type,
}

impl BTreeInternalPage {
    /// The maximum number of entries (keys) a page can hold for the
    /// given key width.
    pub fn get_max_entries(key_size: usize) -> usize {
        let bits_per_entry_including_header =
            key_size * 8 + INDEX_SIZE * 8 + 1;
        // extra bytes are: the parent pointer, one extra child
        // pointer (a node with m entries has m+1 children), the
        // shared child category byte; plus the extra child's slot
        // bit.
        let extra_bits = (2 * INDEX_SIZE + 2 * CATEGORY_SIZE) * 8 + 1;
        (PageCache::get_page_size() * 8 - extra_bits)
            / bits_per_entry_including_header
    }

    fn get_header_size(slot_count: usize) -> usize {
        slot_count / 8 + 1
    }

    pub fn get_entries_cap(&self) -> usize {
        self.slot_count - 1
    }

    pub fn get_children_cap(&self) -> usize {
        self.slot_count
    }

    pub fn empty_slots_count(&self) -> usize {
        // start from 1 because slot 0 only holds the left-most child
        (1..self.slot_count)
            .filter(|i| !self.is_slot_used(*i))
            .count()
    }

    pub fn entries_count(&self) -> usize {
        self.get_entries_cap() - self.empty_slots_count()
    }

    pub fn children_count(&self) -> usize {
        self.entries_count() + 1
    }

    /// Whether the page satisfies the minimum-occupancy invariant.
    /// The root is exempt.
    pub fn stable(&self) -> bool {
        if self.get_parent_pid().category == PageCategory::RootPointer {
            return true;
        }

        self.entries_count() >= self.get_entries_cap() / 2
    }

    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    fn get_child(&self, slot_index: usize) -> BTreePageID {
        BTreePageID::new(
            self.children_category,
            self.get_pid().get_table_id(),
            self.children[slot_index],
        )
    }

    /// All child pids of used slots, left to right.
    pub fn get_children(&self) -> Vec<BTreePageID> {
        (0..self.slot_count)
            .filter(|i| self.is_slot_used(*i))
            .map(|i| self.get_child(i))
            .collect()
    }

    pub fn get_first_child_pid(&self) -> BTreePageID {
        let mut it = BTreeInternalPageIterator::new(self);
        it.next().unwrap().get_left_child()
    }

    pub fn get_last_child_pid(&self) -> BTreePageID {
        let mut it = BTreeInternalPageIterator::new(self);
        it.next_back().unwrap().get_right_child()
    }

    /// Find the entry whose children are exactly the given pair.
    /// Used by the rebalancing code to locate the separator between
    /// two sibling pages.
    pub fn get_entry_by_children(
        &self,
        left_pid: &BTreePageID,
        right_pid: &BTreePageID,
    ) -> Option<Entry> {
        let it = BTreeInternalPageIterator::new(self);
        for e in it {
            if e.get_left_child() == *left_pid
                && e.get_right_child() == *right_pid
            {
                return Some(e);
            }
        }
        None
    }

    /// The left and right neighbors of the given child, derived from
    /// the entries adjacent to it. Neighbors located this way always
    /// share this page as their parent.
    pub fn get_sibling_pids(
        &self,
        child_pid: &BTreePageID,
    ) -> (Option<BTreePageID>, Option<BTreePageID>) {
        let mut left = None;
        let mut right = None;

        let it = BTreeInternalPageIterator::new(self);
        for e in it {
            if e.get_right_child() == *child_pid {
                left = Some(e.get_left_child());
            }
            if e.get_left_child() == *child_pid {
                right = Some(e.get_right_child());
            }
        }

        (left, right)
    }

    pub fn insert_entry(&mut self, e: &Entry) -> TinyResult {
        if e.get_left_child().category != e.get_right_child().category {
            return Err(TinyError::db(&format!(
                "children of an entry must share a category, got {} and {}",
                e.get_left_child(),
                e.get_right_child(),
            )));
        }

        if self.empty_slots_count() == 0 {
            return Err(TinyError::db("no empty slots on this page"));
        }

        // if this is the first entry, it brings both child pointers
        if self.entries_count() == 0 {
            self.children_category = e.get_left_child().category;
            self.children[0] = e.get_left_child().page_index;
            self.children[1] = e.get_right_child().page_index;
            self.keys[1] = e.get_key();
            self.mark_slot_status(0, true);
            self.mark_slot_status(1, true);
            return Ok(());
        }

        // find the first empty slot, starting from 1
        let mut empty_slot = 0;
        for i in 1..self.slot_count {
            if !self.is_slot_used(i) {
                empty_slot = i;
                break;
            }
        }

        // find the child pointer matching the left or right child in
        // this entry
        let mut slot_just_ahead = usize::MAX;
        for i in 0..self.slot_count {
            if !self.is_slot_used(i) {
                continue;
            }

            if self.children[i] == e.get_left_child().page_index {
                // the new entry goes right after the current one
                slot_just_ahead = i;
                break;
            }

            if self.children[i] == e.get_right_child().page_index {
                // the new entry splits the current one, so the right
                // child of the current entry becomes the left child
                // of the new entry
                slot_just_ahead = i;
                self.children[i] = e.get_left_child().page_index;
                break;
            }
        }

        if slot_just_ahead == usize::MAX {
            return Err(TinyError::db(&format!(
                "no slot found for entry {}, pid: {}, entries count: {}",
                e,
                self.get_pid(),
                self.entries_count(),
            )));
        }

        // shift entries back or forward to fill the empty slot and
        // make room for the new entry while keeping entries sorted
        let good_slot: usize;
        if empty_slot < slot_just_ahead {
            for i in empty_slot..slot_just_ahead {
                self.move_entry(i + 1, i);
            }
            good_slot = slot_just_ahead;
        } else {
            for i in (slot_just_ahead + 1..empty_slot).rev() {
                self.move_entry(i, i + 1);
            }
            good_slot = slot_just_ahead + 1;
        }

        self.keys[good_slot] = e.get_key();
        self.children[good_slot] = e.get_right_child().page_index;
        self.mark_slot_status(good_slot, true);
        Ok(())
    }

    fn move_entry(&mut self, from: usize, to: usize) {
        if self.is_slot_used(from) && !self.is_slot_used(to) {
            self.keys[to] = self.keys[from].clone();

            // the left child slot stays untouched: it refers to the
            // nearest used slot, not the adjacent one
            self.children[to] = self.children[from];

            self.mark_slot_status(from, false);
            self.mark_slot_status(to, true);
        }
    }

    /// Delete the entry at `record_id` together with its right child
    /// pointer.
    pub fn delete_key_and_right_child(&mut self, record_id: usize) {
        self.mark_slot_status(record_id, false);
    }

    /// Delete the entry at `record_id` together with its left child
    /// pointer; the right child takes the left child's position.
    pub fn delete_key_and_left_child(&mut self, record_id: usize) {
        for i in (0..record_id).rev() {
            if self.is_slot_used(i) {
                self.children[i] = self.children[record_id];
                self.mark_slot_status(record_id, false);
                return;
            }
        }
    }

    /// Overwrite the entry in place (both children and the key).
    pub fn update_entry(&mut self, entry: &Entry) {
        let record_id = entry.get_record_id();

        // set left child
        for i in (0..record_id).rev() {
            if self.is_slot_used(i) {
                self.children[i] = entry.get_left_child().page_index;
                break;
            }
        }

        self.children[record_id] = entry.get_right_child().page_index;
        self.keys[record_id] = entry.get_key();
    }

    pub fn check_integrity(
        &self,
        parent_pid: &BTreePageID,
        lower_bound: &Option<Cell>,
        upper_bound: &Option<Cell>,
        check_occupancy: bool,
        depth: usize,
    ) -> TinyResult {
        if self.get_pid().category != PageCategory::Internal {
            return Err(TinyError::db(&format!(
                "page {} is not an internal page",
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
        let it = BTreeInternalPageIterator::new(self);
        for e in it {
            if let Some(previous) = &previous {
                if previous > &e.get_key() {
                    return Err(TinyError::db(&format!(
                        "entries out of order on {}: {:?} before {}",
                        self.get_pid(),
                        previous,
                        e,
                    )));
                }
            }
            previous = Some(e.get_key());
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
            // minus 1 here since the page may become lower than half
            // full in the process of splitting
            let minimal_stable = self.get_entries_cap() / 2 - 1;
            if self.entries_count() < minimal_stable {
                return Err(TinyError::db(&format!(
                    "occupancy violation on {}: {} entries, cap {}",
                    self.get_pid(),
                    self.entries_count(),
                    self.get_entries_cap(),
                )));
            }
        }

        Ok(())
    }
}

impl BTreePage for BTreeInternalPage {
    fn new(
        pid: &BTreePageID,
        bytes: &[u8],
        schema: &TableSchema,
        key_field: usize,
    ) -> Result<Self, TinyError> {
        let key_type = schema.fields[key_field].t;
        let slot_count = Self::get_max_entries(key_type.size()) + 1;
        let header_size = Self::get_header_size(slot_count);

        let mut reader = TinyReader::new(bytes);

        let parent_index = BTreeBasePage::read_parent(&mut reader);

        let header = BitVec::from_bytes(reader.read_exact(header_size));

        let mut keys = Vec::with_capacity(slot_count);
        keys.push(Cell::default_for(&key_type));
        for _ in 1..slot_count {
            keys.push(Cell::read_from(&mut reader, &key_type));
        }

        let mut children = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            children.push(reader.read::<u32>());
        }
        // a freshly zeroed page decodes to the RootPointer
        // placeholder; the first inserted entry overwrites it
        let children_category = PageCategory::from_byte(reader.read::<u8>())?;

        let mut base = BTreeBasePage::new(pid);
        base.set_parent_index(parent_index);

        Ok(Self {
            base,
            keys,
            children,
            children_category,
            slot_count,
            header,
            key_type,
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

        writer.write_bytes(&self.header.to_bytes());

        for i in 1..self.slot_count {
            writer.write_bytes(&self.keys[i].to_bytes());
        }

        for i in 0..self.slot_count {
            writer.write(&self.children[i]);
        }
        writer.write(&self.children_category.to_byte());

        writer.to_padded_bytes(PageCache::get_page_size())
    }
}

/// A separator key together with its two adjacent child pointers.
/// All keys reachable under the left child compare <= the key, and
/// all keys under the right child compare >= the key.
#[derive(Clone)]
pub struct Entry {
    key: Cell,
    left: BTreePageID,
    right: BTreePageID,

    // slot position in the page
    record_id: usize,
}

impl Entry {
    pub fn new(key: &Cell, left: &BTreePageID, right: &BTreePageID) -> Self {
        Self {
            key: key.clone(),
            left: *left,
            right: *right,
            record_id: 0,
        }
    }

    pub fn set_record_id(&mut self, record_id: usize) {
        self.record_id = record_id;
    }

    pub fn get_record_id(&self) -> usize {
        self.record_id
    }

    pub fn get_key(&self) -> Cell {
        self.key.clone()
    }

    pub fn set_key(&mut self, key: &Cell) {
        self.key = key.clone();
    }

    pub fn get_left_child(&self) -> BTreePageID {
        self.left
    }

    pub fn get_right_child(&self) -> BTreePageID {
        self.right
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:?}, {}, {})", self.key, self.left, self.right)
    }
}

pub struct BTreeInternalPageIterator<'page> {
    page: &'page BTreeInternalPage,

    cursor: usize,
    left_child_position: usize,

    reverse_cursor: usize,
    right_child_position: usize,
}

impl<'page> BTreeInternalPageIterator<'page> {
    pub fn new(page: &'page BTreeInternalPage) -> Self {
        // locate the right-most used slot; an empty page yields an
        // iterator that returns nothing
        let mut right_child_position = 0;
        for i in (0..page.slot_count).rev() {
            if page.is_slot_used(i) {
                right_child_position = i;
                break;
            }
        }

        Self {
            page,

            cursor: 0,
            left_child_position: 0,

            reverse_cursor: right_child_position,
            right_child_position,
        }
    }
}

impl Iterator for BTreeInternalPageIterator<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.cursor += 1;
            let cursor = self.cursor;

            if cursor >= self.page.slot_count {
                return None;
            }

            if !self.page.is_slot_used(cursor) {
                continue;
            }

            let mut e = Entry::new(
                &self.page.keys[cursor],
                &self.page.get_child(self.left_child_position),
                &self.page.get_child(cursor),
            );
            e.set_record_id(cursor);

            // remember the left child for the next iteration
            self.left_child_position = cursor;

            return Some(e);
        }
    }
}

impl DoubleEndedIterator for BTreeInternalPageIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            let left_index = match self.reverse_cursor.checked_sub(1) {
                Some(v) => v,
                None => return None,
            };

            self.reverse_cursor = left_index;
            if !self.page.is_slot_used(left_index) {
                continue;
            }

            let mut e = Entry::new(
                &self.page.keys[self.right_child_position],
                &self.page.get_child(left_index),
                &self.page.get_child(self.right_child_position),
            );
            e.set_record_id(self.right_child_position);

            // remember the right child for the next iteration
            self.right_child_position = left_index;

            return Some(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::init_log;

    fn leaf(index: u32) -> BTreePageID {
        BTreePageID::new(PageCategory::Leaf, 3, index)
    }

    fn page_with_entries(keys: &[i64]) -> BTreeInternalPage {
        let schema = TableSchema::small_int_schema(2);
        let pid = BTreePageID::new(PageCategory::Internal, 3, 9);

        let mut page = BTreeInternalPage::new(
            &pid,
            &BTreeBasePage::empty_page_data(),
            &schema,
            0,
        )
        .unwrap();
        for (i, key) in keys.iter().enumerate() {
            let entry = Entry::new(
                &Cell::Int64(*key),
                &leaf(i as u32 + 1),
                &leaf(i as u32 + 2),
            );
            page.insert_entry(&entry).unwrap();
        }
        page
    }

    #[test]
    fn test_internal_page_round_trip() {
        init_log();

        let schema = TableSchema::small_int_schema(2);
        let mut page = page_with_entries(&[10, 20, 30]);
        page.set_parent_pid(&BTreePageID::new(PageCategory::Internal, 3, 2));

        let decoded = BTreeInternalPage::new(
            &page.get_pid(),
            &page.get_page_data(),
            &schema,
            0,
        )
        .unwrap();

        assert_eq!(decoded.entries_count(), 3);
        assert_eq!(decoded.get_parent_pid(), page.get_parent_pid());

        let original: Vec<(Cell, BTreePageID, BTreePageID)> =
            BTreeInternalPageIterator::new(&page)
                .map(|e| (e.get_key(), e.get_left_child(), e.get_right_child()))
                .collect();
        let restored: Vec<(Cell, BTreePageID, BTreePageID)> =
            BTreeInternalPageIterator::new(&decoded)
                .map(|e| (e.get_key(), e.get_left_child(), e.get_right_child()))
                .collect();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_corrupted_category_byte_is_reported() {
        init_log();

        let schema = TableSchema::small_int_schema(2);
        let page = page_with_entries(&[10, 20]);

        // damage the shared child category byte, which sits right
        // after the child pointers
        let mut bytes = page.get_page_data();
        let slot_count = page.get_children_cap();
        let category_position = (INDEX_SIZE + CATEGORY_SIZE)
            + BTreeInternalPage::get_header_size(slot_count)
            + (slot_count - 1) * 8
            + slot_count * INDEX_SIZE;
        bytes[category_position] = 0xbe;

        let result =
            BTreeInternalPage::new(&page.get_pid(), &bytes, &schema, 0);
        let err = result.err().unwrap();
        assert!(format!("{}", err).contains("invalid page category"));
    }

    #[test]
    fn test_adjacent_entries_share_children() {
        init_log();

        let page = page_with_entries(&[10, 20, 30, 40]);

        let entries: Vec<Entry> =
            BTreeInternalPageIterator::new(&page).collect();
        for pair in entries.windows(2) {
            assert_eq!(pair[0].get_right_child(), pair[1].get_left_child());
        }

        assert_eq!(page.get_first_child_pid(), leaf(1));
        assert_eq!(page.get_last_child_pid(), leaf(5));
        assert_eq!(page.children_count(), 5);
    }

    #[test]
    fn test_sibling_lookup_through_entries() {
        init_log();

        let page = page_with_entries(&[10, 20, 30]);

        let (left, right) = page.get_sibling_pids(&leaf(2));
        assert_eq!(left, Some(leaf(1)));
        assert_eq!(right, Some(leaf(3)));

        let (left, right) = page.get_sibling_pids(&leaf(1));
        assert_eq!(left, None);
        assert_eq!(right, Some(leaf(2)));
    }
}
