use crate::{
    btree::{
        page::{
            BTreeInternalPage, BTreeInternalPageIterator, BTreeLeafPage,
            BTreeLeafPageIterator, BTreePage, BTreePageID, Entry, PageCategory,
        },
        table::table::SearchFor,
    },
    error::TinyError,
    storage::tuple::{Cell, Tuple},
    transaction::{Permission, Transaction},
    types::{Pod, ResultPod, TinyResult},
    utils::HandyRwLock,
    BTreeTable, Database,
};

// insert-related functions
impl BTreeTable {
    /// Insert a tuple into the table, keeping the tuples in sorted
    /// order. May cause pages to split if the page where the tuple
    /// belongs is full.
    pub fn insert_tuple(&self, tx: &Transaction, tuple: &Tuple) -> TinyResult {
        // locate the root through the root pointer page, then find
        // and write-lock the left-most leaf page corresponding to
        // the key field
        let root_pid = self.get_root_pid(tx)?;
        let field = tuple.get_cell(self.key_field);

        let mut leaf_rc = self.find_leaf_page(
            tx,
            Permission::ReadWrite,
            root_pid,
            &SearchFor::Target(field.clone()),
        )?;

        // split the leaf page when there are no more empty slots
        if leaf_rc.rl().empty_slots_count() == 0 {
            leaf_rc = self.split_leaf_page(tx, leaf_rc, &field)?;
        }

        let result = leaf_rc.wl().insert_tuple(tuple);
        result
    }

    /// Split a leaf page to make room for new tuples and recursively
    /// split the parent node as needed to accommodate a new entry.
    ///
    /// The new entry carries the key of the first tuple in the
    /// right-hand page (the key is "copied up") and child pointers
    /// to the two leaf pages resulting from the split. Sibling and
    /// parent pointers are updated accordingly.
    ///
    /// # Arguments
    ///
    /// - `field`: the key of the tuple to be inserted after the
    ///   split is complete, used to decide which of the two pages to
    ///   return.
    ///
    /// Returns the leaf page into which the new tuple should be
    /// inserted.
    pub(crate) fn split_leaf_page(
        &self,
        tx: &Transaction,
        page_rc: Pod<BTreeLeafPage>,
        field: &Cell,
    ) -> ResultPod<BTreeLeafPage> {
        let new_sibling_rc = self.get_empty_leaf_page(tx)?;
        let parent_pid: BTreePageID;
        let key: Cell;

        // hold the new sibling and the page
        {
            let mut new_sibling = new_sibling_rc.wl();
            let mut page = page_rc.wl();

            // move the upper half of the tuples to the new page,
            // iterating from the right to preserve the order
            let tuple_count = page.tuples_count();
            let move_tuple_count = tuple_count / 2;

            let mut it = BTreeLeafPageIterator::new(&page);
            let mut delete_indexes: Vec<usize> = Vec::new();
            for tuple in it.by_ref().rev().take(move_tuple_count) {
                delete_indexes.push(tuple.get_slot_number());
                new_sibling.insert_tuple(&tuple)?;
            }

            for i in delete_indexes {
                page.delete_tuple(i)?;
            }

            // the first key of the right page is copied up into the
            // parent while remaining in the leaf
            let mut sibling_it = BTreeLeafPageIterator::new(&new_sibling);
            key = sibling_it
                .next()
                .ok_or_else(|| {
                    TinyError::db("the split moved no tuples to the new page")
                })?
                .get_cell(self.key_field);

            parent_pid = page.get_parent_pid();
        }
        // release the new sibling and the page

        // Attach the new page to the parent, recursively splitting
        // it as needed to make room.
        //
        // This happens outside all the borrow blocks since a parent
        // split may take a lot of pages, possibly including the
        // current one.
        let parent_rc = self.get_parent_with_empty_slots(tx, parent_pid, &key)?;

        // hold the parent, the page and the new sibling
        {
            let mut parent = parent_rc.wl();
            let mut page = page_rc.wl();
            let mut new_sibling = new_sibling_rc.wl();

            let entry =
                Entry::new(&key, &page.get_pid(), &new_sibling.get_pid());
            parent.insert_entry(&entry)?;

            // thread the new page into the sibling chain
            if let Some(old_right_pid) = page.get_right_pid() {
                let old_right_rc = Database::page_cache().get_leaf_page(
                    tx,
                    Permission::ReadWrite,
                    &old_right_pid,
                )?;
                old_right_rc.wl().set_left_pid(Some(new_sibling.get_pid()));
            }

            new_sibling.set_right_pid(page.get_right_pid());
            new_sibling.set_left_pid(Some(page.get_pid()));
            page.set_right_pid(Some(new_sibling.get_pid()));

            page.set_parent_pid(&parent.get_pid());
            new_sibling.set_parent_pid(&parent.get_pid());
        }
        // release the parent, the page and the new sibling

        if field > &key {
            Ok(new_sibling_rc)
        } else {
            Ok(page_rc)
        }
    }

    /// Get a parent page ready to accept a new entry.
    ///
    /// This may mean creating an internal page to become the new
    /// root of the tree, splitting the existing parent page if there
    /// are no empty slots, or simply locking and returning the
    /// existing parent page.
    ///
    /// # Arguments
    ///
    /// - `key`: the separator key that is about to be inserted, used
    ///   to pick the surviving half when the parent splits.
    fn get_parent_with_empty_slots(
        &self,
        tx: &Transaction,
        parent_id: BTreePageID,
        key: &Cell,
    ) -> ResultPod<BTreeInternalPage> {
        match parent_id.category {
            PageCategory::RootPointer => {
                // the tree grows a level: a fresh internal page
                // becomes the new root
                let new_parent_rc = self.get_empty_internal_page(tx)?;
                let new_parent_pid = new_parent_rc.rl().get_pid();
                self.set_root_pid(tx, &new_parent_pid)?;
                Ok(new_parent_rc)
            }
            PageCategory::Internal => {
                let parent_rc = Database::page_cache().get_internal_page(
                    tx,
                    Permission::ReadWrite,
                    &parent_id,
                )?;

                let empty_slots_count = parent_rc.rl().empty_slots_count();
                if empty_slots_count > 0 {
                    Ok(parent_rc)
                } else {
                    // split the parent to make room
                    self.split_internal_page(tx, parent_rc, key)
                }
            }
            _ => Err(TinyError::db(&format!(
                "invalid parent category: {:?}",
                parent_id.category,
            ))),
        }
    }

    /// Split an internal page to make room for new entries and
    /// recursively split its parent page as needed.
    ///
    /// The new parent entry carries the middle key of the original
    /// page (the key is "pushed up": it leaves the page and its
    /// right child becomes the left-most child of the new sibling),
    /// with child pointers to the two internal pages resulting from
    /// the split.
    ///
    /// # Arguments
    ///
    /// - `key`: the separator key that is about to be inserted, used
    ///   to pick the returned half.
    ///
    /// Returns the internal page into which the new entry should be
    /// inserted.
    fn split_internal_page(
        &self,
        tx: &Transaction,
        page_rc: Pod<BTreeInternalPage>,
        key: &Cell,
    ) -> ResultPod<BTreeInternalPage> {
        let sibling_rc = self.get_empty_internal_page(tx)?;
        let mid_key: Cell;
        let mut parent_pid: BTreePageID;

        // hold the sibling and the page
        {
            let mut sibling = sibling_rc.wl();
            let mut page = page_rc.wl();

            parent_pid = page.get_parent_pid();

            if parent_pid.category == PageCategory::RootPointer {
                // the page was the root, create the new root above
                let parent_rc = self.get_empty_internal_page(tx)?;
                parent_pid = parent_rc.rl().get_pid();
                self.set_root_pid(tx, &parent_pid)?;
            }

            let entries_count = page.entries_count();
            let move_entries_count = entries_count / 2;

            let mut delete_indexes: Vec<usize> = Vec::new();
            let mut it = BTreeInternalPageIterator::new(&page);
            for e in it.by_ref().rev().take(move_entries_count) {
                delete_indexes.push(e.get_record_id());
                sibling.insert_entry(&e)?;
            }

            // The next entry is the middle one; its key moves up to
            // the parent and its right child, already the left-most
            // child of the sibling, stays behind there.
            let middle_entry = it.next_back().ok_or_else(|| {
                TinyError::db("the split left no middle entry")
            })?;
            delete_indexes.push(middle_entry.get_record_id());

            for i in delete_indexes {
                page.delete_key_and_right_child(i);
            }

            mid_key = middle_entry.get_key();
        }
        // release the sibling and the page

        // every child that moved now records the sibling as parent
        self.update_parent_pointers(tx, &sibling_rc)?;

        let parent_rc =
            self.get_parent_with_empty_slots(tx, parent_pid, &mid_key)?;
        parent_pid = parent_rc.rl().get_pid();
        page_rc.wl().set_parent_pid(&parent_pid);
        sibling_rc.wl().set_parent_pid(&parent_pid);

        // hold the parent
        {
            let mut parent = parent_rc.wl();
            let new_entry = Entry::new(
                &mid_key,
                &page_rc.rl().get_pid(),
                &sibling_rc.rl().get_pid(),
            );
            parent.insert_entry(&new_entry)?;
        }
        // release the parent

        if key > &mid_key {
            Ok(sibling_rc)
        } else {
            Ok(page_rc)
        }
    }
}
