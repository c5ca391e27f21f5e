use std::{cmp, ops::DerefMut};

use crate::{
    btree::page::{
        BTreeHeaderPage, BTreeInternalPage, BTreeInternalPageIterator,
        BTreeLeafPage, BTreeLeafPageIterator, BTreePage, BTreePageID, Entry,
        PageCategory,
    },
    error::TinyError,
    storage::tuple::{Cell, WrappedTuple},
    transaction::{Permission, Transaction},
    types::{Pod, TinyResult},
    utils::HandyRwLock,
    BTreeTable, Database,
};

// delete-related functions
impl BTreeTable {
    /// Delete a tuple from the table.
    ///
    /// May cause pages to merge or redistribute entries/tuples when
    /// a page drops below half full.
    pub fn delete_tuple(
        &self,
        tx: &Transaction,
        tuple: &WrappedTuple,
    ) -> TinyResult {
        let pid = tuple.get_pid();
        let leaf_rc = Database::page_cache().get_leaf_page(
            tx,
            Permission::ReadWrite,
            &pid,
        )?;

        // hold the leaf page
        {
            let mut leaf = leaf_rc.wl();
            leaf.delete_tuple(tuple.get_slot_number())?;
        }
        // release the leaf page

        if leaf_rc.rl().stable() {
            Ok(())
        } else {
            self.handle_erratic_leaf_page(tx, leaf_rc)
        }
    }

    /// Handle the case when a leaf page drops below half full due to
    /// deletions.
    ///
    /// If one of its siblings has tuples to spare, redistribute;
    /// otherwise merge with one of them. The siblings are located
    /// through the entries of the parent, so both pages are
    /// guaranteed to share it. The left sibling is preferred.
    fn handle_erratic_leaf_page(
        &self,
        tx: &Transaction,
        page_rc: Pod<BTreeLeafPage>,
    ) -> TinyResult {
        let parent_pid = page_rc.rl().get_parent_pid();
        if parent_pid.category == PageCategory::RootPointer {
            // a root leaf may hold any number of tuples
            return Ok(());
        }

        let parent_rc = Database::page_cache().get_internal_page(
            tx,
            Permission::ReadWrite,
            &parent_pid,
        )?;
        let (left_pid, right_pid) =
            parent_rc.rl().get_sibling_pids(&page_rc.rl().get_pid());

        if let Some(left_pid) = left_pid {
            let left_rc = Database::page_cache().get_leaf_page(
                tx,
                Permission::ReadWrite,
                &left_pid,
            )?;
            self.balancing_two_leaf_pages(tx, left_rc, page_rc)?;
        } else if let Some(right_pid) = right_pid {
            let right_rc = Database::page_cache().get_leaf_page(
                tx,
                Permission::ReadWrite,
                &right_pid,
            )?;
            self.balancing_two_leaf_pages(tx, page_rc, right_rc)?;
        } else {
            return Err(TinyError::db(
                "an underfull non-root page has no sibling under its parent",
            ));
        }

        Ok(())
    }

    /// Handle the case when an internal page drops below half full
    /// due to deletions, the same way as for leaf pages.
    fn handle_erratic_internal_page(
        &self,
        tx: &Transaction,
        page_rc: Pod<BTreeInternalPage>,
    ) -> TinyResult {
        let parent_pid = page_rc.rl().get_parent_pid();
        if parent_pid.category == PageCategory::RootPointer {
            return Ok(());
        }

        let parent_rc = Database::page_cache().get_internal_page(
            tx,
            Permission::ReadWrite,
            &parent_pid,
        )?;
        let (left_pid, right_pid) =
            parent_rc.rl().get_sibling_pids(&page_rc.rl().get_pid());

        if let Some(left_pid) = left_pid {
            let left_rc = Database::page_cache().get_internal_page(
                tx,
                Permission::ReadWrite,
                &left_pid,
            )?;
            self.balancing_two_internal_pages(tx, left_rc, page_rc)?;
        } else if let Some(right_pid) = right_pid {
            let right_rc = Database::page_cache().get_internal_page(
                tx,
                Permission::ReadWrite,
                &right_pid,
            )?;
            self.balancing_two_internal_pages(tx, page_rc, right_rc)?;
        } else {
            return Err(TinyError::db(
                "an underfull non-root page has no sibling under its parent",
            ));
        }

        Ok(())
    }

    /// Balance two sibling leaf pages:
    ///
    /// 1. Merge them when their combined tuples fit in a single
    /// page (redistribution could not leave both at least half
    /// full).
    ///
    /// 2. Otherwise steal tuples from the fuller page so both end up
    /// with an equal share, and update the parent's separator to the
    /// first key of the now-right page.
    fn balancing_two_leaf_pages(
        &self,
        tx: &Transaction,
        left_rc: Pod<BTreeLeafPage>,
        right_rc: Pod<BTreeLeafPage>,
    ) -> TinyResult {
        let parent_rc = Database::page_cache().get_internal_page(
            tx,
            Permission::ReadWrite,
            &left_rc.rl().get_parent_pid(),
        )?;
        let mut entry = parent_rc
            .rl()
            .get_entry_by_children(
                &left_rc.rl().get_pid(),
                &right_rc.rl().get_pid(),
            )
            .ok_or_else(|| {
                TinyError::db("no parent entry joins the two pages")
            })?;

        let left_tuples = left_rc.rl().tuples_count();
        let right_tuples = right_rc.rl().tuples_count();
        if left_tuples + right_tuples <= left_rc.rl().get_slots_count() {
            return self
                .merge_leaf_page(tx, left_rc, right_rc, parent_rc, &entry);
        }

        let move_count = (left_tuples + right_tuples) / 2
            - cmp::min(left_tuples, right_tuples);
        if move_count == 0 {
            return Ok(());
        }

        let key: Cell;

        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            if left_tuples < right_tuples {
                let iter = BTreeLeafPageIterator::new(&right);
                let mut deleted_indexes: Vec<usize> = Vec::new();
                for tuple in iter.take(move_count) {
                    left.insert_tuple(&tuple)?;
                    deleted_indexes.push(tuple.get_slot_number());
                }
                for i in deleted_indexes {
                    right.delete_tuple(i)?;
                }
            } else {
                let iter = BTreeLeafPageIterator::new(&left);
                let mut deleted_indexes: Vec<usize> = Vec::new();
                for tuple in iter.rev().take(move_count) {
                    right.insert_tuple(&tuple)?;
                    deleted_indexes.push(tuple.get_slot_number());
                }
                for i in deleted_indexes {
                    left.delete_tuple(i)?;
                }
            }

            // the separator becomes the first key of the now-right
            // page
            let mut it = BTreeLeafPageIterator::new(&right);
            key = it
                .next()
                .ok_or_else(|| {
                    TinyError::db("redistribution emptied the right page")
                })?
                .get_cell(self.key_field);
        }
        // release the left and right page

        entry.set_key(&key);
        parent_rc.wl().update_entry(&entry);

        Ok(())
    }

    /// Balance two sibling internal pages:
    ///
    /// 1. Merge them when their combined children fit in a single
    /// page.
    ///
    /// 2. Otherwise rotate entries through the parent until both
    /// hold an equal share: the separator in the parent descends
    /// into the emptier page, and the edge key of the fuller page
    /// ascends to replace it. Parent pointers of every child that
    /// changed pages are updated.
    fn balancing_two_internal_pages(
        &self,
        tx: &Transaction,
        left_rc: Pod<BTreeInternalPage>,
        right_rc: Pod<BTreeInternalPage>,
    ) -> TinyResult {
        let parent_rc = Database::page_cache().get_internal_page(
            tx,
            Permission::ReadWrite,
            &left_rc.rl().get_parent_pid(),
        )?;
        let mut parent_entry = parent_rc
            .rl()
            .get_entry_by_children(
                &left_rc.rl().get_pid(),
                &right_rc.rl().get_pid(),
            )
            .ok_or_else(|| {
                TinyError::db("no parent entry joins the two pages")
            })?;

        let left_children = left_rc.rl().children_count();
        let right_children = right_rc.rl().children_count();
        if left_children + right_children <= left_rc.rl().get_children_cap() {
            return self.merge_internal_page(
                tx,
                left_rc,
                right_rc,
                parent_rc,
                &parent_entry,
            );
        }

        let move_count = (left_children + right_children) / 2
            - cmp::min(left_children, right_children);
        if move_count == 0 {
            return Ok(());
        }

        let mut middle_key = parent_entry.get_key();

        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            if left_children < right_children {
                // steal from the right sibling: entries rotate
                // counter-clockwise through the parent
                let edge_child_pid = left.get_last_child_pid();
                let right_iter = BTreeInternalPageIterator::new(&right);

                let moved_records = self.move_entries(
                    tx,
                    right_iter,
                    left,
                    move_count,
                    &mut middle_key,
                    edge_child_pid,
                    |edge_pid: BTreePageID, _e: &Entry| edge_pid,
                    |_edge_pid: BTreePageID, e: &Entry| e.get_left_child(),
                    |e: &Entry| e.get_left_child(),
                )?;

                for i in moved_records {
                    right.delete_key_and_left_child(i);
                }
            } else {
                // steal from the left sibling, symmetric
                let edge_child_pid = right.get_first_child_pid();
                let left_iter = BTreeInternalPageIterator::new(&left).rev();

                let moved_records = self.move_entries(
                    tx,
                    left_iter,
                    right,
                    move_count,
                    &mut middle_key,
                    edge_child_pid,
                    |_edge_pid: BTreePageID, e: &Entry| e.get_right_child(),
                    |edge_pid: BTreePageID, _e: &Entry| edge_pid,
                    |e: &Entry| e.get_right_child(),
                )?;

                for i in moved_records {
                    left.delete_key_and_right_child(i);
                }
            }
        }
        // release the left and right page

        parent_entry.set_key(&middle_key);
        parent_rc.wl().update_entry(&parent_entry);
        Ok(())
    }

    /// Move entries from one internal page into its sibling,
    /// rotating the separator through the parent at every step.
    ///
    /// # Arguments
    ///
    /// - `middle_key`: the key between the two pages; always larger
    ///   than every key in the left page and smaller than every key
    ///   in the right page. Updated each time an entry crosses.
    ///
    /// - `edge_child_pid`: the edge child of the destination page.
    ///
    /// - `fn_get_edge_left_child` / `fn_get_edge_right_child`: build
    ///   the children of the entry inserted into the destination,
    ///   from the destination's edge child and the source entry.
    ///
    /// - `fn_get_moved_child`: the child page that crosses with the
    ///   entry, whose parent pointer must be updated.
    ///
    /// Returns the slot indexes of the moved entries in the source
    /// page, for the caller to delete (the source page cannot be
    /// modified while it is iterated).
    fn move_entries(
        &self,
        tx: &Transaction,
        src_iter: impl Iterator<Item = Entry>,
        mut dest: impl DerefMut<Target = BTreeInternalPage>,
        move_count: usize,
        middle_key: &mut Cell,
        mut edge_child_pid: BTreePageID,
        fn_get_edge_left_child: impl Fn(BTreePageID, &Entry) -> BTreePageID,
        fn_get_edge_right_child: impl Fn(BTreePageID, &Entry) -> BTreePageID,
        fn_get_moved_child: impl Fn(&Entry) -> BTreePageID,
    ) -> Result<Vec<usize>, TinyError> {
        let mut moved_records = Vec::new();

        for e in src_iter.take(move_count) {
            moved_records.push(e.get_record_id());

            let new_entry = Entry::new(
                middle_key,
                &fn_get_edge_left_child(edge_child_pid, &e),
                &fn_get_edge_right_child(edge_child_pid, &e),
            );
            dest.insert_entry(&new_entry)?;

            Self::set_parent(tx, &fn_get_moved_child(&e), &dest.get_pid())?;

            *middle_key = e.get_key();
            edge_child_pid = fn_get_moved_child(&e);
        }

        Ok(moved_records)
    }

    /// Merge two sibling leaf pages: all tuples of the right page
    /// move into the left, the sibling chain is bridged across the
    /// vanishing page, the right page returns to the free list and
    /// the separator entry leaves the parent.
    fn merge_leaf_page(
        &self,
        tx: &Transaction,
        left_rc: Pod<BTreeLeafPage>,
        right_rc: Pod<BTreeLeafPage>,
        parent_rc: Pod<BTreeInternalPage>,
        entry: &Entry,
    ) -> TinyResult {
        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            // stage 1: move the tuples from right to left
            let mut deleted: Vec<usize> = Vec::new();
            let it = BTreeLeafPageIterator::new(&right);
            for t in it {
                left.insert_tuple(&t)?;
                deleted.push(t.get_slot_number());
            }
            for slot in deleted {
                right.delete_tuple(slot)?;
            }

            // stage 2: bridge the sibling chain across the vanishing
            // page
            left.set_right_pid(right.get_right_pid());
            if let Some(newer_right_pid) = right.get_right_pid() {
                let newer_right_rc = Database::page_cache().get_leaf_page(
                    tx,
                    Permission::ReadWrite,
                    &newer_right_pid,
                )?;
                newer_right_rc.wl().set_left_pid(Some(left.get_pid()));
            }

            // stage 3: return the right page to the free list
            self.set_empty_page(tx, &right.get_pid())?;
        }
        // release the left and right page

        // stage 4: delete the separator in the parent
        self.delete_parent_entry(tx, left_rc, parent_rc, entry)
    }

    /// Merge two sibling internal pages: the parent's separator is
    /// pulled down to join the two pages' contents, the remaining
    /// entries of the right page move into the left, the right page
    /// is freed and the separator leaves the parent.
    fn merge_internal_page(
        &self,
        tx: &Transaction,
        left_rc: Pod<BTreeInternalPage>,
        right_rc: Pod<BTreeInternalPage>,
        parent_rc: Pod<BTreeInternalPage>,
        parent_entry: &Entry,
    ) -> TinyResult {
        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            // stage 1: pull the separator down from the parent; it
            // joins the right end of the left page and the left end
            // of the right page
            let edge_entry = Entry::new(
                &parent_entry.get_key(),
                &left.get_last_child_pid(),
                &right.get_first_child_pid(),
            );
            Self::set_parent(tx, &right.get_first_child_pid(), &left.get_pid())?;
            left.insert_entry(&edge_entry)?;

            // stage 2: move the remaining entries from right to left
            let mut deleted_indexes: Vec<usize> = Vec::new();
            let iter = BTreeInternalPageIterator::new(&right);
            for e in iter {
                left.insert_entry(&e)?;
                Self::set_parent(tx, &e.get_right_child(), &left.get_pid())?;
                deleted_indexes.push(e.get_record_id());
            }
            for i in deleted_indexes {
                right.delete_key_and_right_child(i);
            }

            // stage 3: return the right page to the free list
            self.set_empty_page(tx, &right.get_pid())?;
        }
        // release the left and right page

        // stage 4: delete the separator in the parent
        self.delete_parent_entry(tx, left_rc, parent_rc, parent_entry)
    }

    /// Delete an entry (the key and its right child pointer) from a
    /// parent page.
    ///
    /// If the parent becomes empty it was the root, and the left
    /// page becomes the new root of the tree. Otherwise, if the
    /// parent drops below minimum occupancy, it steals from or
    /// merges with one of its own siblings.
    fn delete_parent_entry<PAGE: BTreePage>(
        &self,
        tx: &Transaction,
        left_rc: Pod<PAGE>,
        parent_rc: Pod<BTreeInternalPage>,
        entry: &Entry,
    ) -> TinyResult {
        // hold the parent and the left page
        {
            let mut parent = parent_rc.wl();
            let mut left = left_rc.wl();

            parent.delete_key_and_right_child(entry.get_record_id());

            // case 1: the parent is empty, the left page becomes the
            // new root
            if parent.entries_count() == 0 {
                if parent.get_parent_pid().category
                    != PageCategory::RootPointer
                {
                    return Err(TinyError::db(&format!(
                        "a non-root internal page {} emptied out",
                        parent.get_pid(),
                    )));
                }

                let root_ptr_rc =
                    self.get_root_ptr_page(tx, Permission::ReadWrite)?;

                // hold the root pointer page
                {
                    let mut root_ptr = root_ptr_rc.wl();
                    left.set_parent_pid(&root_ptr.get_pid());
                    root_ptr.set_root_pid(&left.get_pid());
                }
                // release the root pointer page

                // the old root returns to the free list
                self.set_empty_page(tx, &parent.get_pid())?;
                return Ok(());
            }

            // case 2: the parent is still at least half full
            if parent.stable() {
                return Ok(());
            }
        }
        // release the parent and the left page

        // case 3: the parent dropped below half full
        self.handle_erratic_internal_page(tx, parent_rc)
    }

    /// Mark a page of this table as empty: find the header page
    /// covering it (extending the chain as needed) and clear the
    /// corresponding slot. The page also leaves the cache so a later
    /// allocation starts from the zeroed on-disk bytes.
    pub(crate) fn set_empty_page(
        &self,
        tx: &Transaction,
        pid: &BTreePageID,
    ) -> TinyResult {
        Database::page_cache().discard_page(pid);

        let slots = BTreeHeaderPage::calculate_slots_count() as u32;
        let target_ordinal = (pid.page_index - 1) / slots;

        let root_ptr_rc = self.get_root_ptr_page(tx, Permission::ReadWrite)?;

        let header_pid = root_ptr_rc.rl().get_header_pid();
        let mut header_rc = match header_pid {
            Some(header_pid) => Database::page_cache().get_header_page(
                tx,
                Permission::ReadWrite,
                &header_pid,
            )?,
            None => {
                // no header pages yet, create the first one and hook
                // it into the root pointer
                let header_rc = self.get_empty_header_page(tx)?;
                let header_pid = header_rc.rl().get_pid();
                root_ptr_rc.wl().set_header_pid(&header_pid);
                header_rc
            }
        };

        // walk the chain to the header covering the page, extending
        // it as needed
        let mut ordinal = 0;
        while ordinal < target_ordinal {
            let next_pid = header_rc.rl().get_next_pid();
            header_rc = match next_pid {
                Some(next_pid) => Database::page_cache().get_header_page(
                    tx,
                    Permission::ReadWrite,
                    &next_pid,
                )?,
                None => {
                    let new_rc = self.get_empty_header_page(tx)?;
                    let new_pid = new_rc.rl().get_pid();
                    new_rc.wl().set_prev_pid(Some(header_rc.rl().get_pid()));
                    header_rc.wl().set_next_pid(Some(new_pid));
                    new_rc
                }
            };
            ordinal += 1;
        }

        let slot_index = ((pid.page_index - 1) % slots) as usize;
        header_rc.wl().mark_slot_status(slot_index, false);
        Ok(())
    }
}
