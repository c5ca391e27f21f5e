use core::fmt;
use std::{
    collections::hash_map::DefaultHasher,
    fs::{File, OpenOptions},
    hash::{Hash, Hasher},
    io::{Seek, SeekFrom, Write},
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex, MutexGuard,
    },
};

use log::debug;

use crate::{
    btree::{
        consts::ROOT_PTR_PAGE_SIZE,
        page::{
            BTreeBasePage, BTreeHeaderPage, BTreeInternalPage,
            BTreeInternalPageIterator, BTreeLeafPage, BTreeLeafPageIterator,
            BTreePage, BTreePageID, BTreeRootPointerPage, PageCategory,
        },
        page_cache::PageCache,
        table::BTreeTableIterator,
    },
    error::TinyError,
    io::TinyWriter,
    storage::{schema::TableSchema, tuple::Cell},
    transaction::{Permission, Transaction},
    types::{Pod, ResultPod, TinyResult},
    utils::{lock_state, HandyRwLock},
    Database,
};

pub(crate) enum SearchFor {
    Target(Cell),
    LeftMost,
    RightMost,
}

/// B+ tree
pub struct BTreeTable {
    // the file that stores the on-disk backing store for this B+
    // tree
    file_path: String,

    // the field the index is keyed on
    pub key_field: usize,

    // the schema of tuples in the file
    pub schema: TableSchema,

    file: Mutex<File>,

    table_id: u32,

    /// The page index of the last page in the file.
    ///
    /// Page indexes start from 0 and increase monotonically by 1;
    /// index 0 is the root pointer page.
    page_index: AtomicU32,
}

impl fmt::Display for BTreeTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<BTreeTable, file: {}, id: {}>",
            self.file_path, self.table_id
        )
    }
}

// init functions
impl BTreeTable {
    pub fn new(file_path: &str, key_field: usize, schema: &TableSchema) -> Self {
        File::create(file_path).expect("io error");

        let f = Mutex::new(
            OpenOptions::new()
                .write(true)
                .read(true)
                .open(file_path)
                .unwrap(),
        );

        let mut hasher = DefaultHasher::new();
        file_path.hash(&mut hasher);
        let table_id = hasher.finish() as u32;

        Self::file_init(&f);

        Self {
            file_path: file_path.to_string(),
            key_field,
            schema: schema.clone(),
            file: f,
            table_id,

            // the file starts with the root pointer page and one
            // empty leaf page
            page_index: AtomicU32::new(1),
        }
    }

    /// Initialize a fresh file: a root pointer page naming page 1 as
    /// the root, followed by an empty leaf page.
    fn file_init(file: &Mutex<File>) {
        let mut file = file.lock().unwrap();

        if file.metadata().unwrap().len() > 0 {
            return;
        }

        // the root pointer page
        {
            let mut writer = TinyWriter::new();
            writer.write(&1u32);
            writer.write(&PageCategory::Leaf.to_byte());
            let data = writer.to_padded_bytes(ROOT_PTR_PAGE_SIZE);
            file.write_all(&data).unwrap();
        }

        // the first leaf page, empty
        {
            let data = BTreeBasePage::empty_page_data();
            file.write_all(&data).unwrap();
        }

        file.flush().unwrap();
    }
}

// normal read-only functions
impl BTreeTable {
    pub fn get_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    /// Calculate the number of tuples in the table. Requires a
    /// shared lock on all leaf pages.
    pub fn tuples_count(&self) -> Result<usize, TinyError> {
        let tx = Transaction::new();
        match self.count_tuples(&tx) {
            Ok(count) => {
                tx.commit()?;
                Ok(count)
            }
            Err(e) => {
                tx.abort()?;
                Err(e)
            }
        }
    }

    fn count_tuples(&self, tx: &Transaction) -> Result<usize, TinyError> {
        let mut it = BTreeTableIterator::new(tx, self)?;
        let mut count = 0;
        while it.try_next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// The count of pages in this file, the root pointer page not
    /// included.
    pub fn pages_count(&self) -> usize {
        let file_size = self.get_file().metadata().unwrap().len() as usize;
        (file_size - ROOT_PTR_PAGE_SIZE) / PageCache::get_page_size()
    }

    pub fn set_page_index(&self, i: u32) {
        self.page_index.store(i, Ordering::Relaxed);
    }
}

// disk io
impl BTreeTable {
    fn page_position(page_id: &BTreePageID) -> usize {
        match page_id.category {
            PageCategory::RootPointer => 0,
            _ => {
                ROOT_PTR_PAGE_SIZE
                    + (page_id.page_index as usize - 1)
                        * PageCache::get_page_size()
            }
        }
    }

    pub fn write_page_to_disk(
        &self,
        page_id: &BTreePageID,
        data: &Vec<u8>,
    ) -> TinyResult {
        let start_pos = Self::page_position(page_id);

        let mut file = self.get_file();
        file.seek(SeekFrom::Start(start_pos as u64))
            .map_err(|e| TinyError::db(&format!("seek failed: {}", e)))?;
        file.write_all(data)
            .map_err(|e| TinyError::db(&format!("write failed: {}", e)))?;
        file.flush()
            .map_err(|e| TinyError::db(&format!("flush failed: {}", e)))?;
        Ok(())
    }

    pub fn write_empty_page_to_disk(&self, page_id: &BTreePageID) -> TinyResult {
        let data = match page_id.category {
            PageCategory::RootPointer => vec![0; ROOT_PTR_PAGE_SIZE],
            _ => BTreeBasePage::empty_page_data(),
        };
        self.write_page_to_disk(page_id, &data)
    }
}

// root management
impl BTreeTable {
    pub fn get_root_ptr_page(
        &self,
        tx: &Transaction,
        perm: Permission,
    ) -> ResultPod<BTreeRootPointerPage> {
        let root_ptr_pid = BTreePageID {
            category: PageCategory::RootPointer,
            page_index: 0,
            table_id: self.table_id,
        };
        Database::page_cache().get_root_ptr_page(tx, perm, &root_ptr_pid)
    }

    /// Get the pid of the current root page (internal or leaf).
    pub fn get_root_pid(&self, tx: &Transaction) -> Result<BTreePageID, TinyError> {
        let root_ptr_rc = self.get_root_ptr_page(tx, Permission::ReadOnly)?;
        let mut root_pid = root_ptr_rc.rl().get_root_pid();
        root_pid.table_id = self.get_id();
        Ok(root_pid)
    }

    pub fn set_root_pid(
        &self,
        tx: &Transaction,
        root_pid: &BTreePageID,
    ) -> TinyResult {
        let root_ptr_rc = self.get_root_ptr_page(tx, Permission::ReadWrite)?;
        root_ptr_rc.wl().set_root_pid(root_pid);
        Ok(())
    }
}

// search
impl BTreeTable {
    /// Recursive function which finds and locks the leaf page in the
    /// B+ tree corresponding to the left-most page possibly
    /// containing the search target. Internal pages along the path
    /// are only acquired with read permission; the leaf is acquired
    /// with the caller's permission.
    pub(crate) fn find_leaf_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        page_id: BTreePageID,
        search: &SearchFor,
    ) -> ResultPod<BTreeLeafPage> {
        match page_id.category {
            PageCategory::Leaf => {
                Database::page_cache().get_leaf_page(tx, perm, &page_id)
            }
            PageCategory::Internal => {
                let page_rc = Database::page_cache().get_internal_page(
                    tx,
                    Permission::ReadOnly,
                    &page_id,
                )?;

                let child_pid: BTreePageID;
                // hold the page
                {
                    let page = page_rc.rl();
                    let mut it = BTreeInternalPageIterator::new(&page);

                    child_pid = match search {
                        SearchFor::Target(cell) => {
                            // descend into the left child of the
                            // first entry whose key reaches the
                            // target, or the right child of the last
                            // entry
                            let mut last_entry = None;
                            let mut found = None;
                            for e in it {
                                if &e.get_key() >= cell {
                                    found = Some(e.get_left_child());
                                    break;
                                }
                                last_entry = Some(e);
                            }

                            match found {
                                Some(pid) => pid,
                                None => last_entry
                                    .ok_or_else(|| {
                                        TinyError::db(&format!(
                                            "internal page {} has no entries",
                                            page_id,
                                        ))
                                    })?
                                    .get_right_child(),
                            }
                        }
                        SearchFor::LeftMost => it
                            .next()
                            .ok_or_else(|| {
                                TinyError::db(&format!(
                                    "internal page {} has no entries",
                                    page_id,
                                ))
                            })?
                            .get_left_child(),
                        SearchFor::RightMost => it
                            .next_back()
                            .ok_or_else(|| {
                                TinyError::db(&format!(
                                    "internal page {} has no entries",
                                    page_id,
                                ))
                            })?
                            .get_right_child(),
                    };
                }
                // release the page

                self.find_leaf_page(tx, perm, child_pid, search)
            }
            _ => Err(TinyError::db(&format!(
                "unexpected page category inside the tree: {:?}",
                page_id.category,
            ))),
        }
    }

    pub fn get_first_page(
        &self,
        tx: &Transaction,
        perm: Permission,
    ) -> ResultPod<BTreeLeafPage> {
        let page_id = self.get_root_pid(tx)?;
        self.find_leaf_page(tx, perm, page_id, &SearchFor::LeftMost)
    }

    pub fn get_last_page(
        &self,
        tx: &Transaction,
        perm: Permission,
    ) -> ResultPod<BTreeLeafPage> {
        let page_id = self.get_root_pid(tx)?;
        self.find_leaf_page(tx, perm, page_id, &SearchFor::RightMost)
    }
}

// parent pointer maintenance
impl BTreeTable {
    /// Make sure the child's recorded parent is the given page. Only
    /// writes the child (taking the write lock and dirtying it) when
    /// the parent actually changed.
    pub(crate) fn set_parent(
        tx: &Transaction,
        child_pid: &BTreePageID,
        parent_pid: &BTreePageID,
    ) -> TinyResult {
        match child_pid.category {
            PageCategory::Internal => {
                let child_rc = Database::page_cache().get_internal_page(
                    tx,
                    Permission::ReadOnly,
                    child_pid,
                )?;
                if &child_rc.rl().get_parent_pid() == parent_pid {
                    return Ok(());
                }

                let child_rc = Database::page_cache().get_internal_page(
                    tx,
                    Permission::ReadWrite,
                    child_pid,
                )?;
                child_rc.wl().set_parent_pid(parent_pid);
                Ok(())
            }
            PageCategory::Leaf => {
                let child_rc = Database::page_cache().get_leaf_page(
                    tx,
                    Permission::ReadOnly,
                    child_pid,
                )?;
                if &child_rc.rl().get_parent_pid() == parent_pid {
                    return Ok(());
                }

                let child_rc = Database::page_cache().get_leaf_page(
                    tx,
                    Permission::ReadWrite,
                    child_pid,
                )?;
                child_rc.wl().set_parent_pid(parent_pid);
                Ok(())
            }
            _ => Err(TinyError::db(&format!(
                "invalid child category: {:?}",
                child_pid.category,
            ))),
        }
    }

    /// Make every child of the internal page record it as parent.
    pub(crate) fn update_parent_pointers(
        &self,
        tx: &Transaction,
        page_rc: &Pod<BTreeInternalPage>,
    ) -> TinyResult {
        let pid = page_rc.rl().get_pid();
        let children = page_rc.rl().get_children();
        for child_pid in children {
            Self::set_parent(tx, &child_pid, &pid)?;
        }
        Ok(())
    }
}

// free page management
impl BTreeTable {
    /// Find a page number to place a new page on: claim a free slot
    /// recorded in the header chain if one exists, otherwise append
    /// a fresh page to the file.
    pub(crate) fn get_empty_page_index(
        &self,
        tx: &Transaction,
    ) -> Result<u32, TinyError> {
        let root_ptr_rc = self.get_root_ptr_page(tx, Permission::ReadOnly)?;
        let mut header_pid = root_ptr_rc.rl().get_header_pid();

        let slots = BTreeHeaderPage::calculate_slots_count() as u32;
        let mut base = 0;
        while let Some(pid) = header_pid {
            let header_rc = Database::page_cache().get_header_page(
                tx,
                Permission::ReadWrite,
                &pid,
            )?;

            let empty_slot = header_rc.rl().get_empty_slot();
            if let Some(i) = empty_slot {
                header_rc.wl().mark_slot_status(i, true);
                return Ok(base + i as u32 + 1);
            }

            header_pid = header_rc.rl().get_next_pid();
            base += slots;
        }

        // no free slot recorded anywhere, append to the file
        Ok(self.page_index.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Allocate a fresh leaf page: the on-disk bytes are zeroed, any
    /// stale cache entry discarded, and the page returned write
    /// locked.
    pub(crate) fn get_empty_leaf_page(
        &self,
        tx: &Transaction,
    ) -> ResultPod<BTreeLeafPage> {
        let page_index = self.get_empty_page_index(tx)?;
        let page_id =
            BTreePageID::new(PageCategory::Leaf, self.table_id, page_index);

        Database::page_cache().discard_page(&page_id);
        self.write_empty_page_to_disk(&page_id)?;

        Database::page_cache().get_leaf_page(
            tx,
            Permission::ReadWrite,
            &page_id,
        )
    }

    pub(crate) fn get_empty_internal_page(
        &self,
        tx: &Transaction,
    ) -> ResultPod<BTreeInternalPage> {
        let page_index = self.get_empty_page_index(tx)?;
        let page_id =
            BTreePageID::new(PageCategory::Internal, self.table_id, page_index);

        Database::page_cache().discard_page(&page_id);
        self.write_empty_page_to_disk(&page_id)?;

        Database::page_cache().get_internal_page(
            tx,
            Permission::ReadWrite,
            &page_id,
        )
    }

    pub(crate) fn get_empty_header_page(
        &self,
        tx: &Transaction,
    ) -> ResultPod<BTreeHeaderPage> {
        let page_index = self.get_empty_page_index(tx)?;
        let page_id =
            BTreePageID::new(PageCategory::Header, self.table_id, page_index);

        Database::page_cache().discard_page(&page_id);
        self.write_empty_page_to_disk(&page_id)?;

        let header_rc = Database::page_cache().get_header_page(
            tx,
            Permission::ReadWrite,
            &page_id,
        )?;

        // any page in the covered range may be live, so a fresh
        // header starts with every slot marked used
        header_rc.wl().set_all_used();
        Ok(header_rc)
    }
}

/// debug methods
impl BTreeTable {
    /// Print the tree structure to the debug log.
    ///
    /// # Arguments
    ///
    /// - `max_level` - the max level of the print
    ///     - 0: print the root page
    ///     - -1: print all pages
    pub fn draw_tree(&self, max_level: i32) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }

        let tx = Transaction::new();

        let mut depiction = "".to_string();
        depiction.push_str("\n\n----- PRINT TREE STRUCTURE START -----\n\n");

        let root_pointer_pid = BTreePageID {
            category: PageCategory::RootPointer,
            page_index: 0,
            table_id: self.table_id,
        };
        depiction.push_str(&format!("root pointer: {}\n", root_pointer_pid));

        match self.get_root_pid(&tx) {
            Ok(root_pid) => {
                depiction.push_str(&self.draw_subtree(&tx, &root_pid, 0, max_level));
            }
            Err(e) => {
                depiction.push_str(&format!("cannot reach the root: {}\n", e));
            }
        }

        depiction.push_str("\n----- PRINT TREE STRUCTURE END   -----\n\n");

        debug!("{}", depiction);
        tx.commit().unwrap();
    }

    fn draw_subtree(
        &self,
        tx: &Transaction,
        pid: &BTreePageID,
        level: usize,
        max_level: i32,
    ) -> String {
        match pid.category {
            PageCategory::Internal => {
                self.draw_internal_node(tx, pid, level, max_level)
            }
            PageCategory::Leaf => self.draw_leaf_node(tx, pid, level),
            _ => format!("invalid page category: {:?}\n", pid.category),
        }
    }

    fn draw_leaf_node(
        &self,
        tx: &Transaction,
        pid: &BTreePageID,
        level: usize,
    ) -> String {
        let mut depiction = "".to_string();

        let prefix = "│   ".repeat(level);
        let page_rc = match Database::page_cache().get_leaf_page(
            tx,
            Permission::ReadOnly,
            pid,
        ) {
            Ok(rc) => rc,
            Err(e) => return format!("{}cannot fetch leaf {}: {}\n", prefix, pid, e),
        };
        let lock_state = lock_state(page_rc.clone());

        let page = page_rc.rl();
        depiction.push_str(&format!(
            "{}├── leaf: {} ({}/{} tuples) (lock state: {})\n",
            prefix,
            page.get_pid(),
            page.tuples_count(),
            page.slot_count,
            lock_state,
        ));

        let mut it = BTreeLeafPageIterator::new(&page);
        let prefix = "│   ".repeat(level + 1);
        if let Some(first_tuple) = it.next() {
            depiction.push_str(&format!(
                "{}├── first tuple: {}\n",
                prefix, first_tuple,
            ));
        }
        if let Some(last_tuple) = it.next_back() {
            depiction.push_str(&format!(
                "{}└── last tuple:  {}\n",
                prefix, last_tuple,
            ));
        }

        depiction
    }

    fn draw_internal_node(
        &self,
        tx: &Transaction,
        pid: &BTreePageID,
        level: usize,
        max_level: i32,
    ) -> String {
        let mut depiction = "".to_string();

        let prefix = "│   ".repeat(level);
        let page_rc = match Database::page_cache().get_internal_page(
            tx,
            Permission::ReadOnly,
            pid,
        ) {
            Ok(rc) => rc,
            Err(e) => {
                return format!(
                    "{}cannot fetch internal {}: {}\n",
                    prefix, pid, e,
                )
            }
        };
        let lock_state = lock_state(page_rc.clone());

        // hold the page
        {
            let page = page_rc.rl();
            depiction.push_str(&format!(
                "{}├── internal: {} ({}/{} entries) (lock state: {})\n",
                prefix,
                pid,
                page.entries_count(),
                page.get_entries_cap(),
                lock_state,
            ));
            if max_level != -1 && level as i32 == max_level {
                return depiction;
            }
            let it = BTreeInternalPageIterator::new(&page);
            for (i, entry) in it.enumerate() {
                depiction.push_str(
                    &self.draw_entry(tx, i, &entry, level + 1, max_level),
                );
            }
        }
        // release the page

        depiction
    }

    fn draw_entry(
        &self,
        tx: &Transaction,
        id: usize,
        entry: &crate::btree::page::Entry,
        level: usize,
        max_level: i32,
    ) -> String {
        let mut depiction = "".to_string();

        let prefix = "│   ".repeat(level);
        if id == 0 {
            depiction.push_str(&self.draw_subtree(
                tx,
                &entry.get_left_child(),
                level + 1,
                max_level,
            ));
        }
        depiction.push_str(&format!("{}├── key: {:?}\n", prefix, entry.get_key()));
        depiction.push_str(&self.draw_subtree(
            tx,
            &entry.get_right_child(),
            level + 1,
            max_level,
        ));

        depiction
    }
}

/// integrity checking
impl BTreeTable {
    /// Checks the integrity of the tree:
    /// - parent pointers
    /// - sibling pointers
    /// - key order against the separators
    /// - occupancy invariants (if enabled)
    ///
    /// Requires a shared lock on all pages.
    pub fn check_integrity(&self, check_occupancy: bool) -> TinyResult {
        let tx = Transaction::new();
        let result = self.check_integrity_inner(&tx, check_occupancy);
        tx.commit()?;
        result
    }

    fn check_integrity_inner(
        &self,
        tx: &Transaction,
        check_occupancy: bool,
    ) -> TinyResult {
        let root_ptr_pid = BTreePageID {
            category: PageCategory::RootPointer,
            page_index: 0,
            table_id: self.table_id,
        };
        let root_pid = self.get_root_pid(tx)?;

        let root_summary = self.check_sub_tree(
            tx,
            &root_pid,
            &root_ptr_pid,
            &None,
            &None,
            check_occupancy,
            0,
        )?;

        if root_summary.left_ptr.is_some() {
            return Err(TinyError::db(&format!(
                "the left-most leaf has a left sibling: {:?}",
                root_summary.left_ptr,
            )));
        }
        if root_summary.right_ptr.is_some() {
            return Err(TinyError::db(&format!(
                "the right-most leaf has a right sibling: {:?}",
                root_summary.right_ptr,
            )));
        }

        Ok(())
    }

    fn check_sub_tree(
        &self,
        tx: &Transaction,
        pid: &BTreePageID,
        parent_pid: &BTreePageID,
        lower_bound: &Option<Cell>,
        upper_bound: &Option<Cell>,
        check_occupancy: bool,
        depth: usize,
    ) -> Result<SubtreeSummary, TinyError> {
        match pid.category {
            PageCategory::Leaf => {
                let page_rc = Database::page_cache().get_leaf_page(
                    tx,
                    Permission::ReadOnly,
                    pid,
                )?;
                let page = page_rc.rl();
                page.check_integrity(
                    parent_pid,
                    lower_bound,
                    upper_bound,
                    check_occupancy,
                    depth,
                )?;

                Ok(SubtreeSummary {
                    left_ptr: page.get_left_pid(),
                    right_ptr: page.get_right_pid(),
                    left_most_pid: Some(page.get_pid()),
                    right_most_pid: Some(page.get_pid()),
                    depth,
                })
            }

            PageCategory::Internal => {
                let page_rc = Database::page_cache().get_internal_page(
                    tx,
                    Permission::ReadOnly,
                    pid,
                )?;
                let page = page_rc.rl();
                page.check_integrity(
                    parent_pid,
                    lower_bound,
                    upper_bound,
                    check_occupancy,
                    depth,
                )?;

                let mut lower = lower_bound.clone();

                let mut it = BTreeInternalPageIterator::new(&page);
                let current = it.next().ok_or_else(|| {
                    TinyError::db(&format!("internal page {} has no entries", pid))
                })?;
                let mut accumulation = self.check_sub_tree(
                    tx,
                    &current.get_left_child(),
                    pid,
                    &lower,
                    &Some(current.get_key()),
                    check_occupancy,
                    depth + 1,
                )?;

                let mut last_entry = current;
                for entry in it {
                    let current_summary = self.check_sub_tree(
                        tx,
                        &entry.get_left_child(),
                        pid,
                        &lower,
                        &Some(entry.get_key()),
                        check_occupancy,
                        depth + 1,
                    )?;
                    accumulation =
                        accumulation.check_and_merge(&current_summary)?;

                    lower = Some(entry.get_key());
                    last_entry = entry;
                }

                let last_right_summary = self.check_sub_tree(
                    tx,
                    &last_entry.get_right_child(),
                    pid,
                    &lower,
                    upper_bound,
                    check_occupancy,
                    depth + 1,
                )?;
                accumulation = accumulation.check_and_merge(&last_right_summary)?;

                Ok(accumulation)
            }

            // no other page types are allowed inside the tree
            _ => Err(TinyError::db(&format!(
                "invalid page category inside the tree: {:?}",
                pid.category,
            ))),
        }
    }
}

struct SubtreeSummary {
    /// The distance towards the root.
    depth: usize,

    left_ptr: Option<BTreePageID>,
    left_most_pid: Option<BTreePageID>,
    right_ptr: Option<BTreePageID>,
    right_most_pid: Option<BTreePageID>,
}

impl SubtreeSummary {
    fn check_and_merge(
        &self,
        right: &SubtreeSummary,
    ) -> Result<SubtreeSummary, TinyError> {
        if self.depth != right.depth {
            return Err(TinyError::db(&format!(
                "subtrees of uneven depth: {} vs {}",
                self.depth, right.depth,
            )));
        }

        if self.right_ptr != right.left_most_pid {
            return Err(TinyError::db(&format!(
                "broken sibling chain: right pointer {:?} does not reach {:?}",
                self.right_ptr, right.left_most_pid,
            )));
        }

        if self.right_most_pid != right.left_ptr {
            return Err(TinyError::db(&format!(
                "broken sibling chain: {:?} is not the left pointer {:?}",
                self.right_most_pid, right.left_ptr,
            )));
        }

        Ok(SubtreeSummary {
            depth: self.depth,
            left_ptr: self.left_ptr,
            left_most_pid: self.left_most_pid,
            right_ptr: right.right_ptr,
            right_most_pid: right.right_most_pid,
        })
    }
}
