use std::{
    fs::File,
    io::{prelude::*, Seek, SeekFrom},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, RwLock,
    },
};

use log::debug;

use super::page::{
    BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage, BTreePage, BTreePageID,
    BTreeRootPointerPage, PageCategory,
};
use crate::{
    error::TinyError,
    storage::tuple::{Tuple, WrappedTuple},
    transaction::{Permission, Transaction},
    types::{ConcurrentHashMap, Pod, ResultPod, TinyResult},
    utils::HandyRwLock,
    BTreeTable, Database,
};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_PAGES: usize = 50;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);
static CACHE_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_PAGES);

type Key = BTreePageID;

/// The sole gateway to pages.
///
/// Every fetch first acquires the requested lock from the lock
/// manager, so this is also where a transaction blocks and where a
/// timeout surfaces as `TransactionAborted`.
///
/// The cache is bounded: on a miss at capacity the least-recently-
/// used non-dirty page is evicted. Dirty pages are never evicted or
/// written by eviction, because aborting relies on the on-disk
/// version staying clean (NO-STEAL); when every cached page is dirty
/// the fetch fails instead.
pub struct PageCache {
    pub root_pointer_buffer:
        ConcurrentHashMap<Key, Pod<BTreeRootPointerPage>>,
    pub internal_buffer: ConcurrentHashMap<Key, Pod<BTreeInternalPage>>,
    pub leaf_buffer: ConcurrentHashMap<Key, Pod<BTreeLeafPage>>,
    pub header_buffer: ConcurrentHashMap<Key, Pod<BTreeHeaderPage>>,

    // recency stamps of the cached pages, fed by a monotonic clock
    lru: ConcurrentHashMap<Key, u64>,
    lru_clock: AtomicU64,

    // serializes the miss path (load + insert + possible eviction)
    load_lock: Mutex<()>,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            root_pointer_buffer: ConcurrentHashMap::new(),
            internal_buffer: ConcurrentHashMap::new(),
            leaf_buffer: ConcurrentHashMap::new(),
            header_buffer: ConcurrentHashMap::new(),
            lru: ConcurrentHashMap::new(),
            lru_clock: AtomicU64::new(0),
            load_lock: Mutex::new(()),
        }
    }

    pub fn set_page_size(page_size: usize) {
        PAGE_SIZE.store(page_size, Ordering::Relaxed);
    }

    pub fn get_page_size() -> usize {
        PAGE_SIZE.load(Ordering::Relaxed)
    }

    pub fn set_capacity(capacity: usize) {
        CACHE_CAPACITY.store(capacity, Ordering::Relaxed);
    }

    pub fn get_capacity() -> usize {
        CACHE_CAPACITY.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.root_pointer_buffer.clear();
        self.internal_buffer.clear();
        self.leaf_buffer.clear();
        self.header_buffer.clear();
        self.lru.clear();
    }

    pub fn get_root_ptr_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        key: &Key,
    ) -> ResultPod<BTreeRootPointerPage> {
        self.validate_category(key, PageCategory::RootPointer)?;
        self.acquire(tx, perm, key)?;
        let newly_dirty = self.record_write_intent(tx, perm, key);
        self.fetch(&self.root_pointer_buffer, key).map_err(|e| {
            self.revert_write_intent(tx, key, newly_dirty);
            e
        })
    }

    pub fn get_internal_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        key: &Key,
    ) -> ResultPod<BTreeInternalPage> {
        self.validate_category(key, PageCategory::Internal)?;
        self.acquire(tx, perm, key)?;
        let newly_dirty = self.record_write_intent(tx, perm, key);
        self.fetch(&self.internal_buffer, key).map_err(|e| {
            self.revert_write_intent(tx, key, newly_dirty);
            e
        })
    }

    pub fn get_leaf_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        key: &Key,
    ) -> ResultPod<BTreeLeafPage> {
        self.validate_category(key, PageCategory::Leaf)?;
        self.acquire(tx, perm, key)?;
        let newly_dirty = self.record_write_intent(tx, perm, key);
        self.fetch(&self.leaf_buffer, key).map_err(|e| {
            self.revert_write_intent(tx, key, newly_dirty);
            e
        })
    }

    pub fn get_header_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        key: &Key,
    ) -> ResultPod<BTreeHeaderPage> {
        self.validate_category(key, PageCategory::Header)?;
        self.acquire(tx, perm, key)?;
        let newly_dirty = self.record_write_intent(tx, perm, key);
        self.fetch(&self.header_buffer, key).map_err(|e| {
            self.revert_write_intent(tx, key, newly_dirty);
            e
        })
    }

    /// A page requested for a role its category disagrees with is a
    /// corrupted reference, never silently masked.
    fn validate_category(
        &self,
        key: &Key,
        expected: PageCategory,
    ) -> TinyResult {
        if key.category != expected {
            return Err(TinyError::db(&format!(
                "page {} requested as {:?}",
                key, expected,
            )));
        }
        Ok(())
    }

    fn acquire(
        &self,
        tx: &Transaction,
        perm: Permission,
        key: &Key,
    ) -> TinyResult {
        Database::concurrent_status().acquire_lock(tx, &perm.to_lock(), key)
    }

    /// Pages fetched with write intent join the transaction's dirty
    /// set; that set is what commit flushes, what abort discards and
    /// what eviction refuses to touch. The mark is taken before the
    /// page is loaded so the page cannot be evicted in between.
    ///
    /// Returns whether the mark is new, so a failed fetch can revert
    /// it.
    fn record_write_intent(
        &self,
        tx: &Transaction,
        perm: Permission,
        key: &Key,
    ) -> bool {
        if perm != Permission::ReadWrite {
            return false;
        }

        let concurrent_status = Database::concurrent_status();
        if concurrent_status.get_dirty_pages(tx).contains(key) {
            return false;
        }

        concurrent_status.set_dirty_page(tx, key);
        true
    }

    fn revert_write_intent(&self, tx: &Transaction, key: &Key, newly_dirty: bool) {
        if newly_dirty {
            Database::concurrent_status().remove_dirty_page(tx, key);
        }
    }

    fn fetch<PAGE: BTreePage>(
        &self,
        buffer: &ConcurrentHashMap<Key, Pod<PAGE>>,
        key: &Key,
    ) -> ResultPod<PAGE> {
        if let Some(pod) = buffer.get(key) {
            self.touch(key);
            return Ok(pod);
        }

        let _guard = self.load_lock.lock().unwrap();

        // a concurrent fetch may have loaded the page meanwhile
        if let Some(pod) = buffer.get(key) {
            self.touch(key);
            return Ok(pod);
        }

        self.make_room()?;

        let pod = self.load_page(key)?;
        buffer.insert(*key, pod.clone());
        self.touch(key);
        Ok(pod)
    }

    fn touch(&self, key: &Key) {
        let stamp = self.lru_clock.fetch_add(1, Ordering::Relaxed);
        self.lru.insert(*key, stamp);
    }

    pub fn cached_pages_count(&self) -> usize {
        self.root_pointer_buffer.size()
            + self.internal_buffer.size()
            + self.leaf_buffer.size()
            + self.header_buffer.size()
    }

    /// Evict pages until there is room for one more. Scans in
    /// least-recently-used order and drops the first non-dirty page;
    /// a clean page matches its on-disk version, so eviction is a
    /// plain discard.
    fn make_room(&self) -> TinyResult {
        while self.cached_pages_count() >= Self::get_capacity() {
            let victim = {
                let lru = self.lru.get_inner_rl();
                let mut best: Option<(Key, u64)> = None;
                for (pid, stamp) in lru.iter() {
                    if Database::concurrent_status()
                        .dirty_page_tx(pid)
                        .is_some()
                    {
                        continue;
                    }
                    match best {
                        Some((_, s)) if s <= *stamp => {}
                        _ => best = Some((*pid, *stamp)),
                    }
                }
                best.map(|(pid, _)| pid)
            };

            match victim {
                Some(pid) => {
                    debug!("evicting page {:?}", pid);
                    self.discard_page(&pid);
                }
                None => {
                    return Err(TinyError::db("no evictable page"));
                }
            }
        }
        Ok(())
    }

    fn load_page<PAGE: BTreePage>(&self, key: &Key) -> ResultPod<PAGE> {
        // stage 1: get the owning table
        let catalog = Database::catalog();
        let table_pod = catalog.get_table(&key.get_table_id()).ok_or_else(
            || TinyError::db(&format!("table {} not found", key.get_table_id())),
        )?;
        let table = table_pod.rl();

        // stage 2: read the page content from disk
        let buf = self.read_page(&mut table.get_file(), key)?;

        // stage 3: page instantiation
        let page = PAGE::new(key, &buf, &table.schema, table.key_field)?;

        Ok(Arc::new(RwLock::new(page)))
    }

    fn read_page(&self, file: &mut File, key: &Key) -> Result<Vec<u8>, TinyError> {
        let (start_pos, size) = match key.category {
            PageCategory::RootPointer => {
                (0, BTreeRootPointerPage::page_size())
            }
            _ => (
                BTreeRootPointerPage::page_size()
                    + (key.page_index as usize - 1) * Self::get_page_size(),
                Self::get_page_size(),
            ),
        };

        file.seek(SeekFrom::Start(start_pos as u64))
            .map_err(|e| TinyError::db(&format!("seek failed: {}", e)))?;

        let mut buf: Vec<u8> = vec![0; size];
        file.read_exact(&mut buf).map_err(|e| {
            TinyError::db(&format!("read page {:?} failed: {}", key, e))
        })?;
        Ok(buf)
    }

    /// Add a tuple to the specified table on behalf of the
    /// transaction. Every page the operation touches with write
    /// intent is locked, dirtied and cached through this pool, so
    /// later requests see the up-to-date version.
    pub fn insert_tuple(
        &self,
        tx: &Transaction,
        table_id: u32,
        tuple: &Tuple,
    ) -> TinyResult {
        let table_pod = Database::catalog()
            .get_table(&table_id)
            .ok_or_else(|| {
                TinyError::db(&format!("table {} not found", table_id))
            })?;
        let table = table_pod.rl();
        table.insert_tuple(tx, tuple)
    }

    /// Remove the tuple from its table; the owning table is resolved
    /// through the tuple's record id.
    pub fn delete_tuple(
        &self,
        tx: &Transaction,
        tuple: &WrappedTuple,
    ) -> TinyResult {
        let table_id = tuple.get_pid().get_table_id();
        let table_pod = Database::catalog()
            .get_table(&table_id)
            .ok_or_else(|| {
                TinyError::db(&format!("table {} not found", table_id))
            })?;
        let table = table_pod.rl();
        table.delete_tuple(tx, tuple)
    }

    /// Remove the specific page id from the cache without flushing.
    ///
    /// Used on abort to drop a transaction's changes, and by the
    /// B+tree to make sure freed pages leave the cache so they can
    /// be reused safely.
    pub fn discard_page(&self, pid: &BTreePageID) {
        match pid.category {
            PageCategory::RootPointer => {
                self.root_pointer_buffer.remove(pid);
            }
            PageCategory::Internal => {
                self.internal_buffer.remove(pid);
            }
            PageCategory::Leaf => {
                self.leaf_buffer.remove(pid);
            }
            PageCategory::Header => {
                self.header_buffer.remove(pid);
            }
        }
        self.lru.remove(pid);
    }

    /// Finish a transaction.
    ///
    /// On commit, every page the transaction dirtied is flushed to
    /// disk and its dirty mark dropped. On abort the dirty pages are
    /// discarded instead, so a later read re-fetches the clean
    /// on-disk version. Both paths then release all of the
    /// transaction's locks.
    pub fn tx_complete(&self, tx: &Transaction, commit: bool) -> TinyResult {
        let dirty_pages = Database::concurrent_status().get_dirty_pages(tx);

        if commit {
            for pid in dirty_pages {
                self.flush_page(&pid)?;
            }
        } else {
            for pid in dirty_pages {
                self.discard_page(&pid);
            }
        }

        Database::concurrent_status().remove_relation(tx);
        Ok(())
    }

    /// Write all cached pages to disk.
    ///
    /// NB: be careful using this routine, it writes uncommitted
    /// changes as well; it exists for orderly shutdown and tests.
    pub fn flush_all_pages(&self) -> TinyResult {
        for pid in self.all_keys() {
            self.flush_page(&pid)?;
        }
        Ok(())
    }

    /// Write the content of the page to disk. A page that is no
    /// longer cached (e.g. freed by a merge) is skipped.
    pub fn flush_page(&self, pid: &BTreePageID) -> TinyResult {
        let catalog = Database::catalog();
        let table_pod = catalog.get_table(&pid.get_table_id()).ok_or_else(
            || TinyError::db(&format!("table {} not found", pid.get_table_id())),
        )?;
        let table = table_pod.rl();

        match pid.category {
            PageCategory::RootPointer => {
                self.write(&table, pid, &self.root_pointer_buffer)
            }
            PageCategory::Internal => {
                self.write(&table, pid, &self.internal_buffer)
            }
            PageCategory::Leaf => self.write(&table, pid, &self.leaf_buffer),
            PageCategory::Header => {
                self.write(&table, pid, &self.header_buffer)
            }
        }
    }

    fn write<PAGE: BTreePage>(
        &self,
        table: &BTreeTable,
        pid: &BTreePageID,
        buffer: &ConcurrentHashMap<Key, Pod<PAGE>>,
    ) -> TinyResult {
        let pod = match buffer.get(pid) {
            Some(pod) => pod,
            None => {
                debug!("skip flushing uncached page {:?}", pid);
                return Ok(());
            }
        };

        debug!("flushing page {:?}", pid);
        let result = table.write_page_to_disk(pid, &pod.rl().get_page_data());
        result
    }

    fn all_keys(&self) -> Vec<Key> {
        let mut keys = vec![];
        keys.append(&mut self.root_pointer_buffer.keys());
        keys.append(&mut self.internal_buffer.keys());
        keys.append(&mut self.leaf_buffer.keys());
        keys.append(&mut self.header_buffer.keys());
        keys
    }
}
