use std::{
    mem,
    sync::{Arc, Once, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use super::Catalog;
use crate::{
    btree::page_cache::PageCache, transaction::ConcurrentStatus, types::Pod,
    utils::HandyRwLock,
};

/// We collect all process-wide state here.
///
/// These variables cannot be initialized as static variables, because
/// their initialization functions all rely on non-const fn (e.g.
/// `HashMap::new()`).
///
/// The page cache and the lock manager handle their own internal
/// synchronization, so they are handed out as plain references and
/// never block each other's callers.
pub struct Database {
    page_cache: PageCache,
    concurrent_status: ConcurrentStatus,
    catalog: Pod<Catalog>,
}

static mut SINGLETON: *mut Database = 0 as *mut Database;
static ONCE: Once = Once::new();

impl Database {
    fn new() -> Self {
        Self {
            page_cache: PageCache::new(),
            concurrent_status: ConcurrentStatus::new(),
            catalog: Arc::new(RwLock::new(Catalog::new())),
        }
    }

    /// Reset the in-memory state of the database, used by tests.
    ///
    /// The page cache is rebuilt (honoring the currently configured
    /// capacity and page size), the catalog emptied and all lock
    /// state dropped. Files on disk keep their content.
    pub fn reset() {
        // make sure the singleton exists before replacing it
        Self::global();

        let singleton = Self::new();

        unsafe {
            if !SINGLETON.is_null() {
                mem::drop(Box::from_raw(SINGLETON));
            }

            SINGLETON = mem::transmute(Box::new(singleton));
        }
    }

    pub fn page_cache() -> &'static PageCache {
        &Self::global().page_cache
    }

    pub fn concurrent_status() -> &'static ConcurrentStatus {
        &Self::global().concurrent_status
    }

    pub fn catalog() -> RwLockReadGuard<'static, Catalog> {
        Self::global().catalog.rl()
    }

    pub fn mut_catalog() -> RwLockWriteGuard<'static, Catalog> {
        Self::global().catalog.wl()
    }

    pub fn global() -> &'static Self {
        ONCE.call_once(|| {
            let singleton = Self::new();

            unsafe {
                // Put it in the heap so it can outlive this call
                SINGLETON = mem::transmute(Box::new(singleton));
            }
        });

        unsafe { SINGLETON.as_ref().unwrap() }
    }
}
