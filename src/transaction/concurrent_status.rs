use core::fmt;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    thread::sleep,
    time::{Duration, Instant},
};

use log::debug;
use rand::Rng;

use crate::{
    btree::page::BTreePageID,
    error::TinyError,
    transaction::Transaction,
    types::{ConcurrentHashMap, TinyResult},
};

/// Timeout of a lock acquisition, in milliseconds. A waiting
/// acquisition fails with `TransactionAborted` once it expires.
static TIMEOUT_MS: AtomicU64 = AtomicU64::new(500);

/// Upper bound of the random addition to the timeout. The jitter
/// keeps two transactions waiting on each other from aborting at the
/// same instant, so one of them survives.
static JITTER_MS: u64 = 100;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Lock {
    SLock,
    XLock,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn to_lock(&self) -> Lock {
        match self {
            Permission::ReadOnly => Lock::SLock,
            Permission::ReadWrite => Lock::XLock,
        }
    }
}

/// The page-granularity lock manager.
///
/// Tracks, per page, the set of shared holders and the exclusive
/// holder, plus per-transaction views: the pages a transaction holds
/// any lock on, and the pages it has touched with write intent (its
/// dirty set). The dirty set is what the page cache consults for
/// NO-STEAL eviction and for commit/abort processing.
pub struct ConcurrentStatus {
    s_lock_map: ConcurrentHashMap<BTreePageID, HashSet<Transaction>>,
    x_lock_map: ConcurrentHashMap<BTreePageID, Transaction>,
    hold_pages: ConcurrentHashMap<Transaction, HashSet<BTreePageID>>,
    dirty_pages: ConcurrentHashMap<Transaction, HashSet<BTreePageID>>,

    // Lock state transitions consult several maps at once, so they
    // are serialized through this mutex while lookups stay
    // concurrent.
    modification_lock: Mutex<()>,
}

impl ConcurrentStatus {
    pub fn new() -> Self {
        Self {
            s_lock_map: ConcurrentHashMap::new(),
            x_lock_map: ConcurrentHashMap::new(),
            hold_pages: ConcurrentHashMap::new(),
            dirty_pages: ConcurrentHashMap::new(),
            modification_lock: Mutex::new(()),
        }
    }

    pub fn set_timeout(millis: u64) {
        TIMEOUT_MS.store(millis, Ordering::Relaxed);
    }

    fn acquisition_timeout() -> Duration {
        let jitter = rand::thread_rng().gen_range(0, JITTER_MS);
        Duration::from_millis(TIMEOUT_MS.load(Ordering::Relaxed) + jitter)
    }

    /// Request a lock on the given page. This api is blocking: it
    /// polls until the lock is granted or the (jittered) timeout
    /// expires, in which case the request fails with
    /// `TransactionAborted` and the caller is expected to roll the
    /// transaction back.
    pub fn acquire_lock(
        &self,
        tx: &Transaction,
        lock: &Lock,
        page_id: &BTreePageID,
    ) -> TinyResult {
        let timeout = Self::acquisition_timeout();
        let start_time = Instant::now();

        while Instant::now().duration_since(start_time) < timeout {
            if self.add_lock(tx, lock, page_id) {
                return Ok(());
            }

            sleep(POLL_INTERVAL);
        }

        debug!(
            "acquire lock timeout, tx: {}, lock: {:?}, page_id: {:?}, concurrent status: {:?}",
            tx, lock, page_id, self,
        );
        Err(TinyError::TransactionAborted)
    }

    // Try to add a lock to the given page. This api is idempotent
    // and never blocks.
    //
    // Grant rules:
    // - A transaction already holding the exclusive lock is granted
    //   anything.
    // - A shared request is granted unless another transaction holds
    //   the exclusive lock.
    // - An exclusive request by the sole shared holder upgrades the
    //   lock in place. With other readers present the requester
    //   waits like any other writer.
    //
    // # Return
    //
    // Whether the lock was granted.
    fn add_lock(
        &self,
        tx: &Transaction,
        lock: &Lock,
        page_id: &BTreePageID,
    ) -> bool {
        let _guard = self.modification_lock.lock().unwrap();

        if let Some(x_holder) = self.x_lock_map.get(page_id) {
            // the exclusive holder needs no further bookkeeping
            return &x_holder == tx;
        }

        match lock {
            Lock::SLock => {
                self.s_lock_map.alter_value(page_id, |holders| {
                    holders.insert(*tx);
                });
            }
            Lock::XLock => {
                if let Some(s_holders) = self.s_lock_map.get(page_id) {
                    if s_holders.contains(tx) {
                        if s_holders.len() > 1 {
                            // upgrade needs the requester to be the
                            // sole reader
                            return false;
                        }
                        self.s_lock_map.remove(page_id);
                    } else if !s_holders.is_empty() {
                        return false;
                    }
                }

                self.x_lock_map.insert(*page_id, *tx);
            }
        }

        self.hold_pages.alter_value(tx, |pages| {
            pages.insert(*page_id);
        });
        true
    }

    /// Remove whatever lock `tx` holds on this page.
    pub fn release_lock(
        &self,
        tx: &Transaction,
        page_id: &BTreePageID,
    ) -> TinyResult {
        let _guard = self.modification_lock.lock().unwrap();
        self.release_lock_inner(tx, page_id)
    }

    fn release_lock_inner(
        &self,
        tx: &Transaction,
        page_id: &BTreePageID,
    ) -> TinyResult {
        {
            let mut s_lock_map = self.s_lock_map.get_inner_wl();
            if let Some(holders) = s_lock_map.get_mut(page_id) {
                holders.remove(tx);
                if holders.is_empty() {
                    s_lock_map.remove(page_id);
                }
            }
        }

        {
            let mut x_lock_map = self.x_lock_map.get_inner_wl();
            if let Some(holder) = x_lock_map.get(page_id) {
                if holder == tx {
                    x_lock_map.remove(page_id);
                }
            }
        }

        self.hold_pages.alter_value(tx, |pages| {
            pages.remove(page_id);
        });
        Ok(())
    }

    /// Remove the relation between the transaction and its related
    /// pages: the dirty set and every page lock it holds.
    pub fn remove_relation(&self, tx: &Transaction) {
        self.dirty_pages.remove(tx);
        self.release_all(tx).unwrap_or_default();
    }

    fn release_all(&self, tx: &Transaction) -> TinyResult {
        let _guard = self.modification_lock.lock().unwrap();

        if let Some(pages) = self.hold_pages.get(tx) {
            for page_id in pages {
                self.release_lock_inner(tx, &page_id)?;
            }
        }

        self.hold_pages.remove(tx);
        Ok(())
    }

    pub fn holds_lock(&self, tx: &Transaction, page_id: &BTreePageID) -> bool {
        self.lock_mode(tx, page_id).is_some()
    }

    /// The lock mode `tx` holds on the page, if any.
    pub fn lock_mode(
        &self,
        tx: &Transaction,
        page_id: &BTreePageID,
    ) -> Option<Lock> {
        if let Some(holder) = self.x_lock_map.get(page_id) {
            if &holder == tx {
                return Some(Lock::XLock);
            }
        }

        if let Some(holders) = self.s_lock_map.get(page_id) {
            if holders.contains(tx) {
                return Some(Lock::SLock);
            }
        }

        None
    }

    /// The set of pages on which `tx` holds any lock.
    pub fn hold_pages(&self, tx: &Transaction) -> HashSet<BTreePageID> {
        self.hold_pages.get(tx).unwrap_or_default()
    }

    pub fn set_dirty_page(&self, tx: &Transaction, page_id: &BTreePageID) {
        self.dirty_pages.alter_value(tx, |pages| {
            pages.insert(*page_id);
        });
    }

    pub fn get_dirty_pages(&self, tx: &Transaction) -> HashSet<BTreePageID> {
        self.dirty_pages.get(tx).unwrap_or_default()
    }

    pub fn remove_dirty_page(&self, tx: &Transaction, page_id: &BTreePageID) {
        self.dirty_pages.alter_value(tx, |pages| {
            pages.remove(page_id);
        });
    }

    /// Get the transaction that dirtied the page, return None if the
    /// page is not dirty.
    pub fn dirty_page_tx(&self, page_id: &BTreePageID) -> Option<Transaction> {
        for (tx, pages) in self.dirty_pages.get_inner_rl().iter() {
            if pages.contains(page_id) {
                return Some(*tx);
            }
        }

        None
    }

    pub fn clear(&self) {
        self.s_lock_map.clear();
        self.x_lock_map.clear();
        self.hold_pages.clear();
        self.dirty_pages.clear();
    }
}

impl fmt::Display for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut depiction = "\n".to_string();

        depiction.push_str("s_lock_map: {");
        for (k, v) in self.s_lock_map.get_inner_rl().iter() {
            depiction.push_str(&format!("\n\t{:?} -> [", k.get_short_repr()));
            for tx in v {
                depiction.push_str(&format!("{:?}, ", tx));
            }
            depiction.push_str("]");
        }
        depiction.push_str("\n}\n");

        depiction.push_str("x_lock_map: {");
        for (k, v) in self.x_lock_map.get_inner_rl().iter() {
            depiction
                .push_str(&format!("\n\t{:?} -> {:?}, ", k.get_short_repr(), v));
        }
        depiction.push_str("\n}\n");

        depiction.push_str("dirty_pages: {");
        for (k, v) in self.dirty_pages.get_inner_rl().iter() {
            depiction.push_str(&format!("\n\t{:?} -> [", k));
            for page_id in v {
                depiction.push_str(&format!("{:?}, ", page_id.get_short_repr()));
            }
            depiction.push_str("]");
        }
        depiction.push_str("\n}\n");

        write!(f, "{}", depiction)
    }
}

impl fmt::Debug for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::page::PageCategory;

    fn page(index: u32) -> BTreePageID {
        BTreePageID::new(PageCategory::Leaf, 42, index)
    }

    #[test]
    fn test_shared_locks_coexist() {
        let status = ConcurrentStatus::new();
        let a = Transaction::new();
        let b = Transaction::new();

        assert!(status.add_lock(&a, &Lock::SLock, &page(1)));
        assert!(status.add_lock(&b, &Lock::SLock, &page(1)));
        assert_eq!(status.lock_mode(&a, &page(1)), Some(Lock::SLock));
        assert_eq!(status.lock_mode(&b, &page(1)), Some(Lock::SLock));
    }

    #[test]
    fn test_upgrade_requires_sole_reader() {
        let status = ConcurrentStatus::new();
        let a = Transaction::new();
        let b = Transaction::new();

        assert!(status.add_lock(&a, &Lock::SLock, &page(1)));
        assert!(status.add_lock(&b, &Lock::SLock, &page(1)));

        // two readers, no upgrade for either
        assert!(!status.add_lock(&a, &Lock::XLock, &page(1)));
        assert!(!status.add_lock(&b, &Lock::XLock, &page(1)));

        // after b leaves, a is the sole reader and upgrades
        status.release_lock(&b, &page(1)).unwrap();
        assert!(status.add_lock(&a, &Lock::XLock, &page(1)));
        assert_eq!(status.lock_mode(&a, &page(1)), Some(Lock::XLock));
    }

    #[test]
    fn test_exclusive_holder_blocks_others() {
        let status = ConcurrentStatus::new();
        let a = Transaction::new();
        let b = Transaction::new();

        assert!(status.add_lock(&a, &Lock::XLock, &page(1)));

        // idempotent for the holder, denied for everyone else
        assert!(status.add_lock(&a, &Lock::XLock, &page(1)));
        assert!(status.add_lock(&a, &Lock::SLock, &page(1)));
        assert!(!status.add_lock(&b, &Lock::SLock, &page(1)));
        assert!(!status.add_lock(&b, &Lock::XLock, &page(1)));
    }

    #[test]
    fn test_release_all() {
        let status = ConcurrentStatus::new();
        let a = Transaction::new();

        assert!(status.add_lock(&a, &Lock::SLock, &page(1)));
        assert!(status.add_lock(&a, &Lock::XLock, &page(2)));
        assert_eq!(status.hold_pages(&a).len(), 2);

        status.remove_relation(&a);
        assert_eq!(status.hold_pages(&a).len(), 0);
        assert!(!status.holds_lock(&a, &page(1)));
        assert!(!status.holds_lock(&a, &page(2)));
    }
}
