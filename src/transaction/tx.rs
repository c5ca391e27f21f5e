use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{types::TinyResult, Database};

pub type TransactionID = u64;

static TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Transaction {
    // increase monotonically by 1
    id: TransactionID,
}

impl Transaction {
    pub fn new() -> Self {
        let id = TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        Self { id }
    }

    pub fn commit(&self) -> TinyResult {
        self.complete(true)
    }

    pub fn abort(&self) -> TinyResult {
        self.complete(false)
    }

    /// Finish the transaction.
    ///
    /// On commit, all pages dirtied by this transaction are flushed
    /// to disk; on abort they are discarded from the cache so a later
    /// read re-fetches the clean on-disk version. Either way every
    /// lock held by the transaction is released afterwards, and only
    /// here (strict two-phase locking).
    fn complete(&self, commit: bool) -> TinyResult {
        Database::page_cache().tx_complete(self, commit)
    }

    pub fn get_id(&self) -> TransactionID {
        self.id
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
