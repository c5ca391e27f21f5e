use std::{error::Error, fmt};

use backtrace::Backtrace;

/// The two failure kinds the engine distinguishes.
///
/// `TransactionAborted` is a signal, not a fault: a lock acquisition
/// timed out and the owner is expected to complete the transaction
/// with `commit = false`. It is never retried inside the engine.
///
/// `Db` covers logical and disk-state errors (corrupted page
/// category, deleting a tuple that does not exist, no evictable
/// page, io failures). These propagate to the caller unchanged.
pub enum TinyError {
    TransactionAborted,
    Db {
        details: String,
        backtrace: Backtrace,
    },
}

impl TinyError {
    pub fn db(msg: &str) -> Self {
        TinyError::Db {
            details: msg.to_string(),
            backtrace: Backtrace::new(),
        }
    }

    pub fn is_abort(&self) -> bool {
        match self {
            TinyError::TransactionAborted => true,
            TinyError::Db { .. } => false,
        }
    }

    pub fn show_backtrace(&self) {
        if let TinyError::Db { backtrace, .. } = self {
            eprintln!("{:?}", backtrace);
        }
    }
}

impl fmt::Display for TinyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TinyError::TransactionAborted => {
                write!(f, "transaction aborted")
            }
            TinyError::Db { details, .. } => {
                write!(f, "{}", details)
            }
        }
    }
}

impl fmt::Debug for TinyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Error for TinyError {}
