use crate::{
    btree::{
        page::{BTreeLeafPage, BTreeLeafPageIteratorRc},
        table::table::SearchFor,
    },
    error::TinyError,
    predicate::{Op, Predicate},
    storage::tuple::WrappedTuple,
    transaction::{Permission, Transaction},
    types::Pod,
    utils::HandyRwLock,
    BTreeTable, Database,
};

/// A full scan in key order: starts at the left-most leaf and
/// follows the right-sibling pointers, acquiring every leaf with
/// read permission. Iterating from the back follows the left-sibling
/// pointers instead.
///
/// Page fetches may fail mid-scan (a lock timeout surfaces as
/// `TransactionAborted`), so the real stepping api is the fallible
/// `try_next`/`try_next_back` pair. The `Iterator` impl is a
/// convenience on top: it stops on failure and parks the error in
/// `error()` so the caller can still roll the transaction back.
pub struct BTreeTableIterator<'t> {
    tx: &'t Transaction,

    page_rc: Pod<BTreeLeafPage>,
    last_page_rc: Pod<BTreeLeafPage>,
    page_it: BTreeLeafPageIteratorRc,
    last_page_it: BTreeLeafPageIteratorRc,

    error: Option<TinyError>,
}

impl<'t> BTreeTableIterator<'t> {
    pub fn new(
        tx: &'t Transaction,
        table: &BTreeTable,
    ) -> Result<Self, TinyError> {
        let page_rc = table.get_first_page(tx, Permission::ReadOnly)?;
        let last_page_rc = table.get_last_page(tx, Permission::ReadOnly)?;

        Ok(Self {
            tx,
            page_rc: page_rc.clone(),
            last_page_rc: last_page_rc.clone(),
            page_it: BTreeLeafPageIteratorRc::new(page_rc),
            last_page_it: BTreeLeafPageIteratorRc::new(last_page_rc),
            error: None,
        })
    }

    pub fn try_next(&mut self) -> Result<Option<WrappedTuple>, TinyError> {
        let v = self.page_it.next();
        if v.is_some() {
            return Ok(v);
        }

        let right = self.page_rc.rl().get_right_pid();
        match right {
            Some(right) => {
                let sibling_rc = Database::page_cache().get_leaf_page(
                    self.tx,
                    Permission::ReadOnly,
                    &right,
                )?;

                self.page_rc = sibling_rc.clone();
                self.page_it = BTreeLeafPageIteratorRc::new(sibling_rc);
                Ok(self.page_it.next())
            }
            None => Ok(None),
        }
    }

    pub fn try_next_back(&mut self) -> Result<Option<WrappedTuple>, TinyError> {
        let v = self.last_page_it.next_back();
        if v.is_some() {
            return Ok(v);
        }

        let left = self.last_page_rc.rl().get_left_pid();
        match left {
            Some(left) => {
                let sibling_rc = Database::page_cache().get_leaf_page(
                    self.tx,
                    Permission::ReadOnly,
                    &left,
                )?;

                self.last_page_rc = sibling_rc.clone();
                self.last_page_it = BTreeLeafPageIteratorRc::new(sibling_rc);
                Ok(self.last_page_it.next_back())
            }
            None => Ok(None),
        }
    }

    /// The failure that ended the iteration early, if any. An
    /// aborted scan must be completed with `commit = false` by its
    /// owner.
    pub fn error(&self) -> Option<&TinyError> {
        self.error.as_ref()
    }
}

impl Iterator for BTreeTableIterator<'_> {
    type Item = WrappedTuple;

    fn next(&mut self) -> Option<Self::Item> {
        match self.try_next() {
            Ok(v) => v,
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }
}

impl DoubleEndedIterator for BTreeTableIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        match self.try_next_back() {
            Ok(v) => v,
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }
}

/// An index scan seeded by the predicate: `=`, `>` and `>=` start at
/// the leaf possibly containing the key, the other operators at the
/// left-most leaf. The scan terminates early once no subsequent
/// tuple can satisfy the predicate.
///
/// As with `BTreeTableIterator`, `try_next` is the fallible stepping
/// api and the `Iterator` impl parks failures in `error()`.
pub struct BTreeTableSearchIterator<'t> {
    tx: &'t Transaction,

    current_page_rc: Pod<BTreeLeafPage>,
    page_it: BTreeLeafPageIteratorRc,
    predicate: Predicate,
    key_field: usize,

    error: Option<TinyError>,
}

impl<'t> BTreeTableSearchIterator<'t> {
    pub fn new(
        tx: &'t Transaction,
        table: &BTreeTable,
        index_predicate: &Predicate,
    ) -> Result<Self, TinyError> {
        let root_pid = table.get_root_pid(tx)?;

        let start_rc = match index_predicate.op {
            Op::Equals | Op::GreaterThan | Op::GreaterThanOrEq => table
                .find_leaf_page(
                    tx,
                    Permission::ReadOnly,
                    root_pid,
                    &SearchFor::Target(index_predicate.cell.clone()),
                )?,
            Op::NotEquals | Op::LessThan | Op::LessThanOrEq => table
                .find_leaf_page(
                    tx,
                    Permission::ReadOnly,
                    root_pid,
                    &SearchFor::LeftMost,
                )?,
        };

        Ok(Self {
            tx,
            current_page_rc: start_rc.clone(),
            page_it: BTreeLeafPageIteratorRc::new(start_rc),
            predicate: index_predicate.clone(),
            key_field: table.key_field,
            error: None,
        })
    }

    pub fn try_next(&mut self) -> Result<Option<WrappedTuple>, TinyError> {
        loop {
            let tuple = self.page_it.next();
            match tuple {
                Some(t) => {
                    let field = t.get_cell(self.key_field);
                    match self.predicate.op {
                        Op::Equals => {
                            if field == self.predicate.cell {
                                return Ok(Some(t));
                            }
                            if field > self.predicate.cell {
                                // the key has passed the bound, no
                                // further tuple can match
                                return Ok(None);
                            }
                        }
                        Op::LessThan | Op::LessThanOrEq => {
                            if self.predicate.matches(&field) {
                                return Ok(Some(t));
                            }
                            return Ok(None);
                        }
                        _ => {
                            if self.predicate.matches(&field) {
                                return Ok(Some(t));
                            }
                        }
                    }
                }
                None => {
                    // this page is exhausted, continue on the right
                    // sibling
                    let right = self.current_page_rc.rl().get_right_pid();
                    match right {
                        Some(pid) => {
                            let rc = Database::page_cache().get_leaf_page(
                                self.tx,
                                Permission::ReadOnly,
                                &pid,
                            )?;
                            self.current_page_rc = rc.clone();
                            self.page_it = BTreeLeafPageIteratorRc::new(rc);
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// The failure that ended the iteration early, if any.
    pub fn error(&self) -> Option<&TinyError> {
        self.error.as_ref()
    }
}

impl Iterator for BTreeTableSearchIterator<'_> {
    type Item = WrappedTuple;

    fn next(&mut self) -> Option<Self::Item> {
        match self.try_next() {
            Ok(v) => v,
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }
}
