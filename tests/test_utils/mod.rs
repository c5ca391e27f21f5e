#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, Once, RwLock},
};

use log::debug;
use rand::Rng;
use tiny_db::{
    btree::{
        page::{
            BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage,
            BTreeLeafPageIterator, BTreePage, BTreePageID, Entry,
            PageCategory,
        },
        page_cache::{PageCache, DEFAULT_PAGE_SIZE},
        table::{BTreeTableIterator, BTreeTableSearchIterator},
    },
    storage::{
        schema::TableSchema,
        tuple::{Cell, Tuple},
    },
    transaction::{ConcurrentStatus, Permission, Transaction},
    types::Pod,
    utils::{self, HandyRwLock},
    BTreeTable, Database, Op, Predicate,
};

pub const TEST_DB: &str = "btree.db";

// The tests of one binary share the process-wide database state, so
// they take turns.
static TEST_LOCK: Mutex<()> = Mutex::new(());
static INIT: Once = Once::new();

/// Conduct the initialization:
///
/// - set up log configuration
/// - reset the page size, cache capacity and lock timeout
/// - rebuild the database (page cache, catalog, lock manager)
///
/// Returns a guard serializing the tests of this binary.
pub fn setup() -> MutexGuard<'static, ()> {
    INIT.call_once(utils::init_log);

    let guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    PageCache::set_page_size(DEFAULT_PAGE_SIZE);
    // plenty of room for the bulk constructions below; the eviction
    // tests lower it themselves
    PageCache::set_capacity(2048);
    ConcurrentStatus::set_timeout(500);

    Database::reset();

    guard
}

#[derive(Clone, Copy, Debug)]
pub enum TreeLayout {
    Naturally,
    EvenlyDistributed,
    LastTwoEvenlyDistributed,
}

pub fn new_int_tuples(value: i64, width: usize) -> Tuple {
    Tuple::new_int_tuples(value, width)
}

pub fn leaf_records_cap() -> usize {
    let schema = TableSchema::small_int_schema(2);
    BTreeLeafPage::calculate_slots_count(&schema)
}

pub fn internal_children_cap() -> usize {
    let key_size = 8;
    BTreeInternalPage::get_max_entries(key_size) + 1
}

pub fn new_empty_btree_table(path: &str, columns: usize) -> Pod<BTreeTable> {
    let schema = TableSchema::small_int_schema(columns);
    let table_rc = Arc::new(RwLock::new(BTreeTable::new(path, 0, &schema)));
    Database::mut_catalog().add_table(Arc::clone(&table_rc));
    table_rc
}

/// Create a table with the given number of rows and columns, filled
/// with random data sorted on the key field.
///
/// # Arguments:
///
/// - int_tuples: a reference used to return all inserted data. Only
///   works when it is not None.
pub fn new_random_btree_table(
    columns: usize,
    rows: usize,
    int_tuples: Option<&mut Vec<Vec<i64>>>,
    key_field: usize,
    tree_layout: TreeLayout,
) -> Pod<BTreeTable> {
    let schema = TableSchema::small_int_schema(columns);
    let table_rc = Arc::new(RwLock::new(BTreeTable::new(
        TEST_DB, key_field, &schema,
    )));
    Database::mut_catalog().add_table(Arc::clone(&table_rc));

    let mut rng = rand::thread_rng();
    let mut tuples: Vec<Tuple> = Vec::new();
    for _ in 0..rows {
        let insert_value = rng.gen_range(i64::MIN, i64::MAX);
        tuples.push(Tuple::new_int_tuples(insert_value, columns));
    }

    tuples.sort_by(|a, b| a.get_cell(key_field).cmp(&b.get_cell(key_field)));

    if let Some(int_tuples) = int_tuples {
        for t in tuples.iter() {
            let mut row = Vec::new();
            for i in 0..columns {
                match t.get_cell(i) {
                    Cell::Int64(v) => row.push(v),
                    _ => unreachable!(),
                }
            }
            int_tuples.push(row);
        }
    }

    let write_tx = Transaction::new();

    // hold the table
    {
        let table = table_rc.rl();
        match tree_layout {
            TreeLayout::Naturally => {
                for t in tuples.iter() {
                    table.insert_tuple(&write_tx, t).unwrap();
                }
            }
            TreeLayout::EvenlyDistributed
            | TreeLayout::LastTwoEvenlyDistributed => {
                let page_index = sequential_insert_into_table(
                    &write_tx,
                    &table,
                    &tuples,
                    tree_layout,
                );
                table.set_page_index(page_index);
            }
        }
    }
    // release the table

    write_tx.commit().unwrap();
    debug!("table construction finished, {} rows in total", rows);

    table_rc
}

/// Write the table pages directly, bottom up, so every page holds
/// the exact number of records its bucket prescribes.
fn sequential_insert_into_table(
    tx: &Transaction,
    table: &BTreeTable,
    tuples: &[Tuple],
    tree_layout: TreeLayout,
) -> u32 {
    if tuples.is_empty() {
        return 1;
    }

    struct NodeInfo {
        pid: BTreePageID,
        min_key: Cell,
    }

    // stage 1: write the leaf pages
    let leaf_buckets =
        get_buckets(tuples.len(), leaf_records_cap(), tree_layout);

    let mut page_index = 0;
    let mut tuple_index = 0;
    let mut level: Vec<NodeInfo> = Vec::new();

    for (i, tuple_count) in leaf_buckets.iter().enumerate() {
        page_index += 1;
        let pid = BTreePageID::new(
            PageCategory::Leaf,
            table.get_id(),
            page_index,
        );
        table.write_empty_page_to_disk(&pid).unwrap();

        let leaf_rc = Database::page_cache()
            .get_leaf_page(tx, Permission::ReadWrite, &pid)
            .unwrap();

        // hold the leaf page
        {
            let mut leaf = leaf_rc.wl();
            for _ in 0..*tuple_count {
                leaf.insert_tuple(&tuples[tuple_index]).unwrap();
                tuple_index += 1;
            }

            // chain the siblings by their page indexes
            if i > 0 {
                leaf.set_left_pid(Some(BTreePageID::new(
                    PageCategory::Leaf,
                    table.get_id(),
                    page_index - 1,
                )));
            }
            if i < leaf_buckets.len() - 1 {
                leaf.set_right_pid(Some(BTreePageID::new(
                    PageCategory::Leaf,
                    table.get_id(),
                    page_index + 1,
                )));
            }
        }
        // release the leaf page

        let min_key = {
            let page = leaf_rc.rl();
            BTreeLeafPageIterator::new(&page)
                .next()
                .unwrap()
                .get_cell(table.key_field)
        };
        level.push(NodeInfo { pid, min_key });
    }

    if level.len() == 1 {
        table.set_root_pid(tx, &level[0].pid).unwrap();
        return page_index;
    }

    // stage 2: write internal levels until a single page remains,
    // which becomes the root
    while level.len() > 1 {
        let buckets =
            get_buckets(level.len(), internal_children_cap(), tree_layout);

        let mut next_level: Vec<NodeInfo> = Vec::new();
        let mut child_index = 0;

        for children_count in buckets {
            page_index += 1;
            let pid = BTreePageID::new(
                PageCategory::Internal,
                table.get_id(),
                page_index,
            );
            table.write_empty_page_to_disk(&pid).unwrap();

            let internal_rc = Database::page_cache()
                .get_internal_page(tx, Permission::ReadWrite, &pid)
                .unwrap();

            let children = &level[child_index..child_index + children_count];
            child_index += children_count;

            // hold the internal page
            {
                let mut internal = internal_rc.wl();
                for pair in children.windows(2) {
                    let entry = Entry::new(
                        &pair[1].min_key,
                        &pair[0].pid,
                        &pair[1].pid,
                    );
                    internal.insert_entry(&entry).unwrap();
                }
            }
            // release the internal page

            for child in children {
                set_parent(tx, &child.pid, &pid);
            }

            next_level.push(NodeInfo {
                pid,
                min_key: children[0].min_key.clone(),
            });
        }

        level = next_level;
    }

    table.set_root_pid(tx, &level[0].pid).unwrap();
    page_index
}

fn set_parent(tx: &Transaction, child_pid: &BTreePageID, parent_pid: &BTreePageID) {
    match child_pid.category {
        PageCategory::Leaf => {
            let rc = Database::page_cache()
                .get_leaf_page(tx, Permission::ReadWrite, child_pid)
                .unwrap();
            rc.wl().set_parent_pid(parent_pid);
        }
        PageCategory::Internal => {
            let rc = Database::page_cache()
                .get_internal_page(tx, Permission::ReadWrite, child_pid)
                .unwrap();
            rc.wl().set_parent_pid(parent_pid);
        }
        _ => unreachable!(),
    }
}

/// Distribute `element_count` items over pages holding at most
/// `capacity` each, according to the layout.
fn get_buckets(
    element_count: usize,
    capacity: usize,
    layout: TreeLayout,
) -> Vec<usize> {
    if element_count <= capacity {
        return vec![element_count];
    }

    match layout {
        TreeLayout::Naturally | TreeLayout::EvenlyDistributed => {
            let page_count = (element_count + capacity - 1) / capacity;
            let base = element_count / page_count;
            let rem = element_count % page_count;

            let mut buckets = vec![base + 1; rem];
            buckets.append(&mut vec![base; page_count - rem]);
            buckets
        }
        TreeLayout::LastTwoEvenlyDistributed => {
            let full_pages = element_count / capacity;
            let rem = element_count % capacity;

            if rem == 0 {
                return vec![capacity; full_pages];
            }

            // keep every page full except the last two, which share
            // the remainder of the last full page
            let mut buckets = vec![capacity; full_pages - 1];
            let tail = capacity + rem;
            buckets.push(tail / 2);
            buckets.push(tail - tail / 2);
            buckets
        }
    }
}

/// Fetch an internal page by its level below the root (0 is the
/// root) and its position within that level.
pub fn get_internal_page(
    table: &BTreeTable,
    level: usize,
    index: usize,
) -> Pod<BTreeInternalPage> {
    let tx = Transaction::new();
    let pid = page_at(table, &tx, level, index);
    let pod = Database::page_cache()
        .get_internal_page(&tx, Permission::ReadOnly, &pid)
        .unwrap();
    tx.commit().unwrap();
    pod
}

/// Fetch a leaf page by its level below the root and its position
/// within that level.
pub fn get_leaf_page(
    table: &BTreeTable,
    level: usize,
    index: usize,
) -> Pod<BTreeLeafPage> {
    let tx = Transaction::new();
    let pid = page_at(table, &tx, level, index);
    let pod = Database::page_cache()
        .get_leaf_page(&tx, Permission::ReadOnly, &pid)
        .unwrap();
    tx.commit().unwrap();
    pod
}

fn page_at(
    table: &BTreeTable,
    tx: &Transaction,
    level: usize,
    index: usize,
) -> BTreePageID {
    let mut pids = vec![table.get_root_pid(tx).unwrap()];

    for _ in 0..level {
        let mut next = Vec::new();
        for pid in &pids {
            let pod = Database::page_cache()
                .get_internal_page(tx, Permission::ReadOnly, pid)
                .unwrap();
            next.append(&mut pod.rl().get_children());
        }
        pids = next;
    }

    pids[index]
}

/// Insert `count` sequential tuples, larger than every key already
/// in the table.
pub fn insert_tuples(table: &BTreeTable, count: usize) {
    let tx = Transaction::new();

    let mut it = BTreeTableIterator::new(&tx, table).unwrap();
    let start = it.try_next_back().unwrap().map_or(0, |t| {
        match t.get_cell(table.key_field) {
            Cell::Int64(v) => v + 1,
            _ => unreachable!(),
        }
    });

    for i in 0..count {
        let tuple = Tuple::new_int_tuples(start + i as i64, 2);
        table.insert_tuple(&tx, &tuple).unwrap();
    }
    tx.commit().unwrap();
}

/// Delete the `count` smallest tuples.
pub fn delete_tuples(table: &BTreeTable, count: usize) {
    let tx = Transaction::new();
    for _ in 0..count {
        let mut it = BTreeTableIterator::new(&tx, table).unwrap();
        let tuple = it.try_next().unwrap().unwrap();
        table.delete_tuple(&tx, &tuple).unwrap();
    }
    tx.commit().unwrap();
}

/// The number of tuples matching the key exactly.
pub fn search_key(table: &BTreeTable, tx: &Transaction, key: &Cell) -> usize {
    let predicate = Predicate::new(table.key_field, Op::Equals, key);
    let mut it = BTreeTableSearchIterator::new(tx, table, &predicate).unwrap();

    let mut count = 0;
    while it.try_next().unwrap().is_some() {
        count += 1;
    }
    count
}

/// The data page indexes recorded as free in the header chain.
pub fn free_page_indexes(table: &BTreeTable) -> HashSet<u32> {
    let tx = Transaction::new();
    let root_ptr_rc = table
        .get_root_ptr_page(&tx, Permission::ReadOnly)
        .unwrap();
    let mut header_pid = root_ptr_rc.rl().get_header_pid();

    let slots = BTreeHeaderPage::calculate_slots_count() as u32;
    let mut base = 0;
    let mut result = HashSet::new();

    while let Some(pid) = header_pid {
        let header_rc = Database::page_cache()
            .get_header_page(&tx, Permission::ReadOnly, &pid)
            .unwrap();

        let header = header_rc.rl();
        for i in 0..slots {
            if !header.is_slot_used(i as usize) {
                result.insert(base + i + 1);
            }
        }

        header_pid = header.get_next_pid();
        base += slots;
    }

    tx.commit().unwrap();
    result
}

/// The page indexes of the header pages themselves.
pub fn header_page_indexes(table: &BTreeTable) -> HashSet<u32> {
    let tx = Transaction::new();
    let root_ptr_rc = table
        .get_root_ptr_page(&tx, Permission::ReadOnly)
        .unwrap();
    let mut header_pid = root_ptr_rc.rl().get_header_pid();

    let mut result = HashSet::new();
    while let Some(pid) = header_pid {
        result.insert(pid.page_index);
        let header_rc = Database::page_cache()
            .get_header_page(&tx, Permission::ReadOnly, &pid)
            .unwrap();
        header_pid = header_rc.rl().get_next_pid();
    }

    tx.commit().unwrap();
    result
}

pub fn assert_true(predicate: bool, table: &BTreeTable) {
    if !predicate {
        log::error!("assertion failed, debug info:");
        table.draw_tree(-1);
        panic!("assertion failed");
    }
}
