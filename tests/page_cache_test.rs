use tiny_db::{
    btree::{page_cache::PageCache, table::BTreeTableIterator},
    storage::tuple::{Cell, Tuple},
    transaction::Transaction,
    utils::HandyRwLock,
    Database,
};

use crate::test_utils::{
    leaf_records_cap, new_random_btree_table, search_key, setup, TreeLayout,
};

mod test_utils;

/// The cache never holds more pages than its capacity; a full scan
/// over a table much larger than the cache works by evicting clean
/// pages in LRU order.
#[test]
fn test_lru_eviction_bound() {
    let _guard = setup();

    let rows = leaf_records_cap() * 5;
    let table_rc = new_random_btree_table(
        2,
        rows,
        None,
        0,
        TreeLayout::EvenlyDistributed,
    );
    let table = table_rc.rl();

    // shrink the cache well below the number of pages, then scan
    PageCache::set_capacity(4);

    let tx = Transaction::new();
    let count = BTreeTableIterator::new(&tx, &table).unwrap().count();
    tx.commit().unwrap();

    assert_eq!(rows, count);
    assert!(Database::page_cache().cached_pages_count() <= 4);
}

/// When every cached page is dirty, there is nothing the pool may
/// evict (NO-STEAL), so the next miss must fail instead of writing
/// uncommitted data.
#[test]
fn test_no_evictable_page() {
    let _guard = setup();

    PageCache::set_page_size(1024);

    let rows = leaf_records_cap();
    let table_rc =
        new_random_btree_table(2, rows, None, 0, TreeLayout::Naturally);
    let table = table_rc.rl();

    PageCache::set_capacity(4);

    // one huge transaction keeps dirtying pages; once the cache is
    // all dirty, the next page fetch cannot make room
    let tx = Transaction::new();
    let mut last = Ok(());
    for i in 0..(leaf_records_cap() * 20) as i64 {
        last = table.insert_tuple(&tx, &Tuple::new_int_tuples(i, 2));
        if last.is_err() {
            break;
        }
    }

    let err = last.expect_err("the cache cannot hold that many dirty pages");
    assert!(format!("{}", err).contains("no evictable page"));

    // rolling back discards the dirty pages and unclogs the cache
    tx.abort().unwrap();
    assert_eq!(table.tuples_count().unwrap(), rows);
    table.check_integrity(true).unwrap();
}

/// Aborting a transaction discards its cached changes; a later read
/// sees the clean on-disk version.
#[test]
fn test_abort_discards_changes() {
    let _guard = setup();

    let rows = 100;
    let table_rc =
        new_random_btree_table(2, rows, None, 0, TreeLayout::Naturally);
    let table = table_rc.rl();

    let probe = Cell::Int64(424242);

    // going through the pool's own tuple interface
    let tx = Transaction::new();
    Database::page_cache()
        .insert_tuple(&tx, table.get_id(), &Tuple::new_int_tuples(424242, 2))
        .unwrap();
    assert_eq!(search_key(&table, &tx, &probe), 1);
    tx.abort().unwrap();

    let tx = Transaction::new();
    assert_eq!(search_key(&table, &tx, &probe), 0);
    tx.commit().unwrap();

    assert_eq!(table.tuples_count().unwrap(), rows);
    table.check_integrity(true).unwrap();
}

/// Committing flushes the dirty pages; the data survives a cache
/// teardown.
#[test]
fn test_commit_flushes_to_disk() {
    let _guard = setup();

    let rows = 100;
    let table_rc =
        new_random_btree_table(2, rows, None, 0, TreeLayout::Naturally);

    let probe = Cell::Int64(424242);
    {
        let table = table_rc.rl();
        let tx = Transaction::new();
        table
            .insert_tuple(&tx, &Tuple::new_int_tuples(424242, 2))
            .unwrap();
        tx.commit().unwrap();
    }

    // drop every cached page; the catalog is rebuilt with the same
    // table object, so reads now come from disk
    Database::reset();
    Database::mut_catalog().add_table(table_rc.clone());

    let table = table_rc.rl();
    let tx = Transaction::new();
    assert_eq!(search_key(&table, &tx, &probe), 1);
    tx.commit().unwrap();

    assert_eq!(table.tuples_count().unwrap(), rows + 1);
    table.check_integrity(true).unwrap();

    // and the pool's tuple interface removes it again
    let tx = Transaction::new();
    let predicate = tiny_db::Predicate::new(0, tiny_db::Op::Equals, &probe);
    let mut it = tiny_db::btree::table::BTreeTableSearchIterator::new(
        &tx, &table, &predicate,
    )
    .unwrap();
    let target = it.try_next().unwrap().unwrap();
    Database::page_cache().delete_tuple(&tx, &target).unwrap();
    tx.commit().unwrap();

    assert_eq!(table.tuples_count().unwrap(), rows);
}
