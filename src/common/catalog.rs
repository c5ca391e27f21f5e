use std::collections::HashMap;

use crate::{storage::schema::TableSchema, types::Pod, utils::HandyRwLock, BTreeTable};

type Key = u32;
type Value = Pod<BTreeTable>;

/// The mapping from table ids to their backing files. The engine
/// reaches every table through here, most importantly when the page
/// cache resolves a page id to the file it must read.
pub struct Catalog {
    map: HashMap<Key, Value>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn add_table(&mut self, table: Value) {
        let table_id = table.rl().get_id();
        self.map.insert(table_id, table);
    }

    pub fn get_table(&self, table_id: &Key) -> Option<Value> {
        self.map.get(table_id).cloned()
    }

    pub fn get_schema(&self, table_id: &Key) -> Option<TableSchema> {
        self.map.get(table_id).map(|t| t.rl().schema.clone())
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
