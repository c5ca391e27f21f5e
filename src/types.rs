use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::error::TinyError;

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type ResultPod<T> = Result<Pod<T>, TinyError>;
pub type TinyResult = Result<(), TinyError>;

/// A `HashMap` wrapped in a `RwLock` so multiple threads can share it
/// without wrapping every call site in lock boilerplate.
pub struct ConcurrentHashMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ConcurrentHashMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.read().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.write().unwrap().insert(key, value);
    }

    pub fn remove(&self, key: &K) {
        self.inner.write().unwrap().remove(key);
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.read().unwrap().keys().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn clear(&self) {
        self.inner.write().unwrap().clear();
    }

    /// Run `f` against the value stored under `key`, inserting the
    /// default value first when the key is absent.
    pub fn alter_value<F>(&self, key: &K, f: F)
    where
        V: Default,
        F: FnOnce(&mut V),
    {
        let mut inner = self.inner.write().unwrap();
        let value = inner.entry(key.clone()).or_insert_with(V::default);
        f(value);
    }

    pub fn get_inner_rl(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.inner.read().unwrap()
    }

    pub fn get_inner_wl(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.inner.write().unwrap()
    }
}
