//! Ordered Index
//!
//! BTreeMap from key to record handle behind an RwLock. Lookups take the
//! read side; insert and remove take the write side for the single map
//! operation only, never across page I/O.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::key::Key;
use crate::record::Record;

/// In-memory key → record map
#[derive(Default)]
pub struct Index {
    map: RwLock<BTreeMap<Key, Arc<Record>>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Key) -> Option<Arc<Record>> {
        self.map.read().get(key).cloned()
    }

    /// Insert or replace, returning the previous record
    pub fn insert(&self, key: Key, record: Arc<Record>) -> Option<Arc<Record>> {
        self.map.write().insert(key, record)
    }

    /// Insert only when `key` is absent
    ///
    /// Returns the record that was kept: `record` itself, or the one already
    /// present.
    pub fn insert_if_absent(&self, key: Key, record: Arc<Record>) -> Arc<Record> {
        Arc::clone(self.map.write().entry(key).or_insert(record))
    }

    pub fn remove(&self, key: &Key) -> Option<Arc<Record>> {
        self.map.write().remove(key)
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.map.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Snapshot of the keys in ascending order
    pub fn keys(&self) -> Vec<Key> {
        self.map.read().keys().cloned().collect()
    }

    /// Snapshot of every record handle
    pub fn records(&self) -> Vec<Arc<Record>> {
        self.map.read().values().cloned().collect()
    }
}
