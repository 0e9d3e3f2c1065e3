//! Bounded value caches
//!
//! Sharded LRU maps from key to decoded value. A miss only costs a page read,
//! so eviction order carries no correctness weight.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use lru::LruCache;
use parking_lot::Mutex;

use crate::key::Key;

const MAX_SHARDS: usize = 16;

pub(crate) struct ValueCache<V> {
    shards: Vec<Mutex<LruCache<Key, V>>>,

    /// Entries per shard
    shard_capacity: usize,
}

impl<V: Clone> ValueCache<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        let shard_count = capacity.clamp(1, MAX_SHARDS);
        // Maps grow on demand; the bound is enforced on insert
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::unbounded()))
            .collect();
        Self {
            shards,
            shard_capacity: (capacity / shard_count).max(1),
        }
    }

    pub(crate) fn get(&self, key: &Key) -> Option<V> {
        self.shard_for(key).lock().get(key).cloned()
    }

    pub(crate) fn put(&self, key: Key, value: V) {
        let mut shard = self.shard_for(&key).lock();
        shard.put(key, value);
        while shard.len() > self.shard_capacity {
            shard.pop_lru();
        }
    }

    pub(crate) fn invalidate(&self, key: &Key) {
        self.shard_for(key).lock().pop(key);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    fn shard_for(&self, key: &Key) -> &Mutex<LruCache<Key, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }
}
