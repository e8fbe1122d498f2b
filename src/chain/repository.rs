//! Per-entity storage injected into the mock ledger.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

/// Minimal keyed store: get, put, list.
pub trait Repository<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    /// Insert or overwrite.
    fn put(&self, key: K, value: V);

    /// All values, in no particular order.
    fn list(&self) -> Vec<V>;

    fn len(&self) -> usize {
        self.list().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

/// Hash-map backed repository.
pub struct MemoryRepository<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> MemoryRepository<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for MemoryRepository<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Repository<K, V> for MemoryRepository<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: K, value: V) {
        self.entries.write().insert(key, value);
    }

    fn list(&self) -> Vec<V> {
        self.entries.read().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}
