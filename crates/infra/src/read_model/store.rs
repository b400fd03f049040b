use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// Key/value store abstraction for read models that can be rebuilt from the
/// event store at any time.
pub trait ReadStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn upsert(&self, key: K, value: V);
    /// Insert `value`, or replace the existing value only when `replace`
    /// accepts it. Atomic with respect to other writers.
    fn upsert_if(&self, key: K, value: V, replace: &dyn Fn(&V) -> bool) -> bool;
    fn remove(&self, key: &K) -> Option<V>;
    fn list(&self) -> Vec<V>;
    /// Drop every record (rebuild support).
    fn clear(&self);
}

impl<K, V, S> ReadStore<K, V> for Arc<S>
where
    S: ReadStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) {
        (**self).upsert(key, value)
    }

    fn upsert_if(&self, key: K, value: V, replace: &dyn Fn(&V) -> bool) -> bool {
        (**self).upsert_if(key, value, replace)
    }

    fn remove(&self, key: &K) -> Option<V> {
        (**self).remove(key)
    }

    fn list(&self) -> Vec<V> {
        (**self).list()
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// In-memory store for tests/dev.
#[derive(Debug)]
pub struct InMemoryReadStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryReadStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryReadStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ReadStore<K, V> for InMemoryReadStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(key).cloned()
    }

    fn upsert(&self, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(key, value);
        }
    }

    fn upsert_if(&self, key: K, value: V, replace: &dyn Fn(&V) -> bool) -> bool {
        let Ok(mut map) = self.inner.write() else {
            return false;
        };
        match map.get(&key) {
            Some(existing) if !replace(existing) => false,
            _ => {
                map.insert(key, value);
                true
            }
        }
    }

    fn remove(&self, key: &K) -> Option<V> {
        let mut map = self.inner.write().ok()?;
        map.remove(key)
    }

    fn list(&self) -> Vec<V> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }

    fn clear(&self) {
        if let Ok(mut map) = self.inner.write() {
            map.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_if_keeps_newer_values() {
        let store = InMemoryReadStore::<&str, u64>::new();
        assert!(store.upsert_if("a", 2, &|_| true));
        assert!(!store.upsert_if("a", 1, &|existing| *existing < 1));
        assert_eq!(store.get(&"a"), Some(2));
        assert!(store.upsert_if("a", 3, &|existing| *existing < 3));
        assert_eq!(store.get(&"a"), Some(3));
    }

    #[test]
    fn clear_drops_everything() {
        let store = InMemoryReadStore::new();
        store.upsert(1u8, "x".to_string());
        store.upsert(2u8, "y".to_string());
        assert_eq!(store.list().len(), 2);
        store.clear();
        assert!(store.list().is_empty());
        assert_eq!(store.remove(&1), None);
    }
}
