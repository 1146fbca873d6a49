//! Keyed shared state with single-writer / multi-reader semantics.
//!
//! Both registries and the per-player inner maps (frame histories, pending
//! pings) are instances of [`SharedMap`]. Values are cheap clones — entity
//! values are stored as `Arc` handles — so `find` and `snapshot` hand out
//! owned copies and never expose the lock to callers.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

pub struct SharedMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> SharedMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert_or_assign(&self, key: K, value: V) {
        self.inner.write().insert(key, value);
    }

    pub fn erase(&self, key: &K) -> bool {
        self.inner.write().remove(key).is_some()
    }

    /// Returns a clone of the value under `key`, if any.
    pub fn find(&self, key: &K) -> Option<V> {
        self.inner.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Runs `f` over every entry under a shared lock.
    ///
    /// The callback must not touch this map; inserting or erasing from inside
    /// it would deadlock.
    pub fn for_each_read<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        let guard = self.inner.read();
        for (key, value) in guard.iter() {
            f(key, value);
        }
    }

    /// Copies the whole mapping out under a shared lock.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.inner.read().clone()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for SharedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn insert_find_erase() {
        let map = SharedMap::new();
        assert!(map.is_empty());

        map.insert_or_assign("a".to_string(), 1u32);
        map.insert_or_assign("b".to_string(), 2);
        assert_eq!(map.len(), 2);
        assert_eq!(map.find(&"a".to_string()), Some(1));
        assert!(map.contains(&"b".to_string()));

        map.insert_or_assign("a".to_string(), 3);
        assert_eq!(map.find(&"a".to_string()), Some(3));

        assert!(map.erase(&"a".to_string()));
        assert!(!map.erase(&"a".to_string()));
        assert_eq!(map.find(&"a".to_string()), None);
    }

    #[test]
    fn for_each_read_sees_every_entry() {
        let map = SharedMap::new();
        for i in 0..10u32 {
            map.insert_or_assign(i, i * 2);
        }
        let mut sum = 0;
        map.for_each_read(|_, v| sum += v);
        assert_eq!(sum, 90);
    }

    #[test]
    fn snapshot_is_detached() {
        let map = SharedMap::new();
        map.insert_or_assign(1u32, 10u32);
        let snap = map.snapshot();
        map.insert_or_assign(2, 20);
        assert_eq!(snap.len(), 1);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn concurrent_readers_and_writer() {
        let map = Arc::new(SharedMap::new());
        let writer = {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..1000u32 {
                    map.insert_or_assign(i % 16, i);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _ = map.find(&3);
                        let mut count = 0;
                        map.for_each_read(|_, _| count += 1);
                        assert!(count <= 16);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert!(map.len() <= 16);
    }
}
