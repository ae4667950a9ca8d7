//! Bounded LRU cache fronting the file metadata index.
//!
//! Resolves the open question about the reference cache's fragile
//! linear-probing scheme: entries live in one `HashMap<String, Node<V>>`
//! keyed by filename, and recency order is an intrusive doubly linked list
//! threaded through owned key strings rather than raw pointers or an
//! in-place probed array.

use std::collections::HashMap;

struct Node<V> {
    value: V,
    prev: Option<String>,
    next: Option<String>,
}

/// A fixed-capacity, single-guard LRU cache. Callers wrap this in their own
/// `Mutex`/`RwLock`; the type itself is not internally synchronized, mirroring
/// the "one exclusive guard per operation" contract rather than hiding a lock
/// inside a type that's only ever used behind one anyway.
pub struct LruCache<V: Clone> {
    capacity: usize,
    entries: HashMap<String, Node<V>>,
    head: Option<String>, // most recently used
    tail: Option<String>, // least recently used
}

impl<V: Clone> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        LruCache { capacity: capacity.max(1), entries: HashMap::new(), head: None, tail: None }
    }

    fn detach(&mut self, key: &str) {
        let (prev, next) = {
            let node = self.entries.get(key).expect("detach on missing key");
            (node.prev.clone(), node.next.clone())
        };
        match &prev {
            Some(p) => self.entries.get_mut(p).unwrap().next = next.clone(),
            None => self.head = next.clone(),
        }
        match &next {
            Some(n) => self.entries.get_mut(n).unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, key: &str) {
        let old_head = self.head.take();
        if let Some(h) = &old_head {
            self.entries.get_mut(h).unwrap().prev = Some(key.to_string());
        }
        {
            let node = self.entries.get_mut(key).unwrap();
            node.prev = None;
            node.next = old_head;
        }
        self.head = Some(key.to_string());
        if self.tail.is_none() {
            self.tail = Some(key.to_string());
        }
    }

    /// Returns a copy of the value for `key`, moving it to most-recently-used.
    pub fn get(&mut self, key: &str) -> Option<V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.detach(key);
        self.push_front(key);
        self.entries.get(key).map(|n| n.value.clone())
    }

    /// Inserts or updates `key`, moving it to most-recently-used. Evicts the
    /// least-recently-used entry if this insert grows the cache past capacity.
    pub fn put(&mut self, key: &str, value: V) {
        if self.entries.contains_key(key) {
            self.detach(key);
            self.entries.get_mut(key).unwrap().value = value;
            self.push_front(key);
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some(lru_key) = self.tail.clone() {
                self.detach(&lru_key);
                self.entries.remove(&lru_key);
            }
        }

        self.entries.insert(key.to_string(), Node { value, prev: None, next: None });
        self.push_front(key);
    }

    pub fn remove(&mut self, key: &str) {
        if self.entries.contains_key(key) {
            self.detach(key);
            self.entries.remove(key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.head = None;
        self.tail = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_promotes_to_most_recent() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.put("c", 3); // should evict "b", not "a"
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn full_put_evicts_exactly_one_and_preserves_capacity() {
        let mut cache = LruCache::new(3);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        assert_eq!(cache.len(), 3);
        cache.put("d", 4);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn remove_and_clear() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.remove("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn put_existing_key_updates_without_growing() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("a", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), Some(2));
    }
}
