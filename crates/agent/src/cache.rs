//! Bounded least-recently-used map.
//!
//! Entries live in a slab and are threaded on an index-linked doubly-linked
//! list ordered most- to least-recently used; a `HashMap` maps keys to slab
//! slots. Every operation is O(1) apart from the diagnostic iterators.

use std::collections::HashMap;
use std::hash::Hash;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct LruCache<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity.min(1024)),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity.min(1024)),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.detach(idx);
        self.attach_front(idx);
        self.slots[idx].as_ref().map(|node| &node.value)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_ref().map(|node| &node.value)
    }

    /// Insert or replace `key` as most recently used.
    ///
    /// Returns the entry evicted to stay within capacity, if any. Replacing
    /// an existing key never evicts.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(node) = self.slots[idx].as_mut() {
                node.value = value;
            }
            self.detach(idx);
            self.attach_front(idx);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.attach_front(idx);
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.detach(idx);
        self.release(idx).map(|(_, value)| value)
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let idx = self.tail?;
        self.detach(idx);
        let (key, value) = self.release(idx)?;
        self.index.remove(&key);
        Some((key, value))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Entries from most to least recently used.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cache: self,
            cursor: self.head,
        }
    }

    /// Keys from most to least recently used.
    pub fn keys_mru(&self) -> Vec<K> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    fn release(&mut self, idx: usize) -> Option<(K, V)> {
        let node = self.slots[idx].take()?;
        self.free.push(idx);
        Some((node.key, node.value))
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.slots[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slots[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head
            && let Some(node) = self.slots[h].as_mut()
        {
            node.prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

pub struct Iter<'a, K, V> {
    cache: &'a LruCache<K, V>,
    cursor: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cache.slots[self.cursor?].as_ref()?;
        self.cursor = node.next;
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_clamped() {
        let mut cache = LruCache::new(0);
        assert_eq!(cache.capacity(), 1);
        assert!(cache.insert(1, "a").is_none());
        assert_eq!(cache.insert(2, "b"), Some((1, "a")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert(1, 'a');
        cache.insert(2, 'b');
        assert_eq!(cache.insert(3, 'c'), Some((1, 'a')));
        assert_eq!(cache.keys_mru(), vec![3, 2]);
    }

    #[test]
    fn get_promotes_and_changes_victim() {
        let mut cache = LruCache::new(2);
        cache.insert(1, 'a');
        cache.insert(2, 'b');
        assert_eq!(cache.get(&1), Some(&'a'));
        assert_eq!(cache.insert(3, 'c'), Some((2, 'b')));
        assert_eq!(cache.keys_mru(), vec![3, 1]);
    }

    #[test]
    fn peek_does_not_promote() {
        let mut cache = LruCache::new(2);
        cache.insert(1, 'a');
        cache.insert(2, 'b');
        assert_eq!(cache.peek(&1), Some(&'a'));
        assert_eq!(cache.insert(3, 'c'), Some((1, 'a')));
    }

    #[test]
    fn replacing_a_key_promotes_without_eviction() {
        let mut cache = LruCache::new(2);
        cache.insert(1, 'a');
        cache.insert(2, 'b');
        assert!(cache.insert(1, 'z').is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys_mru(), vec![1, 2]);
        assert_eq!(cache.peek(&1), Some(&'z'));
    }

    #[test]
    fn remove_unlinks_and_reuses_slots() {
        let mut cache = LruCache::new(3);
        cache.insert(1, 'a');
        cache.insert(2, 'b');
        cache.insert(3, 'c');
        assert_eq!(cache.remove(&2), Some('b'));
        assert_eq!(cache.remove(&2), None);
        assert_eq!(cache.keys_mru(), vec![3, 1]);

        cache.insert(4, 'd');
        assert_eq!(cache.slots.len(), 3);
        assert_eq!(cache.keys_mru(), vec![4, 3, 1]);
        assert_eq!(cache.pop_lru(), Some((1, 'a')));
        assert_eq!(cache.keys_mru(), vec![4, 3]);
    }

    #[test]
    fn removing_only_entry_empties_list() {
        let mut cache = LruCache::new(1);
        cache.insert("u", 1);
        cache.remove(&"u");
        assert!(cache.is_empty());
        assert!(cache.keys_mru().is_empty());
        assert!(cache.pop_lru().is_none());
        cache.insert("v", 2);
        assert_eq!(cache.keys_mru(), vec!["v"]);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let mut cache = LruCache::new(4);
        for i in 0..100u32 {
            cache.insert(i % 7, i);
            if i % 3 == 0 {
                cache.get(&(i % 5));
            }
            if i % 11 == 0 {
                cache.remove(&(i % 7));
            }
            assert!(cache.len() <= 4);
            assert_eq!(cache.iter().count(), cache.len());
        }
    }

    #[test]
    fn clear_resets_everything() {
        let mut cache = LruCache::new(2);
        cache.insert(1, 'a');
        cache.insert(2, 'b');
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains(&1));
        cache.insert(3, 'c');
        assert_eq!(cache.keys_mru(), vec![3]);
    }
}
