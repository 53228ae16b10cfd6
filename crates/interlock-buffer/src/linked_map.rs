//! Insertion-ordered hash map with LRU promotion.
//!
//! An open-chaining hash table whose entries also form a doubly-linked
//! recency list. `get` moves the entry to the front, `insert` places new
//! entries at the front, and `pop_back` removes the least recently used
//! entry, which is what the node cache builds its eviction on. The same
//! structure doubles as a transient station-index lookup during transfer
//! search.
//!
//! Entries live in a slot arena addressed by index, so growing the bucket
//! table never moves an entry.

use std::hash::{Hash, Hasher};
use xxhash_rust::xxh3::Xxh3;

/// Bucket-count progression. The table grows to the next prime whenever
/// the load factor would exceed [`MAX_LOAD`].
const PRIMES: [usize; 21] = [
    53, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613, 393241, 786433,
    1_572_869, 3_145_739, 6_291_469, 12_582_917, 25_165_843, 50_331_653,
];

/// Maximum load factor before the bucket table grows.
const MAX_LOAD: f64 = 0.8;

/// Sentinel index for "no slot".
const NIL: usize = usize::MAX;

struct Slot<K, V> {
    key: K,
    value: V,
    /// Cached key hash; growing the table re-buckets without re-hashing.
    hash: u64,
    /// Next slot in the same bucket chain.
    chain: usize,
    /// Recency-list neighbors.
    prev: usize,
    next: usize,
}

/// Hash map preserving recency order, with O(1) removal and LRU eviction.
pub struct LinkedHashMap<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    buckets: Vec<usize>,
    /// Index into [`PRIMES`] for the current bucket count; `None` before
    /// the first insertion.
    prime: Option<usize>,
    head: usize,
    tail: usize,
    len: usize,
    /// Insertion count that triggers the next growth.
    max_len: usize,
}

impl<K: Hash + Eq, V> LinkedHashMap<K, V> {
    /// Creates an empty map. No allocation until the first insertion.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            buckets: Vec::new(),
            prime: None,
            head: NIL,
            tail: NIL,
            len: 0,
            max_len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn hash_key(key: &K) -> u64 {
        let mut hasher = Xxh3::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    fn slot(&self, idx: usize) -> &Slot<K, V> {
        self.slots[idx].as_ref().unwrap()
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot<K, V> {
        self.slots[idx].as_mut().unwrap()
    }

    /// Finds the slot index for `key`, if present.
    fn find_slot(&self, key: &K) -> Option<usize> {
        if self.buckets.is_empty() {
            return None;
        }
        let hash = Self::hash_key(key);
        let mut idx = self.buckets[self.bucket_of(hash)];
        while idx != NIL {
            let slot = self.slot(idx);
            if slot.hash == hash && slot.key == *key {
                return Some(idx);
            }
            idx = slot.chain;
        }
        None
    }

    /// Unlinks a slot from the recency list.
    fn list_remove(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slot(idx);
            (slot.prev, slot.next)
        };
        if prev != NIL {
            self.slot_mut(prev).next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slot_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }
    }

    /// Links a slot at the front of the recency list.
    fn list_push_front(&mut self, idx: usize) {
        let head = self.head;
        {
            let slot = self.slot_mut(idx);
            slot.prev = NIL;
            slot.next = head;
        }
        if head != NIL {
            self.slot_mut(head).prev = idx;
        } else {
            self.tail = idx;
        }
        self.head = idx;
    }

    /// Links a slot into its bucket chain.
    fn table_insert(&mut self, idx: usize) {
        let bucket = self.bucket_of(self.slot(idx).hash);
        let old = self.buckets[bucket];
        self.slot_mut(idx).chain = old;
        self.buckets[bucket] = idx;
    }

    /// Unlinks a slot from its bucket chain.
    fn table_remove(&mut self, idx: usize) {
        let bucket = self.bucket_of(self.slot(idx).hash);
        let mut cur = self.buckets[bucket];
        if cur == idx {
            self.buckets[bucket] = self.slot(idx).chain;
            return;
        }
        while cur != NIL {
            let next = self.slot(cur).chain;
            if next == idx {
                self.slot_mut(cur).chain = self.slot(idx).chain;
                return;
            }
            cur = next;
        }
    }

    /// Grows the bucket table to the next prime and re-buckets every
    /// live slot. Slot indices are untouched.
    fn grow(&mut self) {
        let next = self.prime.map_or(0, |p| p + 1).min(PRIMES.len() - 1);
        self.prime = Some(next);
        self.buckets.clear();
        self.buckets.resize(PRIMES[next], NIL);
        self.max_len = (PRIMES[next] as f64 * MAX_LOAD) as usize;

        let mut idx = self.head;
        while idx != NIL {
            self.table_insert(idx);
            idx = self.slot(idx).next;
        }
    }

    /// Inserts a new entry at the front. Replaces the value in place if
    /// the key is already present (also promoting it).
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(idx) = self.find_slot(&key) {
            let old = std::mem::replace(&mut self.slot_mut(idx).value, value);
            self.list_remove(idx);
            self.list_push_front(idx);
            return Some(old);
        }

        if self.len + 1 > self.max_len {
            self.grow();
        }
        let slot = Slot {
            hash: Self::hash_key(&key),
            key,
            value,
            chain: NIL,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.list_push_front(idx);
        self.table_insert(idx);
        self.len += 1;
        None
    }

    /// Looks a key up and promotes the entry to the front.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = self.find_slot(key)?;
        self.list_remove(idx);
        self.list_push_front(idx);
        Some(&self.slot(idx).value)
    }

    /// Mutable lookup, also promoting the entry.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.find_slot(key)?;
        self.list_remove(idx);
        self.list_push_front(idx);
        Some(&mut self.slot_mut(idx).value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find_slot(key).is_some()
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.find_slot(key)?;
        Some(self.detach(idx).1)
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_back(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        Some(self.detach(idx))
    }

    fn detach(&mut self, idx: usize) -> (K, V) {
        self.table_remove(idx);
        self.list_remove(idx);
        self.len -= 1;
        self.free.push(idx);
        let slot = self.slots[idx].take().unwrap();
        (slot.key, slot.value)
    }

    /// Drops every entry. Keeps the allocation of the slot arena.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.buckets.clear();
        self.prime = None;
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
        self.max_len = 0;
    }

    /// Iterates entries front to back (most recent first).
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            map: self,
            idx: self.head,
        }
    }
}

impl<K: Hash + Eq, V> Default for LinkedHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Front-to-back entry iterator.
pub struct Iter<'a, K, V> {
    map: &'a LinkedHashMap<K, V>,
    idx: usize,
}

impl<'a, K: Hash + Eq, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx == NIL {
            return None;
        }
        let slot = self.map.slot(self.idx);
        self.idx = slot.next;
        Some((&slot.key, &slot.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut map = LinkedHashMap::new();
        assert!(map.is_empty());
        map.insert(1u64, "one");
        map.insert(2, "two");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1), Some(&"one"));
        assert_eq!(map.get(&3), None);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut map = LinkedHashMap::new();
        map.insert(1u64, 10);
        assert_eq!(map.insert(1, 20), Some(10));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&1), Some(&20));
    }

    #[test]
    fn test_recency_order() {
        let mut map = LinkedHashMap::new();
        map.insert(1u64, ());
        map.insert(2, ());
        map.insert(3, ());
        // Front-to-back: most recent insertion first.
        let keys: Vec<u64> = map.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![3, 2, 1]);

        // A hit promotes to the front.
        map.get(&1);
        let keys: Vec<u64> = map.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 3, 2]);
    }

    #[test]
    fn test_pop_back_is_lru() {
        let mut map = LinkedHashMap::new();
        map.insert(1u64, ());
        map.insert(2, ());
        map.insert(3, ());
        map.get(&1);
        assert_eq!(map.pop_back().map(|(k, _)| k), Some(2));
        assert_eq!(map.pop_back().map(|(k, _)| k), Some(3));
        assert_eq!(map.pop_back().map(|(k, _)| k), Some(1));
        assert_eq!(map.pop_back(), None);
    }

    #[test]
    fn test_remove() {
        let mut map = LinkedHashMap::new();
        map.insert(7u64, 70);
        map.insert(8, 80);
        assert_eq!(map.remove(&7), Some(70));
        assert_eq!(map.remove(&7), None);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&8));
        assert!(!map.contains_key(&7));
    }

    #[test]
    fn test_slot_reuse_after_remove() {
        let mut map = LinkedHashMap::new();
        for i in 0..16u64 {
            map.insert(i, i);
        }
        for i in 0..8u64 {
            map.remove(&i);
        }
        for i in 100..108u64 {
            map.insert(i, i);
        }
        assert_eq!(map.len(), 16);
        // Arena should not have grown past the original 16 slots.
        assert!(map.slots.len() <= 16);
    }

    #[test]
    fn test_growth_past_first_prime() {
        let mut map = LinkedHashMap::new();
        let n = 5_000u64;
        for i in 0..n {
            map.insert(i, i * 2);
        }
        assert_eq!(map.len(), n as usize);
        for i in 0..n {
            assert_eq!(map.get(&i), Some(&(i * 2)));
        }
        // Load factor stays under the threshold.
        assert!(map.len() <= map.max_len);
    }

    #[test]
    fn test_clear() {
        let mut map = LinkedHashMap::new();
        map.insert(1u64, ());
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.get(&1), None);
        map.insert(2, ());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_random_workload_against_model() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut map = LinkedHashMap::new();
        let mut model = std::collections::HashMap::new();

        for _ in 0..10_000 {
            let key: u16 = rng.gen_range(0..500);
            match rng.gen_range(0..3) {
                0 => {
                    map.insert(key, key as u32);
                    model.insert(key, key as u32);
                }
                1 => {
                    assert_eq!(map.remove(&key), model.remove(&key));
                }
                _ => {
                    assert_eq!(map.get(&key), model.get(&key));
                }
            }
            assert_eq!(map.len(), model.len());
        }
    }
}
