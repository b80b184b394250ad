//! Sharded, bounded least-recently-used cache.
//!
//! Keys are spread over independent shards by hash; each shard owns a mutex,
//! a hash map and an intrusive recency list kept in a slab, so lookups,
//! promotions and evictions are O(1) and unrelated keys rarely contend.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use parking_lot::Mutex;
use tracing::trace;

const NIL: usize = usize::MAX;

struct Entry<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

struct Shard<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    // most recently used
    head: usize,
    // least recently used
    tail: usize,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> Shard<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    fn entry(&self, slot: usize) -> &Entry<K, V> {
        self.slots[slot]
            .as_ref()
            .unwrap_or_else(|| unreachable!("linked slot {slot} is vacant"))
    }

    fn entry_mut(&mut self, slot: usize) -> &mut Entry<K, V> {
        self.slots[slot]
            .as_mut()
            .unwrap_or_else(|| unreachable!("linked slot {slot} is vacant"))
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let entry = self.entry(slot);
            (entry.prev, entry.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.entry_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.entry_mut(next).prev = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let head = self.head;
        {
            let entry = self.entry_mut(slot);
            entry.prev = NIL;
            entry.next = head;
        }
        if head == NIL {
            self.tail = slot;
        } else {
            self.entry_mut(head).prev = slot;
        }
        self.head = slot;
    }

    fn touch(&mut self, slot: usize) {
        if self.head != slot {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = *self.map.get(key)?;
        self.touch(slot);
        Some(&self.entry(slot).value)
    }

    fn insert(&mut self, key: K, value: V) {
        if self.capacity > 0 && self.map.len() >= self.capacity {
            self.evict();
        }
        let entry = Entry {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, slot);
        self.push_front(slot);
    }

    fn evict(&mut self) {
        let slot = self.tail;
        if slot == NIL {
            return;
        }
        self.unlink(slot);
        if let Some(entry) = self.slots[slot].take() {
            self.map.remove(&entry.key);
        }
        self.free.push(slot);
        trace!(slot, "evicted least recently used cache entry");
    }

    fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }
}

/// A bounded concurrent LRU cache split into independently locked shards.
///
/// Per-shard capacity is `max(1, capacity / shards)`; a capacity of zero
/// disables eviction entirely.
///
/// # Example
///
/// ```
/// use tether::ShardedLru;
///
/// let cache: ShardedLru<String, usize> = ShardedLru::new(128, 8);
/// cache.store("answer".to_string(), 42);
/// assert_eq!(cache.load("answer"), Some(42));
///
/// // `store` never overwrites; `set` does.
/// cache.store("answer".to_string(), 0);
/// assert_eq!(cache.load("answer"), Some(42));
/// cache.set("answer".to_string(), 0);
/// assert_eq!(cache.load("answer"), Some(0));
/// ```
pub struct ShardedLru<K, V, S = RandomState> {
    shards: Box<[Mutex<Shard<K, V>>]>,
    hasher: S,
}

impl<K, V> ShardedLru<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache holding about `capacity` entries over `shards` shards.
    #[must_use]
    pub fn new(capacity: usize, shards: usize) -> Self {
        Self::with_hasher(capacity, shards, RandomState::new())
    }
}

impl<K, V, S> ShardedLru<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Creates a cache using `hasher` for shard selection.
    pub fn with_hasher(capacity: usize, shards: usize, hasher: S) -> Self {
        let shards = shards.max(1);
        let per_shard = if capacity == 0 {
            0
        } else {
            (capacity / shards).max(1)
        };
        let shards = (0..shards)
            .map(|_| Mutex::new(Shard::new(per_shard)))
            .collect();
        Self { shards, hasher }
    }

    fn shard_for<Q: Hash + ?Sized>(&self, key: &Q) -> &Mutex<Shard<K, V>> {
        let hash = self.hasher.hash_one(key);
        // Reduce in u64 so the result always fits the shard count.
        let index = hash % self.shards.len() as u64;
        &self.shards[usize::try_from(index).unwrap_or_default()]
    }

    /// Returns a clone of the cached value, marking it most recently used.
    pub fn load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shard_for(key).lock().get(key).cloned()
    }

    /// Inserts `value` unless `key` is already present (first write wins).
    pub fn store(&self, key: K, value: V) {
        let mut shard = self.shard_for(&key).lock();
        if !shard.map.contains_key(&key) {
            shard.insert(key, value);
        }
    }

    /// Inserts or replaces `value`, marking it most recently used.
    pub fn set(&self, key: K, value: V) {
        let mut shard = self.shard_for(&key).lock();
        match shard.map.get(&key).copied() {
            Some(slot) => {
                shard.entry_mut(slot).value = value;
                shard.touch(slot);
            }
            None => shard.insert(key, value),
        }
    }

    /// Returns the cached value or computes, stores and returns it.
    ///
    /// `init` runs without the shard lock held; if another caller stored the
    /// key meanwhile, their value wins and is returned.
    pub fn get_or_insert_with<Q, F>(&self, key: &Q, init: F) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce() -> V,
    {
        if let Some(value) = self.load(key) {
            return value;
        }
        let value = init();
        let mut shard = self.shard_for(key).lock();
        if let Some(existing) = shard.get(key) {
            return existing.clone();
        }
        shard.insert(key.to_owned(), value.clone());
        value
    }

    /// Removes every entry from every shard.
    pub fn clear(&self) {
        for shard in &*self.shards {
            shard.lock().clear();
        }
    }

    /// Total number of cached entries.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().map.len()).sum()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Entries currently held by each shard.
    pub fn shard_lens(&self) -> Vec<usize> {
        self.shards.iter().map(|shard| shard.lock().map.len()).collect()
    }
}

impl<K, V, S> std::fmt::Debug for ShardedLru<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedLru")
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}
