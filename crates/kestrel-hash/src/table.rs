//! Extendible hash table with a global directory and local-depth buckets.

use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A concurrent in-memory extendible hash table.
///
/// The directory holds `2^global_depth` shared bucket handles; several
/// directory slots may alias the same bucket while its local depth is
/// smaller than the global depth. Inserting into a full bucket splits it,
/// doubling the directory when the bucket already discriminates every
/// global bit. Duplicate-key inserts overwrite the stored value.
///
/// All operations serialize on one table-wide mutex.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    bucket_size: usize,
    hasher: S,
    inner: Mutex<Directory<K, V>>,
}

struct Directory<K, V> {
    global_depth: usize,
    num_buckets: usize,
    slots: Vec<Arc<Mutex<Bucket<K, V>>>>,
}

struct Bucket<K, V> {
    depth: usize,
    capacity: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(capacity: usize, depth: usize) -> Self {
        Self {
            depth,
            capacity,
            items: Vec::with_capacity(capacity),
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

impl<K, V> Bucket<K, V>
where
    K: Eq,
{
    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.items.iter().position(|(k, _)| k == key) {
            Some(idx) => {
                self.items.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Overwrites an existing key or appends when there is room.
    /// Returns false if the bucket is full and the key is absent.
    fn insert(&mut self, key: K, value: V) -> bool {
        for (k, v) in self.items.iter_mut() {
            if *k == key {
                *v = value;
                return true;
            }
        }
        if self.is_full() {
            return false;
        }
        self.items.push((key, value));
        true
    }
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Eq,
{
    /// Creates a table whose buckets hold up to `bucket_size` entries.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            hasher: RandomState::new(),
            inner: Mutex::new(Directory {
                global_depth: 0,
                num_buckets: 1,
                slots: vec![Arc::new(Mutex::new(Bucket::new(bucket_size, 0)))],
            }),
        }
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn hash(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    fn index_of(&self, key: &K, global_depth: usize) -> usize {
        let mask = (1usize << global_depth) - 1;
        (self.hash(key) as usize) & mask
    }

    /// Returns the number of hash bits the directory currently discriminates.
    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Returns the local depth of the bucket behind directory slot `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        let depth = inner.slots[dir_index].lock().depth;
        depth
    }

    /// Returns the number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        let mut seen: Vec<*const Mutex<Bucket<K, V>>> = Vec::with_capacity(inner.num_buckets);
        let mut count = 0;
        for slot in &inner.slots {
            let ptr = Arc::as_ptr(slot);
            if !seen.contains(&ptr) {
                seen.push(ptr);
                count += slot.lock().items.len();
            }
        }
        count
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the value stored under `key`.
    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let inner = self.inner.lock();
        let index = self.index_of(key, inner.global_depth);
        let bucket = inner.slots[index].lock();
        bucket.find(key).cloned()
    }

    /// Removes the entry stored under `key`. Returns whether it existed.
    pub fn remove(&self, key: &K) -> bool {
        let inner = self.inner.lock();
        let index = self.index_of(key, inner.global_depth);
        let mut bucket = inner.slots[index].lock();
        bucket.remove(key)
    }

    /// Inserts or overwrites the entry for `key`.
    ///
    /// Splits the target bucket (doubling the directory when its local
    /// depth equals the global depth) until the insert fits. A split may
    /// leave one side still full, so the loop re-targets after each round.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        loop {
            let index = self.index_of(&key, inner.global_depth);
            let target = Arc::clone(&inner.slots[index]);
            let local_depth = {
                let bucket = target.lock();
                if !bucket.is_full() {
                    break;
                }
                bucket.depth
            };

            if local_depth == inner.global_depth {
                let old_len = inner.slots.len();
                for i in 0..old_len {
                    let alias = Arc::clone(&inner.slots[i]);
                    inner.slots.push(alias);
                }
                inner.global_depth += 1;
            }

            let bucket_0 = Arc::new(Mutex::new(Bucket::new(self.bucket_size, local_depth + 1)));
            let bucket_1 = Arc::new(Mutex::new(Bucket::new(self.bucket_size, local_depth + 1)));

            let mask = 1u64 << local_depth;
            for (k, v) in target.lock().items.drain(..) {
                if self.hash(&k) & mask != 0 {
                    bucket_1.lock().items.push((k, v));
                } else {
                    bucket_0.lock().items.push((k, v));
                }
            }
            inner.num_buckets += 1;

            for (i, slot) in inner.slots.iter_mut().enumerate() {
                if Arc::ptr_eq(slot, &target) {
                    *slot = if (i as u64) & mask != 0 {
                        Arc::clone(&bucket_1)
                    } else {
                        Arc::clone(&bucket_0)
                    };
                }
            }
        }

        let index = self.index_of(&key, inner.global_depth);
        inner.slots[index].lock().insert(key, value);
    }

    /// Verifies that two directory slots share a bucket exactly when they
    /// agree in their low `local_depth` bits. Debugging aid.
    pub fn verify_directory(&self) -> bool {
        let inner = self.inner.lock();
        let n = inner.slots.len();
        for i in 0..n {
            let depth_i = inner.slots[i].lock().depth;
            if depth_i > inner.global_depth {
                return false;
            }
            let mask = (1usize << depth_i) - 1;
            for j in 0..n {
                let same_bucket = Arc::ptr_eq(&inner.slots[i], &inner.slots[j]);
                let same_bits = (i & mask) == (j & mask);
                if same_bucket != same_bits {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn test_insert_find() {
        let table = ExtendibleHashTable::new(4);
        table.insert(1, "a");
        table.insert(2, "b");
        table.insert(3, "c");

        assert_eq!(table.find(&1), Some("a"));
        assert_eq!(table.find(&2), Some("b"));
        assert_eq!(table.find(&3), Some("c"));
        assert_eq!(table.find(&4), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_duplicate_insert_overwrites() {
        let table = ExtendibleHashTable::new(4);
        table.insert(42, 1);
        table.insert(42, 2);

        assert_eq!(table.find(&42), Some(2));
        assert_eq!(table.len(), 1);

        assert!(table.remove(&42));
        assert_eq!(table.find(&42), None);
        assert!(!table.remove(&42));
    }

    #[test]
    fn test_remove_missing() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(2);
        assert!(!table.remove(&9));
    }

    #[test]
    fn test_split_on_overflow() {
        let table = ExtendibleHashTable::new(2);
        for i in 0..4 {
            table.insert(i, i * 10);
        }

        // Four entries cannot fit in one bucket of two; at least one split
        // must have happened and every entry must remain reachable.
        assert!(table.num_buckets() >= 2);
        assert!(table.global_depth() >= 1);
        for i in 0..4 {
            assert_eq!(table.find(&i), Some(i * 10));
        }
        assert_eq!(table.find(&2), Some(20));
        assert!(table.verify_directory());
    }

    #[test]
    fn test_directory_invariant_under_load() {
        let table = ExtendibleHashTable::new(2);
        let mut buckets_seen = 1;
        for i in 0..256 {
            table.insert(i, i);
            let now = table.num_buckets();
            assert!(now >= buckets_seen, "bucket count must not shrink");
            buckets_seen = now;
        }

        assert!(table.verify_directory());
        assert_eq!(table.len(), 256);
        for i in 0..256 {
            assert_eq!(table.find(&i), Some(i));
        }
    }

    #[test]
    fn test_overwrite_survives_splits() {
        let table = ExtendibleHashTable::new(2);
        for i in 0..64 {
            table.insert(i, i);
        }
        for i in 0..64 {
            table.insert(i, i + 1000);
        }

        assert_eq!(table.len(), 64);
        for i in 0..64 {
            assert_eq!(table.find(&i), Some(i + 1000));
        }
    }

    #[test]
    fn test_string_values() {
        let table = ExtendibleHashTable::new(3);
        table.insert(1, "one".to_string());
        table.insert(2, "two".to_string());

        assert_eq!(table.find(&1).as_deref(), Some("one"));
        assert_eq!(table.find(&2).as_deref(), Some("two"));
    }

    #[test]
    fn test_concurrent_inserts_disjoint_ranges() {
        let table = StdArc::new(ExtendibleHashTable::new(4));
        let threads = 8;
        let per_thread = 1000;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let table = StdArc::clone(&table);
                thread::spawn(move || {
                    let base = t * per_thread;
                    for i in base..base + per_thread {
                        table.insert(i, i * 2);
                        assert_eq!(table.find(&i), Some(i * 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.len(), threads * per_thread);
        for i in 0..threads * per_thread {
            assert_eq!(table.find(&i), Some(i * 2));
        }
        assert!(table.verify_directory());
    }

    #[test]
    fn test_concurrent_mixed_operations() {
        let table = StdArc::new(ExtendibleHashTable::new(2));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let table = StdArc::clone(&table);
                thread::spawn(move || {
                    let base = t * 500;
                    for i in base..base + 500 {
                        table.insert(i, i);
                    }
                    for i in (base..base + 500).step_by(2) {
                        assert!(table.remove(&i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.len(), 4 * 250);
        for t in 0..4 {
            let base = t * 500;
            assert_eq!(table.find(&(base + 1)), Some(base + 1));
            assert_eq!(table.find(&base), None);
        }
    }
}
