use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::{Mutex, MutexGuard},
};

/// Shards of the concurrent map. Writers on distinct shards never contend.
const NUM_SHARDS: usize = 16;

/// String-keyed concurrent map with per-shard locking.
///
/// The shard for a key is picked by a deterministic djb2 hash, so the same
/// key always lands on the same mutex. Single-key accessors return a
/// [`ValueGuard`] that holds the shard lock for its lifetime: the value is
/// only reachable inside the critical section. Whole-map operations
/// (`for_each`, `keys`, `len`) take every shard lock in index order, which
/// keeps them deadlock-free against each other.
///
/// Callers must not touch the same map from inside `for_each` or while
/// holding a guard into it.
#[derive(Debug)]
pub struct ShardMap<V> {
    shards: Vec<Mutex<HashMap<String, V>>>,
}

fn djb2(key: &str) -> u64 {
    let mut hash: u64 = 5381;
    for b in key.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(u64::from(b));
    }
    hash
}

impl<V> Default for ShardMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ShardMap<V> {
    pub fn new() -> Self {
        Self { shards: (0..NUM_SHARDS).map(|_| Mutex::new(HashMap::new())).collect() }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, V>> {
        &self.shards[(djb2(key) as usize) % NUM_SHARDS]
    }

    fn lock_shard<'a>(
        &self,
        shard: &'a Mutex<HashMap<String, V>>,
    ) -> MutexGuard<'a, HashMap<String, V>> {
        shard.lock().expect("shard map lock poisoned")
    }

    /// Scoped accessor: the shard lock is held until the guard is dropped.
    pub fn get(&self, key: &str) -> Option<ValueGuard<'_, V>> {
        let guard = self.lock_shard(self.shard(key));
        if guard.contains_key(key) {
            Some(ValueGuard { guard, key: key.to_owned() })
        } else {
            None
        }
    }

    /// Runs `f` on the entry for `key` (or `None`) under the shard lock.
    pub fn with<R>(&self, key: &str, f: impl FnOnce(Option<&mut V>) -> R) -> R {
        let mut guard = self.lock_shard(self.shard(key));
        f(guard.get_mut(key))
    }

    /// Inserts `value` only when `key` is absent. The check-and-insert is
    /// atomic under the shard lock; on collision the value comes back to the
    /// caller untouched.
    pub fn insert_if_absent(&self, key: &str, value: V) -> Result<(), V> {
        let mut guard = self.lock_shard(self.shard(key));
        if guard.contains_key(key) {
            Err(value)
        } else {
            guard.insert(key.to_owned(), value);
            Ok(())
        }
    }

    /// Removes the entry, returning the prior value so the caller can
    /// release whatever it owns.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock_shard(self.shard(key)).remove(key)
    }

    /// Visits every entry while holding all shard locks, acquired in index
    /// order. `f` must not re-enter this map or acquire any lock that
    /// precedes shard locks in the server lock order.
    pub fn for_each(&self, mut f: impl FnMut(&str, &mut V)) {
        let mut guards: Vec<_> = self.shards.iter().map(|s| self.lock_shard(s)).collect();
        for guard in &mut guards {
            for (k, v) in guard.iter_mut() {
                f(k, v);
            }
        }
    }

    /// Snapshot of all keys, taken under all shard locks.
    pub fn keys(&self) -> Vec<String> {
        let guards: Vec<_> = self.shards.iter().map(|s| self.lock_shard(s)).collect();
        guards.iter().flat_map(|g| g.keys().cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| self.lock_shard(s).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shard-lock-holding reference to a single value.
pub struct ValueGuard<'a, V> {
    guard: MutexGuard<'a, HashMap<String, V>>,
    key: String,
}

impl<V> Deref for ValueGuard<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        self.guard.get(&self.key).expect("guarded key vanished")
    }
}

impl<V> DerefMut for ValueGuard<'_, V> {
    fn deref_mut(&mut self) -> &mut V {
        self.guard.get_mut(&self.key).expect("guarded key vanished")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn insert_get_remove() {
        let map = ShardMap::new();
        assert!(map.insert_if_absent("alice", 1).is_ok());
        assert_eq!(*map.get("alice").unwrap(), 1);
        assert!(map.get("bob").is_none());
        assert_eq!(map.remove("alice"), Some(1));
        assert_eq!(map.remove("alice"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn insert_if_absent_rejects_duplicates() {
        let map = ShardMap::new();
        assert!(map.insert_if_absent("k", 1).is_ok());
        assert_eq!(map.insert_if_absent("k", 2), Err(2));
        assert_eq!(*map.get("k").unwrap(), 1);
    }

    #[test]
    fn guard_mutation_persists() {
        let map = ShardMap::new();
        map.insert_if_absent("k", vec![1]).unwrap();
        map.get("k").unwrap().push(2);
        assert_eq!(*map.get("k").unwrap(), vec![1, 2]);
    }

    #[test]
    fn with_sees_absent_and_present() {
        let map = ShardMap::new();
        assert_eq!(map.with("k", |v| v.is_some()), false);
        map.insert_if_absent("k", 10).unwrap();
        map.with("k", |v| *v.unwrap() += 1);
        assert_eq!(*map.get("k").unwrap(), 11);
    }

    #[test]
    fn for_each_and_keys_cover_all_shards() {
        let map = ShardMap::new();
        for i in 0..100 {
            map.insert_if_absent(&format!("user{i}"), i).unwrap();
        }
        assert_eq!(map.len(), 100);

        let mut seen = 0;
        map.for_each(|_, v| {
            *v += 1;
            seen += 1;
        });
        assert_eq!(seen, 100);

        let mut keys = map.keys();
        keys.sort();
        assert_eq!(keys.len(), 100);
        assert_eq!(*map.get("user0").unwrap(), 1);
    }

    #[test]
    fn insert_if_absent_is_atomic_under_contention() {
        let map = Arc::new(ShardMap::new());
        let winners: Vec<_> = (0..8)
            .map(|i| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || map.insert_if_absent("nick", i).is_ok())
            })
            .collect();
        let inserted = winners
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn djb2_is_deterministic() {
        assert_eq!(djb2("alice"), djb2("alice"));
        assert_ne!(djb2("alice"), djb2("bob"));
    }
}
