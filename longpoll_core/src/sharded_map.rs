//! A sharded concurrent map for reducing lock contention.
//!
//! [`ShardedMap`] spreads entries across `N` shards, each behind its own async
//! mutex, so operations on unrelated keys rarely wait on each other. Shard
//! selection uses SipHash-2-4 with a random key, which keeps remote peers from
//! choosing identities that all land on one shard.
//!
//! Lookups accept any borrowed form of the key (`&str` for `String` keys).
//! Every method holds at most one shard lock, and never across an `.await`
//! outside the map.

use core::{
    borrow::Borrow,
    hash::{Hash, Hasher},
};
use std::collections::BTreeMap;

use async_lock::Mutex;
use siphasher::sip::SipHasher24;

/// A sharded concurrent map with `N` independent shards.
#[derive(Debug)]
pub struct ShardedMap<K, V, const N: usize = 64> {
    shards: [Mutex<BTreeMap<K, V>>; N],
    key0: u64,
    key1: u64,
}

impl<K: Ord + Hash, V, const N: usize> ShardedMap<K, V, N> {
    /// Creates an empty map with a random SipHash key.
    #[must_use]
    pub fn new() -> Self {
        let (key0, key1) = rand::random();
        Self::with_key(key0, key1)
    }

    /// Creates an empty map with the given SipHash keys.
    ///
    /// Deterministic; intended for tests.
    #[must_use]
    pub fn with_key(key0: u64, key1: u64) -> Self {
        Self {
            shards: core::array::from_fn(|_| Mutex::new(BTreeMap::new())),
            key0,
            key1,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn shard_index<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
        let mut hasher = SipHasher24::new_with_keys(self.key0, self.key1);
        key.hash(&mut hasher);
        (hasher.finish() as usize) % N
    }

    #[allow(clippy::indexing_slicing)] // shard_index is always < N
    fn shard<Q: Hash + ?Sized>(&self, key: &Q) -> &Mutex<BTreeMap<K, V>> {
        &self.shards[self.shard_index(key)]
    }

    /// Gets a cloned value for the given key.
    pub async fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + Hash + ?Sized,
        V: Clone,
    {
        self.shard(key).lock().await.get(key).cloned()
    }

    /// Returns `true` if the map contains the given key.
    pub async fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + Hash + ?Sized,
    {
        self.shard(key).lock().await.contains_key(key)
    }

    /// Inserts `value` only if `key` is vacant.
    ///
    /// Returns the rejected value if the key was already present.
    pub async fn insert_if_absent(&self, key: K, value: V) -> Result<(), V> {
        let mut shard = self.shard(&key).lock().await;
        if shard.contains_key(&key) {
            return Err(value);
        }
        shard.insert(key, value);
        Ok(())
    }

    /// Returns the existing value for `key`, or inserts the one built by `make`.
    ///
    /// The boolean is `true` when `make` ran. Check and insert happen under a
    /// single shard lock.
    pub async fn get_or_insert_with<F>(&self, key: K, make: F) -> (V, bool)
    where
        V: Clone,
        F: FnOnce() -> V,
    {
        let mut shard = self.shard(&key).lock().await;
        if let Some(existing) = shard.get(&key) {
            return (existing.clone(), false);
        }
        let value = make();
        shard.insert(key, value.clone());
        (value, true)
    }

    /// Removes a key, returning its value if present.
    pub async fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + Hash + ?Sized,
    {
        self.shard(key).lock().await.remove(key)
    }

    /// Removes a key only if `predicate` accepts its current value.
    pub async fn remove_if<Q, F>(&self, key: &Q, predicate: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + Hash + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        let mut shard = self.shard(key).lock().await;
        if shard.get(key).is_some_and(predicate) {
            shard.remove(key)
        } else {
            None
        }
    }

    /// Returns `true` if `predicate` accepts the value stored under `key`.
    pub async fn test<Q, F>(&self, key: &Q, predicate: F) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + Hash + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        self.shard(key).lock().await.get(key).is_some_and(predicate)
    }

    /// Collects all keys.
    ///
    /// Shard locks are taken one at a time, so the result is not an atomic
    /// snapshot of the whole map.
    pub async fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let mut keys = Vec::new();
        for shard in &self.shards {
            keys.extend(shard.lock().await.keys().cloned());
        }
        keys
    }

    /// Collects all values, one shard at a time.
    pub async fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        let mut values = Vec::new();
        for shard in &self.shards {
            values.extend(shard.lock().await.values().cloned());
        }
        values
    }

    /// Returns the total number of entries, one shard at a time.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.lock().await.len();
        }
        total
    }

    /// Returns `true` if no shard holds an entry.
    pub async fn is_empty(&self) -> bool {
        for shard in &self.shards {
            if !shard.lock().await.is_empty() {
                return false;
            }
        }
        true
    }
}

impl<K: Ord + Hash, V, const N: usize> Default for ShardedMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}
