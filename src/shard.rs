//! A fixed-shard keyed-lock map.
//!
//! The Match State Store, Lock Arbiter, and Train Registry all need
//! per-key serialization without forcing unrelated keys to contend on one
//! lock. Each shards its table into `N` independent mutexes chosen by
//! hashing the key, the same idea as `TrackStore`'s `stores: Vec<Mutex<...>>`
//! in the map-matching library this crate borrows its concurrency model
//! from — a single `id % num_shards` pick instead of one global lock.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::Mutex;

const DEFAULT_SHARDS: usize = 16;

pub struct ShardedMap<K, V> {
    shards: Vec<Mutex<HashMap<K, V>>>,
}

impl<K, V> ShardedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_index(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    pub async fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let shard = &self.shards[self.shard_index(key)];
        let guard = shard.lock().await;
        guard.get(key).cloned()
    }

    pub async fn insert(&self, key: K, value: V) -> Option<V> {
        let idx = self.shard_index(&key);
        let shard = &self.shards[idx];
        let mut guard = shard.lock().await;
        guard.insert(key, value)
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        let shard = &self.shards[self.shard_index(key)];
        let mut guard = shard.lock().await;
        guard.remove(key)
    }

    /// Runs `f` with exclusive access to the shard that owns `key`,
    /// letting callers perform a read-modify-write without a second
    /// round trip through the map.
    pub async fn with_entry<R>(&self, key: &K, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R {
        let shard = &self.shards[self.shard_index(key)];
        let mut guard = shard.lock().await;
        f(&mut guard)
    }

    /// Snapshot of every entry across all shards. Used for `list()`-style
    /// operations and for writing the full table back to the store.
    pub async fn snapshot(&self) -> Vec<V>
    where
        V: Clone,
    {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock().await;
            out.extend(guard.values().cloned());
        }
        out
    }
}

impl<K, V> Default for ShardedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
