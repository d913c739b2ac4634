// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sharded lock table for per-key atomic updates.
//!
//! Quota checks are check-then-act sequences (read the counter, compare,
//! increment); two concurrent calls for the same key must serialize on one
//! lock or both can pass a full quota. A single global mutex would do that
//! but serializes unrelated keys too, so the map is split into a fixed
//! number of shards and a key only contends with keys hashing to its shard.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

const SHARD_COUNT: usize = 16;

/// A `HashMap<String, V>` split across `SHARD_COUNT` independently locked
/// shards. All access goes through [`ShardedMap::with_entry`], which holds
/// exactly one shard lock for the duration of the closure.
pub struct ShardedMap<V> {
    shards: Vec<Mutex<HashMap<String, V>>>,
}

impl<V> ShardedMap<V> {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, key: &str) -> &Mutex<HashMap<String, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Run `f` with exclusive access to the entry for `key`.
    ///
    /// The closure sees `&mut Option<V>` so it can create, mutate, or remove
    /// the entry in one atomic step. The shard lock is held only for the
    /// closure; callers must not block inside it.
    pub fn with_entry<R>(&self, key: &str, f: impl FnOnce(&mut Option<V>) -> R) -> R {
        let shard = self.shard_for(key);
        let mut map = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut slot = map.remove(key);
        let result = f(&mut slot);
        if let Some(value) = slot {
            map.insert(key.to_string(), value);
        }
        result
    }

    /// Remove every entry for which `predicate` returns true.
    ///
    /// Takes each shard lock in turn, so a sweep cannot race an in-flight
    /// [`ShardedMap::with_entry`] on the same key.
    pub fn retain(&self, mut predicate: impl FnMut(&str, &V) -> bool) {
        for shard in &self.shards {
            let mut map = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.retain(|key, value| predicate(key, value));
        }
    }

    /// Total entry count across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .len()
            })
            .sum()
    }
}

impl<V> Default for ShardedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn with_entry_creates_and_mutates() {
        let map: ShardedMap<u32> = ShardedMap::new();
        map.with_entry("a", |slot| *slot = Some(1));
        let value = map.with_entry("a", |slot| {
            let v = slot.as_mut().unwrap();
            *v += 1;
            *v
        });
        assert_eq!(value, 2);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn with_entry_can_remove() {
        let map: ShardedMap<u32> = ShardedMap::new();
        map.with_entry("a", |slot| *slot = Some(1));
        map.with_entry("a", |slot| *slot = None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn retain_drops_matching_entries() {
        let map: ShardedMap<u32> = ShardedMap::new();
        for i in 0..50 {
            map.with_entry(&format!("key-{i}"), |slot| *slot = Some(i));
        }
        map.retain(|_, v| *v % 2 == 0);
        assert_eq!(map.len(), 25);
    }

    #[test]
    fn concurrent_increments_do_not_lose_updates() {
        let map: Arc<ShardedMap<u64>> = Arc::new(ShardedMap::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = Arc::clone(&map);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    map.with_entry("counter", |slot| {
                        *slot = Some(slot.unwrap_or(0) + 1);
                    });
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let total = map.with_entry("counter", |slot| slot.unwrap());
        assert_eq!(total, 8000);
    }
}
