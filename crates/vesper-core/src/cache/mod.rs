//! Working-memory cache tier
//!
//! The fast associative layer in front of the semantic graph. Components
//! depend on the [`Cache`] trait rather than a concrete client so tests can
//! substitute the in-process [`MemoryCache`]; a networked key-value store
//! slots in behind the same trait.
//!
//! The trait exposes the minimal primitive set the engine needs: TTL'd
//! values, a recency list, sorted sets for the rate limiter, bounded key
//! scans, and a pipelined `put_indexed` so a conversation write and its
//! recency-index update appear atomic to readers.

mod working;

pub use working::{SkillCacheEntry, WorkingMemory};

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Result, VesperError};

// ============================================================================
// CACHE TRAIT
// ============================================================================

/// Key-value backing store for the working-memory tier
pub trait Cache: Send + Sync {
    /// Read a value; expired keys read as absent
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value with an optional TTL
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Delete a key of any kind; returns whether it existed
    fn delete(&self, key: &str) -> Result<bool>;

    /// Pipelined conversation write. In one atomic step: store `value` under
    /// `entry_key` with `ttl`, push `id` to the front of the `index_key`
    /// list, trim the list to `max_len`, and delete the storage entries
    /// (`entry_prefix` + id) of every trimmed id. Returns the evicted ids.
    ///
    /// Readers must never observe a trimmed-but-still-stored or
    /// deleted-but-still-indexed entry, which is why this is a single trait
    /// operation rather than four calls.
    #[allow(clippy::too_many_arguments)]
    fn put_indexed(
        &self,
        entry_key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        index_key: &str,
        id: &str,
        entry_prefix: &str,
        max_len: usize,
    ) -> Result<Vec<String>>;

    /// Read up to `limit` members from the front of a list
    fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>>;

    /// Append a member to the back of a list
    fn list_push_back(&self, key: &str, member: &str) -> Result<()>;

    /// Pop up to `limit` members from the front of a list
    fn list_pop_front(&self, key: &str, limit: usize) -> Result<Vec<String>>;

    /// Remove all occurrences of a member from a list
    fn list_remove(&self, key: &str, member: &str) -> Result<()>;

    /// Add a scored member to a sorted set
    fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Remove members with score strictly below `min_score`; returns count
    fn zremrangebyscore(&self, key: &str, min_score: f64) -> Result<u64>;

    /// Cardinality of a sorted set
    fn zcard(&self, key: &str) -> Result<u64>;

    /// Reset a key's TTL
    fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Return up to `batch` keys with the given prefix, lexicographically
    /// after `cursor`. Bounded paging keeps full-keyspace sweeps from
    /// blocking the store.
    fn scan_prefix(&self, prefix: &str, cursor: &str, batch: usize) -> Result<Vec<String>>;
}

// ============================================================================
// IN-PROCESS CACHE
// ============================================================================

enum Slot {
    Value(Vec<u8>),
    List(VecDeque<String>),
    ZSet(Vec<(f64, String)>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// In-process [`Cache`] implementation
///
/// A single mutex over the keyspace makes every trait operation atomic,
/// matching the pipelining guarantees a networked store provides with
/// MULTI/EXEC. TTLs expire lazily on access.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.inner
            .lock()
            .map_err(|_| VesperError::Upstream("Cache lock poisoned".to_string()))
    }

    fn purge_if_expired(map: &mut HashMap<String, Entry>, key: &str, now: Instant) {
        if map.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            map.remove(key);
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut map = self.lock()?;
        Self::purge_if_expired(&mut map, key, Instant::now());
        Ok(match map.get(key) {
            Some(Entry {
                slot: Slot::Value(v),
                ..
            }) => Some(v.clone()),
            _ => None,
        })
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut map = self.lock()?;
        map.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value.to_vec()),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut map = self.lock()?;
        Ok(map.remove(key).is_some())
    }

    fn put_indexed(
        &self,
        entry_key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        index_key: &str,
        id: &str,
        entry_prefix: &str,
        max_len: usize,
    ) -> Result<Vec<String>> {
        let mut map = self.lock()?;
        let now = Instant::now();

        map.insert(
            entry_key.to_string(),
            Entry {
                slot: Slot::Value(value.to_vec()),
                expires_at: ttl.map(|d| now + d),
            },
        );

        Self::purge_if_expired(&mut map, index_key, now);
        let expires_at = ttl.map(|d| now + d);
        let entry = map.entry(index_key.to_string()).or_insert_with(|| Entry {
            slot: Slot::List(VecDeque::new()),
            expires_at,
        });
        // Index lives as long as its newest member
        entry.expires_at = expires_at;

        let evicted: Vec<String> = match &mut entry.slot {
            Slot::List(list) => {
                list.retain(|m| m != id);
                list.push_front(id.to_string());
                list.split_off(max_len.min(list.len())).into_iter().collect()
            }
            _ => {
                return Err(VesperError::Integrity(format!(
                    "Key '{index_key}' is not a list"
                )));
            }
        };

        for evicted_id in &evicted {
            map.remove(&format!("{entry_prefix}{evicted_id}"));
        }

        Ok(evicted)
    }

    fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        let mut map = self.lock()?;
        Self::purge_if_expired(&mut map, key, Instant::now());
        Ok(match map.get(key) {
            Some(Entry {
                slot: Slot::List(list),
                ..
            }) => list.iter().take(limit).cloned().collect(),
            _ => vec![],
        })
    }

    fn list_push_back(&self, key: &str, member: &str) -> Result<()> {
        let mut map = self.lock()?;
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::List(list) => {
                list.push_back(member.to_string());
                Ok(())
            }
            _ => Err(VesperError::Integrity(format!("Key '{key}' is not a list"))),
        }
    }

    fn list_pop_front(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        let mut map = self.lock()?;
        Self::purge_if_expired(&mut map, key, Instant::now());
        Ok(match map.get_mut(key) {
            Some(Entry {
                slot: Slot::List(list),
                ..
            }) => {
                let take = limit.min(list.len());
                list.drain(..take).collect()
            }
            _ => vec![],
        })
    }

    fn list_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut map = self.lock()?;
        if let Some(Entry {
            slot: Slot::List(list),
            ..
        }) = map.get_mut(key)
        {
            list.retain(|m| m != member);
        }
        Ok(())
    }

    fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut map = self.lock()?;
        Self::purge_if_expired(&mut map, key, Instant::now());
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::ZSet(Vec::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::ZSet(set) => {
                set.retain(|(_, m)| m != member);
                set.push((score, member.to_string()));
                Ok(())
            }
            _ => Err(VesperError::Integrity(format!(
                "Key '{key}' is not a sorted set"
            ))),
        }
    }

    fn zremrangebyscore(&self, key: &str, min_score: f64) -> Result<u64> {
        let mut map = self.lock()?;
        Ok(match map.get_mut(key) {
            Some(Entry {
                slot: Slot::ZSet(set),
                ..
            }) => {
                let before = set.len();
                set.retain(|(score, _)| *score >= min_score);
                (before - set.len()) as u64
            }
            _ => 0,
        })
    }

    fn zcard(&self, key: &str) -> Result<u64> {
        let mut map = self.lock()?;
        Self::purge_if_expired(&mut map, key, Instant::now());
        Ok(match map.get(key) {
            Some(Entry {
                slot: Slot::ZSet(set),
                ..
            }) => set.len() as u64,
            _ => 0,
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut map = self.lock()?;
        if let Some(entry) = map.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str, cursor: &str, batch: usize) -> Result<Vec<String>> {
        let map = self.lock()?;
        let mut keys: Vec<String> = map
            .keys()
            .filter(|k| k.starts_with(prefix) && k.as_str() > cursor)
            .cloned()
            .collect();
        keys.sort();
        keys.truncate(batch);
        Ok(keys)
    }
}

// ============================================================================
// TESTS
// ============================================================================
