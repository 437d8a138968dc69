//! Bounded TTL store for query results
//!
//! Expiry is lazy: an expired entry is treated as absent by [`CacheStore::get`]
//! but keeps its slot (and counts toward [`CacheStore::len`]) until it is
//! overwritten, evicted or cleared. Eviction is FIFO by write time: when the
//! store is full, inserting a new key drops the entry with the oldest
//! `stored_at`. Reads never refresh `stored_at`.

use crate::config::CacheConfig;
use crate::query_key::QueryKey;
use dashcache_common::MAX_TTL_SECS;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A stored value with its lifetime bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub stored_at: Instant,
    pub expires_at: Instant,
    pub key: QueryKey,
    /// Write sequence number, breaks ties between equal `stored_at`
    seq: u64,
}

impl<T> CacheEntry<T> {
    /// Whether the entry is stale at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn age_rank(&self) -> (Instant, u64) {
        (self.stored_at, self.seq)
    }
}

/// Store statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Occupied slots, expired-but-unswept entries included
    pub size: usize,
    pub max_size: usize,
    pub ttl: Duration,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                self.hits as f64 / total as f64
            }
        } else {
            0.0
        };
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

struct Slots<T> {
    entries: HashMap<QueryKey, CacheEntry<T>>,
    next_seq: u64,
}

/// Bounded key/value store with per-entry TTL
pub struct CacheStore<T> {
    slots: RwLock<Slots<T>>,
    counters: RwLock<Counters>,
    config: CacheConfig,
}

impl<T: Clone> CacheStore<T> {
    /// Create a store with the given configuration
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            slots: RwLock::new(Slots {
                entries: HashMap::with_capacity(config.max_size.min(1024)),
                next_seq: 0,
            }),
            counters: RwLock::new(Counters::default()),
            config,
        }
    }

    /// Create a store with default configuration
    #[must_use]
    pub fn new_default() -> Self {
        Self::new(CacheConfig::default())
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live value
    ///
    /// Returns `None` for absent keys and for entries whose `expires_at` has passed.
    pub fn get(&self, key: &QueryKey) -> Option<T> {
        let now = Instant::now();
        let found = {
            let slots = self.slots.read();
            slots
                .entries
                .get(key)
                .filter(|entry| !entry.is_expired_at(now))
                .map(|entry| entry.value.clone())
        };

        if found.is_some() {
            self.record_hit();
        } else {
            self.record_miss();
        }
        found
    }

    /// Clone of the live entry for `key`, without touching hit/miss counters
    pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry<T>> {
        let now = Instant::now();
        self.slots
            .read()
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
    }

    /// Whether `key` holds a live value, without touching hit/miss counters
    pub fn contains(&self, key: &QueryKey) -> bool {
        let now = Instant::now();
        self.slots
            .read()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    /// Insert or overwrite `key`
    ///
    /// When the store is full and `key` is new, exactly one entry (the oldest
    /// write) is evicted first.
    pub fn set(&self, key: QueryKey, value: T) {
        if self.config.max_size == 0 {
            debug!("Cache disabled (max_size = 0), dropping {}", key);
            return;
        }

        let now = Instant::now();
        // TTLs past the clock's range are capped instead of overflowing
        let expires_at = now
            .checked_add(self.config.ttl)
            .unwrap_or_else(|| now + Duration::from_secs(MAX_TTL_SECS));
        let mut slots = self.slots.write();

        if slots.entries.len() >= self.config.max_size && !slots.entries.contains_key(&key) {
            let oldest = slots
                .entries
                .values()
                .min_by_key(|entry| entry.age_rank())
                .map(|entry| entry.key.clone());
            if let Some(victim) = oldest {
                slots.entries.remove(&victim);
                self.record_eviction();
                debug!("Evicted oldest cache entry: {}", victim);
            }
        }

        let seq = slots.next_seq;
        slots.next_seq += 1;
        slots.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                stored_at: now,
                expires_at,
                key,
                seq,
            },
        );
    }

    /// Remove a single key, returning whether it was present
    pub fn remove(&self, key: &QueryKey) -> bool {
        self.slots.write().entries.remove(key).is_some()
    }

    /// Remove every entry whose key matches `predicate`, returning how many were dropped
    pub fn clear_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&QueryKey) -> bool,
    {
        let mut slots = self.slots.write();
        let before = slots.entries.len();
        slots.entries.retain(|key, _| !predicate(key));
        before - slots.entries.len()
    }

    /// Remove every entry of one logical query type
    pub fn clear_namespace(&self, namespace: &str) -> usize {
        let removed = self.clear_matching(|key| key.is_in(namespace));
        debug!("Cleared {} cache entries in namespace '{}'", removed, namespace);
        removed
    }

    /// Remove everything
    pub fn clear_all(&self) {
        self.slots.write().entries.clear();
    }

    /// Occupied slots, including expired entries not yet overwritten or evicted
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of size, limits and counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        // read size first so the two locks never nest here
        let size = self.len();
        let counters = self.counters.read();
        let mut stats = CacheStats {
            size,
            max_size: self.config.max_size,
            ttl: self.config.ttl,
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            hit_rate: 0.0,
        };
        stats.calculate_hit_rate();
        stats
    }

    /// Reset hit/miss/eviction counters
    pub fn reset_stats(&self) {
        *self.counters.write() = Counters::default();
    }

    fn record_hit(&self) {
        self.counters.write().hits += 1;
        #[cfg(feature = "observability")]
        metrics::counter!(crate::observability::metric_names::CACHE_HITS).increment(1);
    }

    fn record_miss(&self) {
        self.counters.write().misses += 1;
        #[cfg(feature = "observability")]
        metrics::counter!(crate::observability::metric_names::CACHE_MISSES).increment(1);
    }

    fn record_eviction(&self) {
        self.counters.write().evictions += 1;
        #[cfg(feature = "observability")]
        metrics::counter!(crate::observability::metric_names::CACHE_EVICTIONS).increment(1);
    }
}

impl<T: Clone> Default for CacheStore<T> {
    fn default() -> Self {
        Self::new_default()
    }
}
