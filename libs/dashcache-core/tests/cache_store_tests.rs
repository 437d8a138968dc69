//! Cache store behaviour tests
//!
//! Capacity and introspection of the bounded TTL store through the public API.

use dashcache_core::{CacheConfig, CacheStats, CacheStore, QueryKey};
use proptest::prelude::*;
use std::time::Duration;

fn key(name: &str) -> QueryKey {
    QueryKey::from(format!("dataset:{name}"))
}

/// ttl=5s, max_size=2: the third insert evicts the first
#[tokio::test(start_paused = true)]
async fn test_three_inserts_into_two_slots() {
    let store = CacheStore::new(CacheConfig::new(Duration::from_secs(5), 2));

    store.set(key("A"), 1);
    store.set(key("B"), 2);
    store.set(key("C"), 3);

    assert_eq!(store.get(&key("A")), None);
    assert_eq!(store.get(&key("B")), Some(2));
    assert_eq!(store.get(&key("C")), Some(3));
    assert_eq!(store.stats().evictions, 1);
}

#[test]
fn test_stats_have_no_side_effects() {
    let store = CacheStore::new(CacheConfig::new(Duration::from_secs(30), 8));
    store.set(key("A"), 1);
    let _ = store.get(&key("A"));
    let _ = store.get(&key("B"));

    let first = store.stats();
    let second = store.stats();
    assert_eq!(first.size, second.size);
    assert_eq!(first.hits, second.hits);
    assert_eq!(first.misses, second.misses);
    assert!((first.hit_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(first.ttl, Duration::from_secs(30));
    assert_eq!(first.max_size, 8);
}

#[test]
fn test_hit_rate_with_no_traffic() {
    let mut stats = CacheStats {
        size: 0,
        max_size: 10,
        ttl: Duration::from_secs(1),
        hits: 0,
        misses: 0,
        evictions: 0,
        hit_rate: 1.0,
    };
    stats.calculate_hit_rate();
    assert_eq!(stats.hit_rate, 0.0);
}

proptest! {
    /// Inserting max_size + 1 distinct keys keeps max_size entries and drops the first
    #[test]
    fn prop_capacity_drops_first_inserted(max_size in 1usize..32) {
        let store = CacheStore::new(CacheConfig::new(Duration::from_secs(300), max_size));
        for i in 0..=max_size {
            store.set(key(&i.to_string()), i);
        }

        prop_assert_eq!(store.stats().size, max_size);
        prop_assert!(!store.contains(&key("0")));
        prop_assert!(store.contains(&key(&max_size.to_string())));
    }
}
