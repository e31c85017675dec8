//! Bounded, expiring in-memory cache.
//!
//! Eviction is by insertion age, not access recency: a `get` never refreshes
//! an entry's position. Expiry is checked lazily on `get`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::counter;
use serde::Serialize;
use tracing::debug;

use crate::key::cache_key;
use crate::names;

/// Memory tier configuration.
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries
    pub max_size: usize,
    /// Time-to-live of an entry, measured from insertion
    pub ttl: Duration,
    /// Tier name for logs and metrics
    pub name: String,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            ttl: Duration::from_secs(24 * 3600),
            name: "memory".to_string(),
        }
    }
}

/// Memory tier statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryCacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups that hit
    pub hit_rate: f64,
}

/// Expiring key/value store keyed by normalized input and a variant tag.
pub struct MemoryCache<V> {
    config: MemoryCacheConfig,
    entries: Mutex<HashMap<String, (V, Instant)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> MemoryCache<V> {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up the value cached for `input` under `variant`.
    pub fn get(&self, input: &str, variant: &str) -> Option<V> {
        self.get_at(&cache_key(input, variant), Instant::now())
    }

    /// Cache `value` for `input` under `variant`.
    pub fn set(&self, input: &str, variant: &str, value: V) {
        self.set_at(cache_key(input, variant), value, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every entry and reset statistics.
    pub fn clear(&self) {
        self.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!(cache = %self.config.name, "Memory cache cleared");
    }

    pub fn stats(&self) -> MemoryCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        MemoryCacheStats {
            size: self.len(),
            max_size: self.config.max_size,
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.lock();

        let fresh = match entries.get(key) {
            Some((value, inserted)) if now.duration_since(*inserted) < self.config.ttl => {
                Some(value.clone())
            }
            Some(_) => {
                entries.remove(key);
                debug!(cache = %self.config.name, key = %key, "Memory cache entry expired");
                None
            }
            None => None,
        };
        drop(entries);

        match fresh {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!(names::CACHE_HITS_TOTAL, "tier" => self.config.name.clone()).increment(1);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!(names::CACHE_MISSES_TOTAL, "tier" => self.config.name.clone()).increment(1);
                None
            }
        }
    }

    pub(crate) fn set_at(&self, key: String, value: V, now: Instant) {
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.config.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, (_, inserted))| *inserted)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                counter!(names::CACHE_EVICTIONS_TOTAL, "tier" => self.config.name.clone())
                    .increment(1);
                debug!(cache = %self.config.name, key = %oldest, "Evicted oldest memory cache entry");
            }
        }

        if self.config.max_size > 0 {
            entries.insert(key, (value, now));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (V, Instant)>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, ttl: Duration) -> MemoryCache<String> {
        MemoryCache::new(MemoryCacheConfig {
            max_size,
            ttl,
            name: "test".to_string(),
        })
    }

    #[test]
    fn test_set_then_get() {
        let cache = cache(10, Duration::from_secs(60));
        cache.set("Draw a Circle", "m", "expanded".to_string());

        assert_eq!(cache.get("draw   a circle", "m"), Some("expanded".to_string()));
        assert_eq!(cache.get("draw a circle", "h"), None);
    }

    #[test]
    fn test_overflow_evicts_exactly_the_oldest() {
        let cache = cache(3, Duration::from_secs(3600));
        let start = Instant::now();

        for (i, prompt) in ["one", "two", "three"].iter().enumerate() {
            cache.set_at(cache_key(prompt, "m"), prompt.to_string(), start + Duration::from_secs(i as u64));
        }
        // Reading "one" must not protect it from eviction.
        assert!(cache.get_at(&cache_key("one", "m"), start + Duration::from_secs(5)).is_some());

        cache.set_at(cache_key("four", "m"), "four".to_string(), start + Duration::from_secs(10));

        let at = start + Duration::from_secs(11);
        assert_eq!(cache.len(), 3);
        assert!(cache.get_at(&cache_key("one", "m"), at).is_none());
        assert!(cache.get_at(&cache_key("two", "m"), at).is_some());
        assert!(cache.get_at(&cache_key("three", "m"), at).is_some());
        assert!(cache.get_at(&cache_key("four", "m"), at).is_some());
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = cache(2, Duration::from_secs(3600));
        cache.set("a", "m", "1".to_string());
        cache.set("b", "m", "2".to_string());
        cache.set("a", "m", "3".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a", "m"), Some("3".to_string()));
        assert_eq!(cache.get("b", "m"), Some("2".to_string()));
    }

    #[test]
    fn test_expired_entry_is_removed_on_get() {
        let cache = cache(10, Duration::from_secs(60));
        let start = Instant::now();
        let key = cache_key("prompt", "m");

        cache.set_at(key.clone(), "value".to_string(), start);
        assert!(cache.get_at(&key, start + Duration::from_secs(59)).is_some());
        assert!(cache.get_at(&key, start + Duration::from_secs(60)).is_none());
        assert!(cache.is_empty(), "expired entry should be deleted");
    }

    #[test]
    fn test_stats_and_clear() {
        let cache = cache(10, Duration::from_secs(60));
        cache.set("a", "m", "1".to_string());
        cache.get("a", "m");
        cache.get("missing", "m");

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits + stats.misses, 0);
    }
}
