//! Typed TTL cache for read models
//!
//! Dashboard-style reads answer from cached aggregates or a single
//! indexed query; ingestion never blocks the read path. The cache is a
//! first-class object with explicit per-profile invalidation, called by
//! the write paths after they commit.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default entry lifetime
const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// A TTL cache keyed by (profile, name). Values are whatever read model
/// the caller serializes into it.
pub struct ReadCache<V> {
    entries: Mutex<HashMap<(String, String), Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> ReadCache<V> {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// A live value, or None when absent or expired
    pub fn get(&self, profile_id: &str, name: &str) -> Option<V> {
        let mut entries = self.entries.lock().expect("cache lock");
        let key = (profile_id.to_string(), name.to_string());
        match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, profile_id: &str, name: &str, value: V) {
        let mut entries = self.entries.lock().expect("cache lock");
        entries.insert(
            (profile_id.to_string(), name.to_string()),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every entry for a profile. Write paths call this after commit.
    pub fn invalidate(&self, profile_id: &str) {
        let mut entries = self.entries.lock().expect("cache lock");
        entries.retain(|(profile, _), _| profile != profile_id);
    }

    /// Get or compute-and-store
    pub fn get_or_insert_with<F, E>(&self, profile_id: &str, name: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(profile_id, name) {
            return Ok(value);
        }
        let value = compute()?;
        self.put(profile_id, name, value.clone());
        Ok(value)
    }
}

impl<V: Clone> Default for ReadCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache: ReadCache<i64> = ReadCache::new();
        assert_eq!(cache.get("p1", "total"), None);
        cache.put("p1", "total", 42);
        assert_eq!(cache.get("p1", "total"), Some(42));
        assert_eq!(cache.get("p2", "total"), None);
    }

    #[test]
    fn test_expiry() {
        let cache: ReadCache<i64> = ReadCache::with_ttl(Duration::from_millis(0));
        cache.put("p1", "total", 42);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("p1", "total"), None);
    }

    #[test]
    fn test_invalidate_is_per_profile() {
        let cache: ReadCache<i64> = ReadCache::new();
        cache.put("p1", "total", 1);
        cache.put("p1", "count", 2);
        cache.put("p2", "total", 3);

        cache.invalidate("p1");
        assert_eq!(cache.get("p1", "total"), None);
        assert_eq!(cache.get("p1", "count"), None);
        assert_eq!(cache.get("p2", "total"), Some(3));
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let cache: ReadCache<i64> = ReadCache::new();
        let mut calls = 0;
        for _ in 0..3 {
            let value: Result<i64, ()> = cache.get_or_insert_with("p1", "total", || {
                calls += 1;
                Ok(7)
            });
            assert_eq!(value, Ok(7));
        }
        assert_eq!(calls, 1);
    }
}
