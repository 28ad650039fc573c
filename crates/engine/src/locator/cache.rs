//! Time-boxed cache of resolved element handles
//!
//! Entries are keyed by locator identity `(strategy, selector)` and bounded
//! by the number of distinct locators in a run, so no size limit is kept.
//! The cache never owns the handles it stores; the manager re-validates
//! liveness with the driver before trusting an entry.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use testgrid_common::Locator;

use crate::driver::ElementHandle;

struct CacheEntry {
    handle: ElementHandle,
    cached_at: Instant,
}

/// Snapshot of cache contents for diagnostics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub size: usize,
    pub ttl: Duration,
    pub keys: Vec<String>,
}

pub struct LocatorCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

impl LocatorCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Return the cached handle for this locator unless the entry has
    /// outlived the TTL, in which case it is evicted on the spot.
    /// Liveness against the driver is the caller's responsibility.
    pub fn get(&mut self, locator: &Locator) -> Option<ElementHandle> {
        let key = locator.cache_key();
        let expired = match self.entries.get(&key) {
            Some(entry) => entry.cached_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(&key);
            debug!("Evicted expired cache entry: {}", key);
            return None;
        }
        self.entries.get(&key).map(|e| e.handle.clone())
    }

    pub fn set(&mut self, locator: &Locator, handle: ElementHandle) {
        let key = locator.cache_key();
        debug!("Cached element handle: {}", key);
        self.entries.insert(
            key,
            CacheEntry {
                handle,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, locator: &Locator) {
        if self.entries.remove(&locator.cache_key()).is_some() {
            debug!("Evicted cache entry: {}", locator.cache_key());
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            ttl: self.ttl,
            keys: self.entries.keys().cloned().collect(),
        }
    }

    #[cfg(test)]
    fn backdate(&mut self, locator: &Locator, age: Duration) {
        if let Some(entry) = self.entries.get_mut(&locator.cache_key()) {
            entry.cached_at = Instant::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testgrid_common::LocatorStrategy;

    fn locator(selector: &str) -> Locator {
        Locator::new(LocatorStrategy::CssSelector, selector)
    }

    #[test]
    fn test_hit_within_ttl() {
        let mut cache = LocatorCache::new(Duration::from_secs(300));
        cache.set(&locator("#a"), ElementHandle::new(1));
        assert_eq!(cache.get(&locator("#a")), Some(ElementHandle::new(1)));
    }

    #[test]
    fn test_expired_entry_never_returned() {
        let mut cache = LocatorCache::new(Duration::from_secs(300));
        let loc = locator("#a");
        cache.set(&loc, ElementHandle::new(1));
        cache.backdate(&loc, Duration::from_secs(301));
        assert_eq!(cache.get(&loc), None);
        // Lazy eviction removed the entry on that access
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_is_strategy_plus_selector() {
        let mut cache = LocatorCache::new(Duration::from_secs(300));
        cache.set(&locator("#a"), ElementHandle::new(1));
        let xpath = Locator::new(LocatorStrategy::Xpath, "#a");
        assert_eq!(cache.get(&xpath), None);
        let mut slow = locator("#a");
        slow.timeout_ms = 60_000;
        assert_eq!(cache.get(&slow), Some(ElementHandle::new(1)));
    }

    #[test]
    fn test_stats() {
        let mut cache = LocatorCache::new(Duration::from_secs(10));
        cache.set(&locator("#a"), ElementHandle::new(1));
        cache.set(&locator("#b"), ElementHandle::new(2));
        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.ttl, Duration::from_secs(10));
        assert!(stats.keys.contains(&"css_selector:#a".to_string()));
    }
}
