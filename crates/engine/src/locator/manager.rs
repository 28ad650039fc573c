//! Locator manager: cache-first resolution and blocking waits
//!
//! One manager is bound to one driver session and owns a fresh cache; it is
//! never shared across concurrent runs on different resources.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use testgrid_common::{Error, Locator, Result, WaitCondition};

use crate::driver::{ElementHandle, ExecutionDriver};
use crate::locator::cache::{CacheStats, LocatorCache};

pub struct LocatorManager {
    driver: Arc<dyn ExecutionDriver>,
    cache: Mutex<LocatorCache>,
}

impl LocatorManager {
    pub fn new(driver: Arc<dyn ExecutionDriver>, cache_ttl: Duration) -> Self {
        Self {
            driver,
            cache: Mutex::new(LocatorCache::new(cache_ttl)),
        }
    }

    /// Resolve a locator to a live handle.
    ///
    /// With `use_cache`, a cached handle is returned only if it is within
    /// TTL and still answers the driver's liveness probe; a dead entry is
    /// evicted on the access that discovers it and the lookup falls through
    /// to a fresh find.
    pub async fn find(&self, locator: &Locator, use_cache: bool) -> Result<ElementHandle> {
        if use_cache {
            let cached = self.cache.lock().get(locator);
            if let Some(handle) = cached {
                if self.driver.is_alive(&handle).await {
                    debug!("Cache hit: {}", locator);
                    return Ok(handle);
                }
                self.cache.lock().remove(locator);
                debug!("Cache entry for {} failed liveness probe", locator);
            }
        }

        let handle = self.driver.find(locator).await?;
        if use_cache {
            self.cache.lock().set(locator, handle.clone());
        }
        Ok(handle)
    }

    /// Block until the element satisfies `condition` or the timeout
    /// elapses. The driver's state probe is re-issued on every poll; a
    /// handle from an earlier poll is never reused. The condition is
    /// checked once before any sleep, so an element that already qualifies
    /// resolves without polling delay.
    pub async fn wait_for(
        &self,
        locator: &Locator,
        condition: WaitCondition,
        timeout: Option<Duration>,
    ) -> Result<ElementHandle> {
        let timeout = timeout.unwrap_or_else(|| locator.timeout());
        let poll = locator.poll_interval().max(Duration::from_millis(1));
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(handle) = self.driver.check(locator, condition).await? {
                self.cache.lock().set(locator, handle.clone());
                return Ok(handle);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout {
                    what: format!("{} to become {}", locator, condition),
                    millis: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Drop the cached handle for a locator. Called after an operation on
    /// a cached handle observes a failure.
    pub fn invalidate(&self, locator: &Locator) {
        self.cache.lock().remove(locator);
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub fn driver(&self) -> &Arc<dyn ExecutionDriver> {
        &self.driver
    }
}
