//! Resource pool: registration, allocation, release, status lifecycle

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use testgrid_common::config::AllocationConfig;
use testgrid_common::{Error, Resource, ResourceStatus, ResourceType, Result};

use crate::health::HealthChecker;
use crate::validator::ResourceValidator;

/// Owns all registered resources, indexed by id and by type.
///
/// All mutation happens inside one write-lock section, so two concurrent
/// `allocate` calls for the same type can never both observe a resource as
/// available. Instances are injected where needed; there is no global pool.
pub struct ResourcePool {
    inner: RwLock<PoolInner>,
    allocation: AllocationConfig,
}

#[derive(Default)]
struct PoolInner {
    resources: HashMap<String, Resource>,
    /// Resource ids per type, in registration order
    by_type: HashMap<ResourceType, Vec<String>>,
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new(AllocationConfig::default())
    }
}

impl ResourcePool {
    pub fn new(allocation: AllocationConfig) -> Self {
        Self {
            inner: RwLock::new(PoolInner::default()),
            allocation,
        }
    }

    /// Register a resource after validating its per-type configuration
    pub fn add(&self, resource: Resource) -> Result<()> {
        ResourceValidator::validate(resource.resource_type, &resource.config)?;

        let mut inner = self.inner.write();
        if inner.resources.contains_key(&resource.id) {
            return Err(Error::DuplicateResource {
                id: resource.id.clone(),
            });
        }
        info!(
            "Registered resource {} ({})",
            resource.id, resource.resource_type
        );
        inner
            .by_type
            .entry(resource.resource_type)
            .or_default()
            .push(resource.id.clone());
        inner.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Deregister a resource. An in-use resource must be released first.
    pub fn remove(&self, id: &str) -> Result<Resource> {
        let mut inner = self.inner.write();
        let resource = inner
            .resources
            .get(id)
            .ok_or_else(|| Error::ResourceNotFound { id: id.to_string() })?;
        if resource.status == ResourceStatus::InUse {
            return Err(Error::ResourceOperation(format!(
                "resource {} is in use by {}; release it before removing",
                id,
                resource.allocated_to.as_deref().unwrap_or("unknown")
            )));
        }
        let resource = inner
            .resources
            .remove(id)
            .ok_or_else(|| Error::ResourceNotFound { id: id.to_string() })?;
        if let Some(ids) = inner.by_type.get_mut(&resource.resource_type) {
            ids.retain(|r| r != id);
        }
        info!("Removed resource {}", id);
        Ok(resource)
    }

    pub fn get(&self, id: &str) -> Option<Resource> {
        self.inner.read().resources.get(id).cloned()
    }

    /// Allocate the first available resource of `resource_type`, scanning in
    /// registration order. Returns `None` when none are available; callers
    /// treat that as a capacity signal, not a fault.
    pub fn allocate(&self, resource_type: ResourceType, owner: &str) -> Option<Resource> {
        let mut inner = self.inner.write();
        let ids = inner.by_type.get(&resource_type)?.clone();
        for id in ids {
            let resource = inner.resources.get_mut(&id)?;
            if resource.status == ResourceStatus::Available {
                resource.mark_in_use(owner);
                debug!("Allocated {} to {}", id, owner);
                return Some(resource.clone());
            }
        }
        None
    }

    /// Allocate with bounded retry/backoff when the pool is exhausted.
    ///
    /// Retries with exponentially increasing sleeps until a resource frees
    /// up or the configured wait timeout elapses; the final answer is still
    /// `None` on sustained exhaustion, never an error.
    pub async fn allocate_with_retry(
        &self,
        resource_type: ResourceType,
        owner: &str,
    ) -> Option<Resource> {
        let deadline =
            std::time::Instant::now() + Duration::from_millis(self.allocation.wait_timeout_ms);
        let mut backoff = Duration::from_millis(self.allocation.initial_backoff_ms.max(1));
        let max_backoff = Duration::from_millis(self.allocation.max_backoff_ms.max(1));

        loop {
            if let Some(resource) = self.allocate(resource_type, owner) {
                return Some(resource);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                warn!(
                    "No {} resource became available within {}ms",
                    resource_type, self.allocation.wait_timeout_ms
                );
                return None;
            }
            let sleep = backoff.min(deadline - now);
            tokio::time::sleep(sleep).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    /// Release an allocated resource back to the pool. Releasing a resource
    /// that is already available is a no-op.
    pub fn release(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let resource = inner
            .resources
            .get_mut(id)
            .ok_or_else(|| Error::ResourceNotFound { id: id.to_string() })?;
        if resource.status == ResourceStatus::InUse {
            resource.mark_available();
            debug!("Released {}", id);
        }
        Ok(())
    }

    /// Administrative status transition. Does not touch `allocated_to`.
    pub fn update_status(
        &self,
        id: &str,
        status: ResourceStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let resource = inner
            .resources
            .get_mut(id)
            .ok_or_else(|| Error::ResourceNotFound { id: id.to_string() })?;
        resource.status = status;
        resource.error_message = error_message;
        resource.touch();
        Ok(())
    }

    /// Probe the resource's health. A failed probe marks the resource
    /// `error` and bumps its error count; the resource is never removed.
    pub async fn health_check(&self, id: &str, checker: &HealthChecker) -> Result<bool> {
        let resource = self
            .get(id)
            .ok_or_else(|| Error::ResourceNotFound { id: id.to_string() })?;

        // Probe without holding the lock
        let healthy = checker.check(&resource).await?;
        if !healthy {
            let mut inner = self.inner.write();
            if let Some(resource) = inner.resources.get_mut(id) {
                resource.mark_error(format!("health check failed for {}", resource.name));
            }
            warn!("Health check failed for {}", id);
        }
        Ok(healthy)
    }

    pub fn get_by_type(&self, resource_type: ResourceType) -> Vec<Resource> {
        let inner = self.inner.read();
        inner
            .by_type
            .get(&resource_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.resources.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_by_status(&self, status: ResourceStatus) -> Vec<Resource> {
        self.inner
            .read()
            .resources
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    pub fn count(&self, resource_type: Option<ResourceType>) -> usize {
        let inner = self.inner.read();
        match resource_type {
            Some(t) => inner.by_type.get(&t).map(|ids| ids.len()).unwrap_or(0),
            None => inner.resources.len(),
        }
    }

    pub fn available_count(&self, resource_type: Option<ResourceType>) -> usize {
        self.inner
            .read()
            .resources
            .values()
            .filter(|r| r.status == ResourceStatus::Available)
            .filter(|r| resource_type.map_or(true, |t| r.resource_type == t))
            .count()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.resources.clear();
        inner.by_type.clear();
        info!("Cleared resource pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn device(id: &str) -> Resource {
        let mut config = HashMap::new();
        config.insert("platform".to_string(), json!("android"));
        config.insert("version".to_string(), json!("14"));
        config.insert("udid".to_string(), json!(format!("udid-{}", id)));
        Resource::new(id, ResourceType::Device, format!("Device {}", id), config)
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let pool = ResourcePool::default();
        pool.add(device("dev-1")).unwrap();
        assert!(matches!(
            pool.add(device("dev-1")),
            Err(Error::DuplicateResource { .. })
        ));
    }

    #[test]
    fn test_allocate_release_cycle() {
        let pool = ResourcePool::default();
        pool.add(device("dev-1")).unwrap();

        let allocated = pool.allocate(ResourceType::Device, "userA").unwrap();
        assert_eq!(allocated.id, "dev-1");
        assert_eq!(allocated.status, ResourceStatus::InUse);
        assert_eq!(allocated.allocated_to.as_deref(), Some("userA"));
        assert_eq!(allocated.usage_count, 1);

        // Pool is exhausted: a capacity signal, not an error
        assert!(pool.allocate(ResourceType::Device, "userB").is_none());

        pool.release("dev-1").unwrap();
        let released = pool.get("dev-1").unwrap();
        assert_eq!(released.status, ResourceStatus::Available);
        assert!(released.allocated_to.is_none());

        // Released resources can be allocated again
        assert!(pool.allocate(ResourceType::Device, "userB").is_some());
    }

    #[test]
    fn test_allocation_follows_registration_order() {
        let pool = ResourcePool::default();
        for id in ["dev-a", "dev-b", "dev-c"] {
            pool.add(device(id)).unwrap();
        }
        assert_eq!(pool.allocate(ResourceType::Device, "u").unwrap().id, "dev-a");
        assert_eq!(pool.allocate(ResourceType::Device, "u").unwrap().id, "dev-b");
        pool.release("dev-a").unwrap();
        assert_eq!(pool.allocate(ResourceType::Device, "u").unwrap().id, "dev-a");
    }

    #[test]
    fn test_release_is_idempotent() {
        let pool = ResourcePool::default();
        pool.add(device("dev-1")).unwrap();
        pool.release("dev-1").unwrap();
        pool.release("dev-1").unwrap();
        assert_eq!(
            pool.get("dev-1").unwrap().status,
            ResourceStatus::Available
        );
    }

    #[test]
    fn test_remove_in_use_rejected() {
        let pool = ResourcePool::default();
        pool.add(device("dev-1")).unwrap();
        pool.allocate(ResourceType::Device, "userA").unwrap();
        assert!(matches!(
            pool.remove("dev-1"),
            Err(Error::ResourceOperation(_))
        ));
        pool.release("dev-1").unwrap();
        pool.remove("dev-1").unwrap();
        assert!(pool.get("dev-1").is_none());
    }

    #[test]
    fn test_update_status_keeps_owner() {
        let pool = ResourcePool::default();
        pool.add(device("dev-1")).unwrap();
        pool.allocate(ResourceType::Device, "userA").unwrap();
        pool.update_status(
            "dev-1",
            ResourceStatus::Maintenance,
            Some("reflashing".to_string()),
        )
        .unwrap();
        let resource = pool.get("dev-1").unwrap();
        assert_eq!(resource.status, ResourceStatus::Maintenance);
        assert_eq!(resource.allocated_to.as_deref(), Some("userA"));
    }

    #[test]
    fn test_counts() {
        let pool = ResourcePool::default();
        pool.add(device("dev-1")).unwrap();
        pool.add(device("dev-2")).unwrap();
        assert_eq!(pool.count(Some(ResourceType::Device)), 2);
        assert_eq!(pool.count(Some(ResourceType::Browser)), 0);
        pool.allocate(ResourceType::Device, "u").unwrap();
        assert_eq!(pool.available_count(Some(ResourceType::Device)), 1);
        assert_eq!(pool.count(None), 2);
    }

    #[test]
    fn test_no_double_allocation_under_contention() {
        let pool = Arc::new(ResourcePool::default());
        for i in 0..4 {
            pool.add(device(&format!("dev-{}", i))).unwrap();
        }

        let mut handles = Vec::new();
        for t in 0..16 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                let mut got = Vec::new();
                for _ in 0..8 {
                    if let Some(r) = pool.allocate(ResourceType::Device, &format!("t{}", t)) {
                        got.push(r.id);
                    }
                }
                got
            }));
        }

        let allocated: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        // Without interleaved releases, no id may be handed out twice
        let mut unique = allocated.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), allocated.len());
        assert!(allocated.len() <= 4);
    }

    #[tokio::test]
    async fn test_allocate_with_retry_waits_for_release() {
        let config = AllocationConfig {
            wait_timeout_ms: 2_000,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
        };
        let pool = Arc::new(ResourcePool::new(config));
        pool.add(device("dev-1")).unwrap();
        pool.allocate(ResourceType::Device, "holder").unwrap();

        let releaser = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            releaser.release("dev-1").unwrap();
        });

        let got = pool.allocate_with_retry(ResourceType::Device, "waiter").await;
        assert_eq!(got.unwrap().allocated_to.as_deref(), Some("waiter"));
    }

    #[tokio::test]
    async fn test_allocate_with_retry_times_out() {
        let config = AllocationConfig {
            wait_timeout_ms: 100,
            initial_backoff_ms: 10,
            max_backoff_ms: 20,
        };
        let pool = ResourcePool::new(config);
        pool.add(device("dev-1")).unwrap();
        pool.allocate(ResourceType::Device, "holder").unwrap();
        assert!(pool
            .allocate_with_retry(ResourceType::Device, "waiter")
            .await
            .is_none());
    }
}
