//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Directory screenshots are written to
    pub screenshot_dir: PathBuf,

    /// Locator subsystem configuration
    pub locator: LocatorConfig,

    /// Resource allocation configuration
    pub allocation: AllocationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let store_path = crate::default_store_path();
        Self {
            screenshot_dir: store_path.join("screenshots"),
            store_path,
            locator: LocatorConfig::default(),
            allocation: AllocationConfig::default(),
        }
    }
}

/// Locator wait and cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Locator cache time-to-live in seconds
    pub cache_ttl_secs: u64,

    /// Default wait timeout in milliseconds
    pub default_timeout_ms: u64,

    /// Default wait poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            default_timeout_ms: 10_000,
            poll_interval_ms: 500,
        }
    }
}

impl LocatorConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Bounded retry/backoff policy for resource allocation under contention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Total time to keep retrying before reporting no resource, in ms
    pub wait_timeout_ms: u64,

    /// First retry delay in ms; doubles per attempt up to the max
    pub initial_backoff_ms: u64,

    /// Upper bound for a single backoff sleep, in ms
    pub max_backoff_ms: u64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 30_000,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the execution database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("executions.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_roundtrip_toml() {
        let config = EngineConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.locator.cache_ttl_secs, 300);
        assert_eq!(back.allocation.wait_timeout_ms, 30_000);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let config = EngineConfig::load(std::path::Path::new("/nonexistent/testgrid.toml")).unwrap();
        assert_eq!(config.locator.default_timeout_ms, 10_000);
    }
}
