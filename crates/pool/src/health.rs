//! Per-type resource health probes

use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use testgrid_common::{Error, Resource, ResourceType, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes resource health by type: automation bridge lookup for devices,
/// binary version for browsers, TCP connect for databases, HTTP /health
/// for APIs. Probes report `Ok(false)` on an unhealthy target; `Err` is
/// reserved for resource types that have no probe.
pub struct HealthChecker {
    http: reqwest::Client,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    pub async fn check(&self, resource: &Resource) -> Result<bool> {
        let healthy = match resource.resource_type {
            ResourceType::Device => self.check_device(resource).await,
            ResourceType::Browser => self.check_browser(resource).await,
            ResourceType::Database => self.check_database(resource).await,
            ResourceType::Api => self.check_api(resource).await,
            other => {
                return Err(Error::HealthCheck {
                    id: resource.id.clone(),
                    reason: format!("no health probe for resource type {}", other),
                })
            }
        };
        debug!("Health probe for {}: {}", resource.id, healthy);
        Ok(healthy)
    }

    /// A device is healthy when its udid shows up in the platform's
    /// automation bridge listing.
    async fn check_device(&self, resource: &Resource) -> bool {
        let Some(udid) = resource.config_str("udid") else {
            return false;
        };
        let listing = match resource.config_str("platform") {
            Some("android") => run_capture("adb", &["devices"]).await,
            Some("ios") => run_capture("idevice_id", &["-l"]).await,
            _ => None,
        };
        listing.map(|out| out.contains(udid)).unwrap_or(false)
    }

    /// A browser is healthy when its binary answers `--version` with the
    /// configured version string.
    async fn check_browser(&self, resource: &Resource) -> bool {
        let Some(version) = resource.config_str("version") else {
            return false;
        };
        let binary = match resource.config_str("browser_type") {
            Some("chrome") => "google-chrome",
            Some("firefox") => "firefox",
            _ => return false,
        };
        run_capture(binary, &["--version"])
            .await
            .map(|out| out.contains(version))
            .unwrap_or(false)
    }

    /// A database is healthy when its host:port accepts a TCP connection.
    async fn check_database(&self, resource: &Resource) -> bool {
        let Some(host) = resource.config_str("host") else {
            return false;
        };
        let Some(port) = resource.config.get("port").and_then(|v| v.as_u64()) else {
            return false;
        };
        let addr = format!("{}:{}", host, port);
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }

    /// An API endpoint is healthy when GET {base_url}/health returns 2xx.
    async fn check_api(&self, resource: &Resource) -> bool {
        let Some(base_url) = resource.config_str("base_url") else {
            return false;
        };
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        match self.http.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("API health probe for {} failed: {}", resource.id, e);
                false
            }
        }
    }
}

/// Run an external command, returning its stdout on success
async fn run_capture(program: &str, args: &[&str]) -> Option<String> {
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(program).args(args).output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_unsupported_type_has_no_probe() {
        let checker = HealthChecker::new();
        let resource = Resource::new("f-1", ResourceType::File, "fixture dir", HashMap::new());
        assert!(matches!(
            checker.check(&resource).await,
            Err(Error::HealthCheck { .. })
        ));
    }

    #[tokio::test]
    async fn test_database_probe_refused_connection() {
        let checker = HealthChecker::new();
        let mut config = HashMap::new();
        config.insert("host".to_string(), json!("127.0.0.1"));
        // Reserved port nothing listens on
        config.insert("port".to_string(), json!(1));
        config.insert("username".to_string(), json!("u"));
        config.insert("password".to_string(), json!("p"));
        config.insert("database".to_string(), json!("d"));
        let resource = Resource::new("db-1", ResourceType::Database, "db", config);
        assert!(!checker.check(&resource).await.unwrap());
    }

    #[tokio::test]
    async fn test_device_probe_without_udid_is_unhealthy() {
        let checker = HealthChecker::new();
        let mut config = HashMap::new();
        config.insert("platform".to_string(), json!("android"));
        let resource = Resource::new("dev-1", ResourceType::Device, "pixel", config);
        assert!(!checker.check(&resource).await.unwrap());
    }
}
