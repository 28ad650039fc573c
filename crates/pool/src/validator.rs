//! Structural validation of resource configuration at registration time

use serde_json::Value;
use std::collections::HashMap;

use testgrid_common::{Error, ResourceType, Result};

const DEVICE_PLATFORMS: &[&str] = &["android", "ios"];
const BROWSER_TYPES: &[&str] = &["chrome", "firefox"];

/// Validates the opaque config map a resource carries, per type.
///
/// Configuration problems surface immediately at registration and are never
/// retried; file and cache resources carry free-form config.
pub struct ResourceValidator;

impl ResourceValidator {
    pub fn validate(resource_type: ResourceType, config: &HashMap<String, Value>) -> Result<()> {
        match resource_type {
            ResourceType::Device => Self::validate_device(config),
            ResourceType::Browser => Self::validate_browser(config),
            ResourceType::Database => Self::validate_database(config),
            ResourceType::Api => Self::validate_api(config),
            ResourceType::File | ResourceType::Cache => Ok(()),
        }
    }

    fn validate_device(config: &HashMap<String, Value>) -> Result<()> {
        require_keys(config, &["platform", "version", "udid"], "device")?;
        let platform = config.get("platform").and_then(|v| v.as_str()).unwrap_or("");
        if !DEVICE_PLATFORMS.contains(&platform) {
            return Err(Error::InvalidConfig(format!(
                "unsupported device platform: {}",
                platform
            )));
        }
        Ok(())
    }

    fn validate_browser(config: &HashMap<String, Value>) -> Result<()> {
        require_keys(config, &["browser_type", "version"], "browser")?;
        let browser = config
            .get("browser_type")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if !BROWSER_TYPES.contains(&browser) {
            return Err(Error::InvalidConfig(format!(
                "unsupported browser type: {}",
                browser
            )));
        }
        Ok(())
    }

    fn validate_database(config: &HashMap<String, Value>) -> Result<()> {
        require_keys(
            config,
            &["host", "port", "username", "password", "database"],
            "database",
        )
    }

    fn validate_api(config: &HashMap<String, Value>) -> Result<()> {
        require_keys(config, &["base_url", "timeout"], "api")
    }
}

fn require_keys(config: &HashMap<String, Value>, keys: &[&str], kind: &str) -> Result<()> {
    for key in keys {
        if !config.contains_key(*key) {
            return Err(Error::InvalidConfig(format!(
                "{} config missing required field: {}",
                kind, key
            )));
        }
    }
    Ok(())
}
