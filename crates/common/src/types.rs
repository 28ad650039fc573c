//! Core types for TestGrid

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Kind of allocatable execution resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Device,
    Browser,
    Database,
    Api,
    File,
    Cache,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Device,
        ResourceType::Browser,
        ResourceType::Database,
        ResourceType::Api,
        ResourceType::File,
        ResourceType::Cache,
    ];
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Device => write!(f, "device"),
            ResourceType::Browser => write!(f, "browser"),
            ResourceType::Database => write!(f, "database"),
            ResourceType::Api => write!(f, "api"),
            ResourceType::File => write!(f, "file"),
            ResourceType::Cache => write!(f, "cache"),
        }
    }
}

/// Resource lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Available,
    InUse,
    Maintenance,
    Error,
    Unknown,
}

impl Default for ResourceStatus {
    fn default() -> Self {
        Self::Available
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Available => write!(f, "available"),
            ResourceStatus::InUse => write!(f, "in_use"),
            ResourceStatus::Maintenance => write!(f, "maintenance"),
            ResourceStatus::Error => write!(f, "error"),
            ResourceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single allocatable unit tracked by the resource pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub resource_type: ResourceType,
    pub name: String,
    pub status: ResourceStatus,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_used_at: Option<i64>,
    pub usage_count: u64,
    pub error_count: u64,
    pub error_message: Option<String>,
    pub allocated_to: Option<String>,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        resource_type: ResourceType,
        name: impl Into<String>,
        config: HashMap<String, Value>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: id.into(),
            resource_type,
            name: name.into(),
            status: ResourceStatus::Available,
            config,
            created_at: now,
            updated_at: now,
            last_used_at: None,
            usage_count: 0,
            error_count: 0,
            error_message: None,
            allocated_to: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }

    /// Stamp the resource as allocated to `owner`
    pub fn mark_in_use(&mut self, owner: &str) {
        self.status = ResourceStatus::InUse;
        self.allocated_to = Some(owner.to_string());
        self.last_used_at = Some(chrono::Utc::now().timestamp());
        self.usage_count += 1;
        self.touch();
    }

    pub fn mark_available(&mut self) {
        self.status = ResourceStatus::Available;
        self.allocated_to = None;
        self.touch();
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = ResourceStatus::Error;
        self.error_message = Some(message.into());
        self.error_count += 1;
        self.touch();
    }

    /// Fetch a string-valued config key
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// How to find a UI element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    Id,
    Name,
    ClassName,
    TagName,
    LinkText,
    PartialLinkText,
    CssSelector,
    Xpath,
    AccessibilityId,
    AndroidUiautomator,
    IosPredicate,
    IosClassChain,
}

impl std::fmt::Display for LocatorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LocatorStrategy::Id => "id",
            LocatorStrategy::Name => "name",
            LocatorStrategy::ClassName => "class_name",
            LocatorStrategy::TagName => "tag_name",
            LocatorStrategy::LinkText => "link_text",
            LocatorStrategy::PartialLinkText => "partial_link_text",
            LocatorStrategy::CssSelector => "css_selector",
            LocatorStrategy::Xpath => "xpath",
            LocatorStrategy::AccessibilityId => "accessibility_id",
            LocatorStrategy::AndroidUiautomator => "android_uiautomator",
            LocatorStrategy::IosPredicate => "ios_predicate",
            LocatorStrategy::IosClassChain => "ios_class_chain",
        };
        write!(f, "{}", s)
    }
}

fn default_locator_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// A (strategy, selector) pair with wait timing parameters.
///
/// Cache identity is `(strategy, selector)` only; the timing fields never
/// affect the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub selector: String,
    #[serde(default = "default_locator_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Locator {
    pub fn new(strategy: LocatorStrategy, selector: impl Into<String>) -> Self {
        Self {
            strategy,
            selector: selector.into(),
            timeout_ms: default_locator_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Cache key: strategy + selector, independent of timing parameters
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.strategy, self.selector)
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.strategy, self.selector)
    }
}

/// Condition a wait blocks on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    Presence,
    Visible,
    Clickable,
    Selected,
}

impl std::fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitCondition::Presence => write!(f, "presence"),
            WaitCondition::Visible => write!(f, "visible"),
            WaitCondition::Clickable => write!(f, "clickable"),
            WaitCondition::Selected => write!(f, "selected"),
        }
    }
}

/// A property readable from a located element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementProperty {
    Text,
    Attribute(String),
    CssProperty(String),
    Enabled,
    Selected,
    /// Number of elements matching the handle's locator
    Count,
}

/// Assertion kinds evaluated against a located element (or the page)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssertionKind {
    Present,
    Visible,
    Enabled,
    Selected,
    TextEquals,
    TextContains,
    AttributeEquals { attribute: String },
    AttributeContains { attribute: String },
    CssProperty { property: String },
    ElementCount,
    PageSourceContains,
    UrlEquals,
}

impl AssertionKind {
    pub fn name(&self) -> &'static str {
        match self {
            AssertionKind::Present => "present",
            AssertionKind::Visible => "visible",
            AssertionKind::Enabled => "enabled",
            AssertionKind::Selected => "selected",
            AssertionKind::TextEquals => "text_equals",
            AssertionKind::TextContains => "text_contains",
            AssertionKind::AttributeEquals { .. } => "attribute_equals",
            AssertionKind::AttributeContains { .. } => "attribute_contains",
            AssertionKind::CssProperty { .. } => "css_property",
            AssertionKind::ElementCount => "element_count",
            AssertionKind::PageSourceContains => "page_source_contains",
            AssertionKind::UrlEquals => "url_equals",
        }
    }
}

/// What a step does: perform an action or evaluate an assertion.
///
/// Closed set, resolved at deserialization time; the engine never dispatches
/// on strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepKind {
    Click,
    Input,
    Clear,
    Submit,
    Scroll,
    Hover,
    DoubleClick,
    RightClick,
    DragAndDrop { target: Locator },
    Assert(AssertionKind),
}

impl StepKind {
    /// The wait condition the engine applies before touching the element
    pub fn wait_condition(&self) -> WaitCondition {
        match self {
            StepKind::Click
            | StepKind::DoubleClick
            | StepKind::RightClick
            | StepKind::DragAndDrop { .. } => WaitCondition::Clickable,
            StepKind::Input | StepKind::Clear | StepKind::Submit => WaitCondition::Visible,
            StepKind::Scroll | StepKind::Hover => WaitCondition::Presence,
            StepKind::Assert(_) => WaitCondition::Presence,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Click => "click",
            StepKind::Input => "input",
            StepKind::Clear => "clear",
            StepKind::Submit => "submit",
            StepKind::Scroll => "scroll",
            StepKind::Hover => "hover",
            StepKind::DoubleClick => "double_click",
            StepKind::RightClick => "right_click",
            StepKind::DragAndDrop { .. } => "drag_and_drop",
            StepKind::Assert(kind) => kind.name(),
        }
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, StepKind::Assert(_))
    }
}

/// One step of a test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    /// 1-based, unique within a test case
    pub step_number: u32,
    pub element: Locator,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default)]
    pub value: Option<String>,
}

/// Structural contract a data row must satisfy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowSchema {
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub kind: Option<FieldKind>,
    #[serde(default = "default_field_required")]
    pub required: bool,
}

fn default_field_required() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Bool,
}

/// One parameter set for a data-driven iteration, in source column order
pub type DataRow = serde_json::Map<String, Value>;

fn default_device_type() -> ResourceType {
    ResourceType::Browser
}

/// A complete test case parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique name for this test case
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Resource type the run allocates before executing steps
    #[serde(default = "default_device_type")]
    pub device_type: ResourceType,
    /// Steps to execute in order
    pub steps: Vec<TestStep>,
    /// Optional data source turning this case into one run per row
    #[serde(default)]
    pub data_source: Option<PathBuf>,
    #[serde(default)]
    pub data_schema: Option<RowSchema>,
    /// Opaque fixture consumed by the simulated driver for dry runs
    #[serde(default)]
    pub fixture: Option<Value>,
}

impl TestCase {
    /// Parse a test case from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let case: Self = serde_yaml::from_str(yaml)?;
        case.validate()?;
        Ok(case)
    }

    /// Parse a test case from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load all test cases from a directory
    pub fn load_all(dir: &Path) -> Result<Vec<Self>> {
        let mut cases = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            cases.push(Self::from_file(entry.path())?);
        }
        Ok(cases)
    }

    /// Check step numbering: 1-based, unique, strictly increasing
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "test case '{}' has no steps",
                self.name
            )));
        }
        let mut prev = 0u32;
        for step in &self.steps {
            if step.step_number <= prev {
                return Err(Error::InvalidConfig(format!(
                    "test case '{}': step_number {} out of order (must be 1-based and strictly increasing)",
                    self.name, step.step_number
                )));
            }
            prev = step.step_number;
        }
        Ok(())
    }
}

/// Execution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Error,
    Skipped,
    Blocked,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    /// Legal transitions: pending -> running (or stopped before start);
    /// running -> any terminal state. Terminal states are immutable.
    pub fn can_transition(&self, to: ExecutionStatus) -> bool {
        match self {
            ExecutionStatus::Pending => {
                matches!(to, ExecutionStatus::Running | ExecutionStatus::Stopped)
            }
            ExecutionStatus::Running => to.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Passed => write!(f, "passed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Error => write!(f, "error"),
            ExecutionStatus::Skipped => write!(f, "skipped"),
            ExecutionStatus::Blocked => write!(f, "blocked"),
            ExecutionStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// One run of a test case against one allocated resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecution {
    pub id: String,
    pub test_case_id: String,
    pub device_id: Option<String>,
    pub environment: String,
    pub status: ExecutionStatus,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl TestExecution {
    pub fn new(test_case_id: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            test_case_id: test_case_id.into(),
            device_id: None,
            environment: environment.into(),
            status: ExecutionStatus::Pending,
            start_time: None,
            end_time: None,
            duration_ms: None,
            error_message: None,
        }
    }

    /// Apply a status transition, rejecting illegal ones
    pub fn transition(&mut self, to: ExecutionStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn begin(&mut self) -> Result<()> {
        self.transition(ExecutionStatus::Running)?;
        self.start_time = Some(chrono::Utc::now().timestamp_millis());
        Ok(())
    }

    /// Finalize with a terminal status, stamping end_time and duration
    pub fn finish(&mut self, status: ExecutionStatus, error_message: Option<String>) -> Result<()> {
        self.transition(status)?;
        let now = chrono::Utc::now().timestamp_millis();
        self.end_time = Some(now);
        self.duration_ms = self.start_time.map(|s| now.saturating_sub(s) as u64);
        if error_message.is_some() {
            self.error_message = error_message;
        }
        Ok(())
    }
}

/// Step outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Error,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Passed => write!(f, "passed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Error => write!(f, "error"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// The recorded outcome of one step within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStepResult {
    pub step_number: u32,
    /// Which data row produced this result; None for non-data-driven runs
    pub row_index: Option<usize>,
    pub action: String,
    pub element: String,
    pub value: Option<String>,
    pub status: StepStatus,
    pub message: String,
    pub screenshot: Option<String>,
    pub created_at: i64,
}

impl TestStepResult {
    pub fn new(step: &TestStep, row_index: Option<usize>) -> Self {
        Self {
            step_number: step.step_number,
            row_index,
            action: step.kind.name().to_string(),
            element: step.element.to_string(),
            value: step.value.clone(),
            status: StepStatus::Pending,
            message: String::new(),
            screenshot: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_case() {
        let yaml = r##"
name: login-flow
description: Submit the login form
steps:
  - step_number: 1
    action: input
    element: { strategy: css_selector, selector: "#user" }
    value: admin
  - step_number: 2
    action: click
    element: { strategy: css_selector, selector: "#submit" }
  - step_number: 3
    action: assert
    kind: text_equals
    element: { strategy: id, selector: greeting }
    value: "Welcome"
"##;
        let case = TestCase::from_yaml(yaml).unwrap();
        assert_eq!(case.name, "login-flow");
        assert_eq!(case.steps.len(), 3);
        assert_eq!(case.steps[0].kind, StepKind::Input);
        assert_eq!(
            case.steps[2].kind,
            StepKind::Assert(AssertionKind::TextEquals)
        );
        assert_eq!(case.device_type, ResourceType::Browser);
    }

    #[test]
    fn test_parse_assertion_with_attribute() {
        let yaml = r#"
name: attr-check
steps:
  - step_number: 1
    action: assert
    kind: attribute_equals
    attribute: href
    element: { strategy: link_text, selector: Docs }
    value: "/docs"
"#;
        let case = TestCase::from_yaml(yaml).unwrap();
        match &case.steps[0].kind {
            StepKind::Assert(AssertionKind::AttributeEquals { attribute }) => {
                assert_eq!(attribute, "href");
            }
            other => panic!("unexpected step kind: {:?}", other),
        }
    }

    #[test]
    fn test_step_numbering_must_increase() {
        let yaml = r#"
name: bad-order
steps:
  - step_number: 2
    action: click
    element: { strategy: id, selector: a }
  - step_number: 1
    action: click
    element: { strategy: id, selector: b }
"#;
        assert!(TestCase::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_locator_cache_key_ignores_timing() {
        let a = Locator::new(LocatorStrategy::Xpath, "//div");
        let b = Locator::new(LocatorStrategy::Xpath, "//div")
            .with_timeout(Duration::from_secs(99));
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_execution_transitions() {
        let mut exec = TestExecution::new("case-1", "staging");
        assert_eq!(exec.status, ExecutionStatus::Pending);
        exec.begin().unwrap();
        assert!(exec.start_time.is_some());
        exec.finish(ExecutionStatus::Passed, None).unwrap();
        assert!(exec.end_time.is_some());
        assert!(exec.duration_ms.is_some());
        // Terminal states are immutable
        assert!(exec.transition(ExecutionStatus::Running).is_err());
    }

    #[test]
    fn test_wait_condition_per_action() {
        assert_eq!(StepKind::Click.wait_condition(), WaitCondition::Clickable);
        assert_eq!(StepKind::Input.wait_condition(), WaitCondition::Visible);
        assert_eq!(StepKind::Hover.wait_condition(), WaitCondition::Presence);
    }
}
