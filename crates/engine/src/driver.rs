//! Execution driver capability
//!
//! The device/browser automation surface is injected, never owned. The
//! engine speaks to it exclusively through [`ExecutionDriver`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use testgrid_common::{ElementProperty, Locator, Resource, Result, WaitCondition};

/// Opaque reference to a located UI element, owned by the driver.
///
/// Handles are session- and time-bound; holders must treat them as
/// revocable and re-find on failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    id: u64,
}

impl ElementHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// An element-level operation the driver can perform.
///
/// Unlike the step-level action set, drag targets arrive pre-resolved.
#[derive(Debug, Clone)]
pub enum DriverAction {
    Click,
    Input { text: String },
    Clear,
    Submit,
    Scroll,
    Hover,
    DoubleClick,
    RightClick,
    DragAndDrop { target: ElementHandle },
}

impl DriverAction {
    pub fn name(&self) -> &'static str {
        match self {
            DriverAction::Click => "click",
            DriverAction::Input { .. } => "input",
            DriverAction::Clear => "clear",
            DriverAction::Submit => "submit",
            DriverAction::Scroll => "scroll",
            DriverAction::Hover => "hover",
            DriverAction::DoubleClick => "double_click",
            DriverAction::RightClick => "right_click",
            DriverAction::DragAndDrop { .. } => "drag_and_drop",
        }
    }
}

/// Device/browser automation capability.
///
/// `check` is a single non-blocking condition probe; the locator manager
/// owns the poll loop and re-issues the probe each interval, so stale
/// handles never survive across polls.
#[async_trait]
pub trait ExecutionDriver: Send + Sync {
    /// Immediate lookup. Fails with `ElementNotFound` when absent.
    async fn find(&self, locator: &Locator) -> Result<ElementHandle>;

    /// One non-blocking state probe: a fresh handle when the condition
    /// currently holds, `None` otherwise.
    async fn check(
        &self,
        locator: &Locator,
        condition: WaitCondition,
    ) -> Result<Option<ElementHandle>>;

    /// Cheap liveness probe for a previously returned handle.
    async fn is_alive(&self, handle: &ElementHandle) -> bool;

    /// Perform an element action.
    async fn act(&self, handle: &ElementHandle, action: &DriverAction) -> Result<()>;

    /// Read a property of a located element.
    async fn read(&self, handle: &ElementHandle, property: &ElementProperty) -> Result<Value>;

    /// Full page/tree source.
    async fn page_source(&self) -> Result<String>;

    /// Current URL or screen identifier.
    async fn current_url(&self) -> Result<String>;

    /// Capture a screenshot; `None` when the driver does not support it.
    async fn screenshot(&self) -> Result<Option<Vec<u8>>>;
}

/// Opens one driver session per allocated resource.
pub trait DriverFactory: Send + Sync {
    fn session(&self, resource: &Resource) -> Result<Arc<dyn ExecutionDriver>>;
}

/// Hands out the same pre-built session for every run. Useful when the
/// driver is constructed up front and shared with the caller, e.g. to
/// inspect the action journal of a simulated session afterwards.
pub struct FixedDriverFactory(pub Arc<dyn ExecutionDriver>);

impl DriverFactory for FixedDriverFactory {
    fn session(&self, _resource: &Resource) -> Result<Arc<dyn ExecutionDriver>> {
        Ok(self.0.clone())
    }
}
