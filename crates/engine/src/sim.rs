//! Simulated execution driver
//!
//! A deterministic in-process page model used by `testgrid run` dry runs
//! and by the integration tests. Elements are keyed by selector; a fixture
//! section in the test case seeds their state. Handles are generation
//! stamped so staleness can be simulated.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use testgrid_common::{
    ElementProperty, Error, Locator, Resource, Result, WaitCondition,
};

use crate::driver::{DriverAction, DriverFactory, ElementHandle, ExecutionDriver};

/// Minimal PNG header so screenshot artifacts look like image files
const SCREENSHOT_STUB: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// State of one simulated element
#[derive(Debug, Clone, Deserialize)]
pub struct SimElement {
    #[serde(default = "default_true")]
    pub present: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub css: HashMap<String, String>,
    #[serde(default = "default_count")]
    pub count: usize,
    /// Number of visibility probes to absorb before the element reports
    /// visible; models elements that render late
    #[serde(default)]
    pub visible_after_checks: u32,
    #[serde(default)]
    pub on_click: Option<ClickEffect>,
}

fn default_true() -> bool {
    true
}

fn default_count() -> usize {
    1
}

impl Default for SimElement {
    fn default() -> Self {
        Self {
            present: true,
            visible: true,
            enabled: true,
            selected: false,
            text: String::new(),
            attributes: HashMap::new(),
            css: HashMap::new(),
            count: 1,
            visible_after_checks: 0,
            on_click: None,
        }
    }
}

/// Page mutations triggered by clicking an element
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClickEffect {
    /// selector -> new text
    #[serde(default)]
    pub set_text: HashMap<String, String>,
    /// selectors made visible
    #[serde(default)]
    pub show: Vec<String>,
}

/// Fixture document seeding a simulated page (the `fixture` section of a
/// test case)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageFixture {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub elements: HashMap<String, SimElement>,
}

struct HandleEntry {
    selector: String,
    generation: u64,
}

struct SimState {
    url: String,
    source: String,
    elements: HashMap<String, SimElement>,
    handles: HashMap<u64, HandleEntry>,
    next_handle: u64,
    generation: u64,
    journal: Vec<String>,
}

pub struct SimulatedDriver {
    state: RwLock<SimState>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::from_page(PageFixture::default())
    }

    pub fn from_page(fixture: PageFixture) -> Self {
        Self {
            state: RwLock::new(SimState {
                url: fixture.url,
                source: fixture.source,
                elements: fixture.elements,
                handles: HashMap::new(),
                next_handle: 1,
                generation: 1,
                journal: Vec::new(),
            }),
        }
    }

    /// Build from the opaque fixture value carried by a test case
    pub fn from_fixture(fixture: &Value) -> Result<Self> {
        let page: PageFixture = serde_json::from_value(fixture.clone())
            .map_err(|e| Error::InvalidConfig(format!("bad simulation fixture: {}", e)))?;
        Ok(Self::from_page(page))
    }

    pub fn set_element(&self, selector: &str, element: SimElement) {
        self.state
            .write()
            .elements
            .insert(selector.to_string(), element);
    }

    /// Make an element disappear; outstanding handles to it go stale
    pub fn remove_element(&self, selector: &str) {
        if let Some(element) = self.state.write().elements.get_mut(selector) {
            element.present = false;
        }
    }

    /// Invalidate every handle issued so far, as a session refresh would
    pub fn invalidate_handles(&self) {
        self.state.write().generation += 1;
    }

    /// Ordered record of every action performed
    pub fn journal(&self) -> Vec<String> {
        self.state.read().journal.clone()
    }

    fn issue_handle(state: &mut SimState, selector: &str) -> ElementHandle {
        let id = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(
            id,
            HandleEntry {
                selector: selector.to_string(),
                generation: state.generation,
            },
        );
        ElementHandle::new(id)
    }

    fn resolve(state: &SimState, handle: &ElementHandle) -> Result<String> {
        let entry = state
            .handles
            .get(&handle.id())
            .ok_or_else(|| Error::Driver("unknown element handle".to_string()))?;
        if entry.generation != state.generation {
            return Err(Error::Driver("stale element handle".to_string()));
        }
        let present = state
            .elements
            .get(&entry.selector)
            .map(|e| e.present)
            .unwrap_or(false);
        if !present {
            return Err(Error::Driver(format!(
                "element {} is no longer attached",
                entry.selector
            )));
        }
        Ok(entry.selector.clone())
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionDriver for SimulatedDriver {
    async fn find(&self, locator: &Locator) -> Result<ElementHandle> {
        let mut state = self.state.write();
        let present = state
            .elements
            .get(&locator.selector)
            .map(|e| e.present)
            .unwrap_or(false);
        if !present {
            return Err(Error::ElementNotFound {
                strategy: locator.strategy.to_string(),
                selector: locator.selector.clone(),
            });
        }
        Ok(Self::issue_handle(&mut state, &locator.selector))
    }

    async fn check(
        &self,
        locator: &Locator,
        condition: WaitCondition,
    ) -> Result<Option<ElementHandle>> {
        let mut state = self.state.write();
        let Some(element) = state.elements.get_mut(&locator.selector) else {
            return Ok(None);
        };
        if !element.present {
            return Ok(None);
        }
        let satisfied = match condition {
            WaitCondition::Presence => true,
            WaitCondition::Visible | WaitCondition::Clickable | WaitCondition::Selected => {
                if element.visible_after_checks > 0 {
                    element.visible_after_checks -= 1;
                    false
                } else {
                    match condition {
                        WaitCondition::Visible => element.visible,
                        WaitCondition::Clickable => element.visible && element.enabled,
                        WaitCondition::Selected => element.visible && element.selected,
                        WaitCondition::Presence => true,
                    }
                }
            }
        };
        if !satisfied {
            return Ok(None);
        }
        Ok(Some(Self::issue_handle(&mut state, &locator.selector)))
    }

    async fn is_alive(&self, handle: &ElementHandle) -> bool {
        Self::resolve(&self.state.read(), handle).is_ok()
    }

    async fn act(&self, handle: &ElementHandle, action: &DriverAction) -> Result<()> {
        let mut state = self.state.write();
        let selector = Self::resolve(&state, handle)?;
        state.journal.push(format!("{}:{}", action.name(), selector));

        match action {
            DriverAction::Input { text } => {
                if let Some(element) = state.elements.get_mut(&selector) {
                    element.text = text.clone();
                }
            }
            DriverAction::Clear => {
                if let Some(element) = state.elements.get_mut(&selector) {
                    element.text.clear();
                }
            }
            DriverAction::Click | DriverAction::DoubleClick => {
                let effect = state
                    .elements
                    .get(&selector)
                    .and_then(|e| e.on_click.clone());
                if let Some(effect) = effect {
                    for (target, text) in effect.set_text {
                        if let Some(element) = state.elements.get_mut(&target) {
                            element.text = text;
                        }
                    }
                    for target in effect.show {
                        if let Some(element) = state.elements.get_mut(&target) {
                            element.visible = true;
                            element.present = true;
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn read(&self, handle: &ElementHandle, property: &ElementProperty) -> Result<Value> {
        let state = self.state.read();
        let selector = Self::resolve(&state, handle)?;
        let element = state
            .elements
            .get(&selector)
            .ok_or_else(|| Error::Driver(format!("element {} vanished", selector)))?;
        let value = match property {
            ElementProperty::Text => Value::String(element.text.clone()),
            ElementProperty::Attribute(name) => element
                .attributes
                .get(name)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null),
            ElementProperty::CssProperty(name) => element
                .css
                .get(name)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null),
            ElementProperty::Enabled => Value::Bool(element.enabled),
            ElementProperty::Selected => Value::Bool(element.selected),
            ElementProperty::Count => Value::from(element.count),
        };
        Ok(value)
    }

    async fn page_source(&self) -> Result<String> {
        Ok(self.state.read().source.clone())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.read().url.clone())
    }

    async fn screenshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(Some(SCREENSHOT_STUB.to_vec()))
    }
}

/// Builds one simulated session per run, seeded from the fixture the test
/// case carries (an empty page when absent).
pub struct SimulatedDriverFactory {
    fixture: Option<Value>,
}

impl SimulatedDriverFactory {
    pub fn new(fixture: Option<Value>) -> Self {
        Self { fixture }
    }
}

impl DriverFactory for SimulatedDriverFactory {
    fn session(&self, _resource: &Resource) -> Result<Arc<dyn ExecutionDriver>> {
        let driver = match &self.fixture {
            Some(fixture) => SimulatedDriver::from_fixture(fixture)?,
            None => SimulatedDriver::new(),
        };
        Ok(Arc::new(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testgrid_common::LocatorStrategy;

    fn css(selector: &str) -> Locator {
        Locator::new(LocatorStrategy::CssSelector, selector)
    }

    #[tokio::test]
    async fn test_find_and_staleness() {
        let driver = SimulatedDriver::new();
        driver.set_element("#a", SimElement::default());

        let handle = driver.find(&css("#a")).await.unwrap();
        assert!(driver.is_alive(&handle).await);

        driver.invalidate_handles();
        assert!(!driver.is_alive(&handle).await);
        assert!(matches!(
            driver.act(&handle, &DriverAction::Click).await,
            Err(Error::Driver(_))
        ));
    }

    #[tokio::test]
    async fn test_visible_after_checks_counts_down() {
        let driver = SimulatedDriver::new();
        driver.set_element(
            "#late",
            SimElement {
                visible_after_checks: 2,
                ..SimElement::default()
            },
        );

        let locator = css("#late");
        assert!(driver
            .check(&locator, WaitCondition::Visible)
            .await
            .unwrap()
            .is_none());
        assert!(driver
            .check(&locator, WaitCondition::Visible)
            .await
            .unwrap()
            .is_none());
        assert!(driver
            .check(&locator, WaitCondition::Visible)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_click_effect_sets_text() {
        let driver = SimulatedDriver::new();
        driver.set_element(
            "#submit",
            SimElement {
                on_click: Some(ClickEffect {
                    set_text: [("#result".to_string(), "OK".to_string())].into(),
                    show: vec![],
                }),
                ..SimElement::default()
            },
        );
        driver.set_element("#result", SimElement::default());

        let handle = driver.find(&css("#submit")).await.unwrap();
        driver.act(&handle, &DriverAction::Click).await.unwrap();

        let result = driver.find(&css("#result")).await.unwrap();
        let text = driver.read(&result, &ElementProperty::Text).await.unwrap();
        assert_eq!(text, Value::String("OK".to_string()));
        assert_eq!(driver.journal(), vec!["click:#submit"]);
    }
}
