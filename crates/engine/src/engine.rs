//! The execution engine: one test case in, one durable execution record out
//!
//! Every run allocates a resource, opens a driver session with a fresh
//! locator manager, executes each step sequence in order, and always
//! reaches the release/finalize path. Failures inside a step are recorded
//! on the step result and never escape `start`.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use testgrid_common::{
    AssertionKind, DataRow, ElementProperty, EngineConfig, Error, ExecutionStatus, Resource,
    Result, StepKind, StepStatus, TestCase, TestExecution, TestStep, TestStepResult,
    WaitCondition,
};
use testgrid_pool::ResourcePool;

use crate::data::DataSet;
use crate::driver::{DriverAction, DriverFactory, ExecutionDriver};
use crate::locator::LocatorManager;
use crate::params::{parameterize_step, stringify};
use crate::repository::ExecutionRepository;

pub struct ExecutionEngine {
    pool: Arc<ResourcePool>,
    factory: Arc<dyn DriverFactory>,
    repository: Arc<dyn ExecutionRepository>,
    config: EngineConfig,
    /// Stop flags of in-flight executions
    active: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl ExecutionEngine {
    pub fn new(
        pool: Arc<ResourcePool>,
        factory: Arc<dyn DriverFactory>,
        repository: Arc<dyn ExecutionRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            pool,
            factory,
            repository,
            config,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn ExecutionRepository> {
        &self.repository
    }

    /// Kick off a run in the background and return its execution id.
    /// Must be called within a tokio runtime.
    pub fn start(self: Arc<Self>, case: TestCase, environment: &str) -> Result<String> {
        case.validate()?;
        let execution = TestExecution::new(case.name.clone(), environment);
        let id = execution.id.clone();
        self.repository.create(&execution)?;

        let stop = Arc::new(AtomicBool::new(false));
        self.active.write().insert(id.clone(), stop.clone());

        let engine = self;
        tokio::spawn(async move {
            engine.run_task(execution, case, stop).await;
        });
        Ok(id)
    }

    /// Run a case to completion and return the finalized record. Used
    /// where the caller wants to block on the outcome (CLI dry runs,
    /// tests).
    pub async fn run_to_completion(
        &self,
        case: TestCase,
        environment: &str,
    ) -> Result<TestExecution> {
        case.validate()?;
        let execution = TestExecution::new(case.name.clone(), environment);
        self.repository.create(&execution)?;

        let stop = Arc::new(AtomicBool::new(false));
        self.active
            .write()
            .insert(execution.id.clone(), stop.clone());
        Ok(self.run_task(execution, case, stop).await)
    }

    /// Request a cooperative stop. Honored at the next step boundary;
    /// stopping an already-terminal execution is a no-op.
    pub fn stop(&self, execution_id: &str) -> Result<()> {
        if let Some(flag) = self.active.read().get(execution_id) {
            flag.store(true, Ordering::SeqCst);
            info!("Stop requested for execution {}", execution_id);
            return Ok(());
        }
        match self.repository.get(execution_id)? {
            Some(_) => Ok(()),
            None => Err(Error::ExecutionNotFound {
                id: execution_id.to_string(),
            }),
        }
    }

    pub fn get_execution(&self, execution_id: &str) -> Result<TestExecution> {
        self.repository
            .get(execution_id)?
            .ok_or_else(|| Error::ExecutionNotFound {
                id: execution_id.to_string(),
            })
    }

    pub fn get_status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        Ok(self.get_execution(execution_id)?.status)
    }

    pub fn get_step_results(&self, execution_id: &str) -> Result<Vec<TestStepResult>> {
        self.get_execution(execution_id)?;
        self.repository.step_results(execution_id)
    }

    pub fn get_history(&self, test_case_id: &str) -> Result<Vec<TestExecution>> {
        self.repository.history(test_case_id)
    }

    /// The whole run lifecycle. Never returns an error: whatever happens,
    /// the execution ends in exactly one terminal state with the resource
    /// released and end_time stamped.
    async fn run_task(
        &self,
        mut execution: TestExecution,
        case: TestCase,
        stop: Arc<AtomicBool>,
    ) -> TestExecution {
        info!("Execution {} of '{}' starting", execution.id, case.name);

        if stop.load(Ordering::SeqCst) {
            let _ = execution.transition(ExecutionStatus::Stopped);
            return self.finalize(execution);
        }

        if let Err(e) = execution.begin() {
            execution.error_message = Some(e.to_string());
        }
        self.persist(&execution);

        // Acquire the declared resource type; exhaustion before any step
        // ran blocks the execution rather than erroring it.
        let resource = self
            .pool
            .allocate_with_retry(case.device_type, &execution.id)
            .await;
        let Some(resource) = resource else {
            let message = Error::ResourceOperation(format!(
                "no available {} resource",
                case.device_type
            ))
            .to_string();
            let _ = execution.finish(ExecutionStatus::Blocked, Some(message));
            return self.finalize(execution);
        };
        execution.device_id = Some(resource.id.clone());
        self.persist(&execution);

        let (status, message) = self
            .run_steps(&execution.id, &case, &resource, &stop)
            .await;

        // Guaranteed cleanup path
        if let Err(e) = self.pool.release(&resource.id) {
            warn!("Failed to release {}: {}", resource.id, e);
        }
        let _ = execution.finish(status, message);
        self.finalize(execution)
    }

    fn finalize(&self, execution: TestExecution) -> TestExecution {
        self.persist(&execution);
        self.active.write().remove(&execution.id);
        info!("Execution {} finished: {}", execution.id, execution.status);
        execution
    }

    async fn run_steps(
        &self,
        execution_id: &str,
        case: &TestCase,
        resource: &Resource,
        stop: &AtomicBool,
    ) -> (ExecutionStatus, Option<String>) {
        let driver = match self.factory.session(resource) {
            Ok(driver) => driver,
            Err(e) => {
                return (
                    ExecutionStatus::Error,
                    Some(format!("failed to open driver session: {}", e)),
                )
            }
        };
        // A fresh cache per session; never shared across runs
        let manager = LocatorManager::new(driver.clone(), self.config.locator.cache_ttl());

        let rows: Vec<Option<DataRow>> = match &case.data_source {
            Some(path) => {
                let mut data = match DataSet::load(path) {
                    Ok(data) => data,
                    Err(e) => return (ExecutionStatus::Error, Some(e.to_string())),
                };
                if let Some(schema) = &case.data_schema {
                    if let Err(e) = data.set_schema(schema.clone()) {
                        return (ExecutionStatus::Error, Some(e.to_string()));
                    }
                }
                data.rows().iter().cloned().map(Some).collect()
            }
            None => vec![None],
        };

        let mut any_failed = false;
        let mut any_error = false;
        let mut stopped = false;
        let mut first_problem: Option<String> = None;

        for (row_index, row) in rows.iter().enumerate() {
            let row_tag = row.as_ref().map(|_| row_index);
            let mut abort_row = false;

            for template in &case.steps {
                let step = match row {
                    Some(row) => parameterize_step(template, row),
                    None => template.clone(),
                };

                if !stopped && stop.load(Ordering::SeqCst) {
                    stopped = true;
                }
                if stopped || abort_row {
                    let reason = if stopped {
                        "execution stopped"
                    } else {
                        "previous step failed"
                    };
                    let mut result = TestStepResult::new(&step, row_tag);
                    result.status = StepStatus::Skipped;
                    result.message = reason.to_string();
                    self.persist_step(execution_id, &result);
                    continue;
                }

                let mut result = TestStepResult::new(&step, row_tag);
                let outcome = self.execute_step(&manager, driver.as_ref(), &step).await;

                // Screenshot on success and failure paths alike
                if let Some(path) = self
                    .capture_screenshot(driver.as_ref(), execution_id, &step, row_tag)
                    .await
                {
                    result.screenshot = Some(path);
                }

                match outcome {
                    Ok(message) => {
                        result.status = StepStatus::Passed;
                        result.message = message;
                    }
                    Err(e) => {
                        let business = e.is_business_failure();
                        result.status = if business {
                            StepStatus::Failed
                        } else {
                            StepStatus::Error
                        };
                        result.message = e.to_string();
                        if business {
                            any_failed = true;
                        } else {
                            any_error = true;
                        }
                        if first_problem.is_none() {
                            first_problem = Some(format!("step {}: {}", step.step_number, e));
                        }
                        // Fail fast within this row; later rows still run
                        abort_row = true;
                    }
                }
                self.persist_step(execution_id, &result);
            }

            if stopped {
                break;
            }
        }

        let status = if stopped {
            ExecutionStatus::Stopped
        } else if any_error {
            ExecutionStatus::Error
        } else if any_failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Passed
        };
        (status, first_problem)
    }

    async fn execute_step(
        &self,
        manager: &LocatorManager,
        driver: &dyn ExecutionDriver,
        step: &TestStep,
    ) -> Result<String> {
        debug!(
            "Step {}: {} on {}",
            step.step_number,
            step.kind.name(),
            step.element
        );
        match &step.kind {
            StepKind::Assert(kind) => {
                self.evaluate_assertion(manager, driver, step, kind).await
            }
            _ => self.perform_action(manager, driver, step).await,
        }
    }

    async fn perform_action(
        &self,
        manager: &LocatorManager,
        driver: &dyn ExecutionDriver,
        step: &TestStep,
    ) -> Result<String> {
        let handle = manager
            .wait_for(&step.element, step.kind.wait_condition(), None)
            .await?;

        let action = match &step.kind {
            StepKind::Click => DriverAction::Click,
            StepKind::Input => DriverAction::Input {
                text: step.value.clone().unwrap_or_default(),
            },
            StepKind::Clear => DriverAction::Clear,
            StepKind::Submit => DriverAction::Submit,
            StepKind::Scroll => DriverAction::Scroll,
            StepKind::Hover => DriverAction::Hover,
            StepKind::DoubleClick => DriverAction::DoubleClick,
            StepKind::RightClick => DriverAction::RightClick,
            StepKind::DragAndDrop { target } => {
                let target_handle = manager
                    .wait_for(target, WaitCondition::Visible, None)
                    .await?;
                DriverAction::DragAndDrop {
                    target: target_handle,
                }
            }
            StepKind::Assert(_) => {
                return Err(Error::Internal(
                    "assertion step routed to action path".to_string(),
                ))
            }
        };

        match driver.act(&handle, &action).await {
            Ok(()) => Ok(format!("{} on {}", action.name(), step.element)),
            Err(e) => {
                // The handle may have gone stale; drop it from the cache
                manager.invalidate(&step.element);
                Err(e)
            }
        }
    }

    async fn evaluate_assertion(
        &self,
        manager: &LocatorManager,
        driver: &dyn ExecutionDriver,
        step: &TestStep,
        kind: &AssertionKind,
    ) -> Result<String> {
        // Boolean assertions take value "false" to assert the negative
        let expect_true = step.value.as_deref().map(|v| v != "false").unwrap_or(true);

        match kind {
            AssertionKind::Present => {
                let actual = driver
                    .check(&step.element, WaitCondition::Presence)
                    .await?
                    .is_some();
                bool_verdict("present", &step.element, expect_true, actual)
            }
            AssertionKind::Visible => {
                let actual = driver
                    .check(&step.element, WaitCondition::Visible)
                    .await?
                    .is_some();
                bool_verdict("visible", &step.element, expect_true, actual)
            }
            AssertionKind::Enabled => {
                let actual = self
                    .read_property(manager, driver, step, ElementProperty::Enabled)
                    .await?
                    .as_bool()
                    .unwrap_or(false);
                bool_verdict("enabled", &step.element, expect_true, actual)
            }
            AssertionKind::Selected => {
                let actual = self
                    .read_property(manager, driver, step, ElementProperty::Selected)
                    .await?
                    .as_bool()
                    .unwrap_or(false);
                bool_verdict("selected", &step.element, expect_true, actual)
            }
            AssertionKind::TextEquals => {
                let expected = require_value(step, kind)?;
                let actual = stringify(
                    &self
                        .read_property(manager, driver, step, ElementProperty::Text)
                        .await?,
                );
                text_verdict("text_equals", &step.element, &expected, &actual, actual == expected)
            }
            AssertionKind::TextContains => {
                let expected = require_value(step, kind)?;
                let actual = stringify(
                    &self
                        .read_property(manager, driver, step, ElementProperty::Text)
                        .await?,
                );
                text_verdict(
                    "text_contains",
                    &step.element,
                    &expected,
                    &actual,
                    actual.contains(&expected),
                )
            }
            AssertionKind::AttributeEquals { attribute } => {
                let expected = require_value(step, kind)?;
                let actual = stringify(
                    &self
                        .read_property(
                            manager,
                            driver,
                            step,
                            ElementProperty::Attribute(attribute.clone()),
                        )
                        .await?,
                );
                text_verdict(
                    &format!("attribute_equals[{}]", attribute),
                    &step.element,
                    &expected,
                    &actual,
                    actual == expected,
                )
            }
            AssertionKind::AttributeContains { attribute } => {
                let expected = require_value(step, kind)?;
                let actual = stringify(
                    &self
                        .read_property(
                            manager,
                            driver,
                            step,
                            ElementProperty::Attribute(attribute.clone()),
                        )
                        .await?,
                );
                text_verdict(
                    &format!("attribute_contains[{}]", attribute),
                    &step.element,
                    &expected,
                    &actual,
                    actual.contains(&expected),
                )
            }
            AssertionKind::CssProperty { property } => {
                let expected = require_value(step, kind)?;
                let actual = stringify(
                    &self
                        .read_property(
                            manager,
                            driver,
                            step,
                            ElementProperty::CssProperty(property.clone()),
                        )
                        .await?,
                );
                text_verdict(
                    &format!("css_property[{}]", property),
                    &step.element,
                    &expected,
                    &actual,
                    actual == expected,
                )
            }
            AssertionKind::ElementCount => {
                let expected: usize = require_value(step, kind)?.parse().map_err(|_| {
                    Error::InvalidConfig("element_count expects an integer value".to_string())
                })?;
                let actual = self
                    .read_property(manager, driver, step, ElementProperty::Count)
                    .await?
                    .as_u64()
                    .unwrap_or(0) as usize;
                text_verdict(
                    "element_count",
                    &step.element,
                    &expected.to_string(),
                    &actual.to_string(),
                    actual == expected,
                )
            }
            AssertionKind::PageSourceContains => {
                let expected = require_value(step, kind)?;
                let source = driver.page_source().await?;
                if source.contains(&expected) {
                    Ok(format!("page source contains \"{}\"", expected))
                } else {
                    Err(Error::AssertionFailed(format!(
                        "page_source_contains: expected \"{}\" in page source",
                        expected
                    )))
                }
            }
            AssertionKind::UrlEquals => {
                let expected = require_value(step, kind)?;
                let actual = driver.current_url().await?;
                text_verdict("url_equals", &step.element, &expected, &actual, actual == expected)
            }
        }
    }

    /// Resolve through the cache and read one property, evicting the
    /// cached handle when the read trips over a stale reference.
    async fn read_property(
        &self,
        manager: &LocatorManager,
        driver: &dyn ExecutionDriver,
        step: &TestStep,
        property: ElementProperty,
    ) -> Result<Value> {
        let handle = manager.find(&step.element, true).await?;
        match driver.read(&handle, &property).await {
            Ok(value) => Ok(value),
            Err(e) => {
                manager.invalidate(&step.element);
                Err(e)
            }
        }
    }

    async fn capture_screenshot(
        &self,
        driver: &dyn ExecutionDriver,
        execution_id: &str,
        step: &TestStep,
        row: Option<usize>,
    ) -> Option<String> {
        let bytes = match driver.screenshot().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Screenshot capture failed: {}", e);
                return None;
            }
        };
        let dir = self.config.screenshot_dir.join(execution_id);
        let file = match row {
            Some(row) => format!("row{}-step{}.png", row, step.step_number),
            None => format!("step{}.png", step.step_number),
        };
        let path = dir.join(file);
        if let Err(e) = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, &bytes)) {
            warn!("Failed to write screenshot {}: {}", path.display(), e);
            return None;
        }
        Some(path.to_string_lossy().into_owned())
    }

    fn persist(&self, execution: &TestExecution) {
        if let Err(e) = self.repository.update(execution) {
            error!("Failed to persist execution {}: {}", execution.id, e);
        }
    }

    fn persist_step(&self, execution_id: &str, result: &TestStepResult) {
        if let Err(e) = self.repository.append_step_result(execution_id, result) {
            error!(
                "Failed to persist step {} of execution {}: {}",
                result.step_number, execution_id, e
            );
        }
    }
}

fn require_value(step: &TestStep, kind: &AssertionKind) -> Result<String> {
    step.value.clone().ok_or_else(|| {
        Error::InvalidConfig(format!(
            "assertion {} on step {} requires a value",
            kind.name(),
            step.step_number
        ))
    })
}

fn bool_verdict(
    name: &str,
    element: &testgrid_common::Locator,
    expected: bool,
    actual: bool,
) -> Result<String> {
    if actual == expected {
        Ok(format!("{} on {}: {}", name, element, actual))
    } else {
        Err(Error::AssertionFailed(format!(
            "{} on {}: expected {}, actual {}",
            name, element, expected, actual
        )))
    }
}

fn text_verdict(
    name: &str,
    element: &testgrid_common::Locator,
    expected: &str,
    actual: &str,
    ok: bool,
) -> Result<String> {
    if ok {
        Ok(format!("{} on {}: \"{}\"", name, element, actual))
    } else {
        Err(Error::AssertionFailed(format!(
            "{} on {}: expected \"{}\", actual \"{}\"",
            name, element, expected, actual
        )))
    }
}
