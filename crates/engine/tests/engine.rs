//! End-to-end engine behavior against the simulated driver

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use testgrid_common::{
    AssertionKind, EngineConfig, ExecutionStatus, Locator, LocatorStrategy, Resource,
    ResourceStatus, ResourceType, StepKind, StepStatus, TestCase, TestStep,
};
use testgrid_engine::driver::FixedDriverFactory;
use testgrid_engine::sim::{ClickEffect, SimElement, SimulatedDriver};
use testgrid_engine::{ExecutionEngine, InMemoryRepository};
use testgrid_pool::ResourcePool;

fn browser_resource(id: &str) -> Resource {
    let mut config = HashMap::new();
    config.insert("browser_type".to_string(), json!("chrome"));
    config.insert("version".to_string(), json!("120"));
    Resource::new(id, ResourceType::Browser, format!("Chrome {}", id), config)
}

fn css(selector: &str) -> Locator {
    let mut locator = Locator::new(LocatorStrategy::CssSelector, selector);
    locator.timeout_ms = 500;
    locator.poll_interval_ms = 20;
    locator
}

fn step(number: u32, selector: &str, kind: StepKind, value: Option<&str>) -> TestStep {
    TestStep {
        step_number: number,
        element: css(selector),
        kind,
        value: value.map(String::from),
    }
}

fn case(name: &str, steps: Vec<TestStep>) -> TestCase {
    TestCase {
        name: name.to_string(),
        description: String::new(),
        device_type: ResourceType::Browser,
        steps,
        data_source: None,
        data_schema: None,
        fixture: None,
    }
}

struct Harness {
    engine: Arc<ExecutionEngine>,
    pool: Arc<ResourcePool>,
    driver: Arc<SimulatedDriver>,
    _dir: tempfile::TempDir,
}

fn harness(driver: SimulatedDriver) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.store_path = dir.path().to_path_buf();
    config.screenshot_dir = dir.path().join("screenshots");
    config.allocation.wait_timeout_ms = 200;
    config.allocation.initial_backoff_ms = 10;

    let pool = Arc::new(ResourcePool::new(config.allocation.clone()));
    pool.add(browser_resource("chrome-1")).unwrap();

    let driver = Arc::new(driver);
    let engine = Arc::new(ExecutionEngine::new(
        pool.clone(),
        Arc::new(FixedDriverFactory(driver.clone())),
        Arc::new(InMemoryRepository::new()),
        config,
    ));
    Harness {
        engine,
        pool,
        driver,
        _dir: dir,
    }
}

/// Click succeeds, text assertion sees "FAIL" instead of "OK": the step is
/// recorded failed with expected and actual values, the execution fails,
/// and the resource comes back exactly once.
#[tokio::test]
async fn failed_assertion_fails_execution_and_releases_resource() {
    let driver = SimulatedDriver::new();
    driver.set_element(
        "#submit",
        SimElement {
            on_click: Some(ClickEffect {
                set_text: [("#result".to_string(), "FAIL".to_string())].into(),
                show: vec![],
            }),
            ..SimElement::default()
        },
    );
    driver.set_element("#result", SimElement::default());

    let h = harness(driver);
    let test_case = case(
        "submit-check",
        vec![
            step(1, "#submit", StepKind::Click, None),
            step(
                2,
                "#result",
                StepKind::Assert(AssertionKind::TextEquals),
                Some("OK"),
            ),
        ],
    );

    let execution = h.engine.run_to_completion(test_case, "staging").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.end_time.is_some());

    let results = h.engine.get_step_results(&execution.id).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, StepStatus::Passed);
    assert_eq!(results[1].status, StepStatus::Failed);
    assert!(results[1].message.contains("OK"));
    assert!(results[1].message.contains("FAIL"));

    // Resource released exactly once and reusable
    let resource = h.pool.get("chrome-1").unwrap();
    assert_eq!(resource.status, ResourceStatus::Available);
    assert_eq!(resource.usage_count, 1);
    assert!(h.driver.journal().contains(&"click:#submit".to_string()));
}

#[tokio::test]
async fn passing_run_records_screenshots() {
    let driver = SimulatedDriver::new();
    driver.set_element("#ok", SimElement::default());

    let h = harness(driver);
    let test_case = case(
        "single-click",
        vec![step(1, "#ok", StepKind::Click, None)],
    );

    let execution = h.engine.run_to_completion(test_case, "dev").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Passed);
    assert_eq!(execution.device_id.as_deref(), Some("chrome-1"));

    let results = h.engine.get_step_results(&execution.id).unwrap();
    let shot = results[0].screenshot.as_ref().unwrap();
    assert!(std::path::Path::new(shot).exists());
}

/// Three data rows, the middle one failing: rows stay independent, the
/// failing row's remaining steps are skipped, and the execution fails.
#[tokio::test]
async fn data_driven_rows_fail_independently() {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("users.csv");
    std::fs::write(&data_path, "field\nalpha\nmissing\ngamma\n").unwrap();

    let driver = SimulatedDriver::new();
    for selector in ["#alpha", "#gamma", "#done"] {
        driver.set_element(selector, SimElement::default());
    }
    // "#missing" never exists, so row 2's first step times out

    let h = harness(driver);
    let mut test_case = case(
        "per-row",
        vec![
            step(1, "#${field}", StepKind::Click, None),
            step(2, "#done", StepKind::Click, None),
        ],
    );
    test_case.data_source = Some(data_path);

    let execution = h.engine.run_to_completion(test_case, "dev").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);

    let results = h.engine.get_step_results(&execution.id).unwrap();
    assert_eq!(results.len(), 6);

    // Row 0 passes fully
    assert_eq!(results[0].status, StepStatus::Passed);
    assert_eq!(results[1].status, StepStatus::Passed);
    // Row 1 fails on the parameterized click, remainder skipped
    assert_eq!(results[2].row_index, Some(1));
    assert_eq!(results[2].status, StepStatus::Failed);
    assert_eq!(results[3].status, StepStatus::Skipped);
    // Row 2 runs to completion despite row 1
    assert_eq!(results[4].row_index, Some(2));
    assert_eq!(results[4].status, StepStatus::Passed);
    assert_eq!(results[5].status, StepStatus::Passed);
}

#[tokio::test]
async fn wait_for_late_element_and_timeout() {
    let driver = SimulatedDriver::new();
    // Becomes visible on the third probe: within the 500ms step budget
    driver.set_element(
        "#late",
        SimElement {
            visible_after_checks: 2,
            ..SimElement::default()
        },
    );
    // Never satisfies the input wait within its timeout
    driver.set_element(
        "#never",
        SimElement {
            visible: false,
            ..SimElement::default()
        },
    );

    let h = harness(driver);

    let ok_case = case("late", vec![step(1, "#late", StepKind::Click, None)]);
    let execution = h.engine.run_to_completion(ok_case, "dev").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Passed);

    let timeout_case = case(
        "never",
        vec![step(1, "#never", StepKind::Input, Some("text"))],
    );
    let execution = h.engine.run_to_completion(timeout_case, "dev").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    let results = h.engine.get_step_results(&execution.id).unwrap();
    assert!(results[0].message.contains("Timed out"));

    // Both runs released the shared browser
    assert_eq!(
        h.pool.get("chrome-1").unwrap().status,
        ResourceStatus::Available
    );
}

#[tokio::test]
async fn exhausted_pool_blocks_execution() {
    let driver = SimulatedDriver::new();
    let h = harness(driver);
    // Occupy the only browser
    h.pool.allocate(ResourceType::Browser, "someone-else").unwrap();

    let test_case = case("starved", vec![step(1, "#a", StepKind::Click, None)]);
    let execution = h.engine.run_to_completion(test_case, "dev").await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Blocked);
    assert!(execution
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("no available browser resource"));
    // No step ran
    assert!(h.engine.get_step_results(&execution.id).unwrap().is_empty());
}

#[tokio::test]
async fn stop_request_honored_at_step_boundary() {
    let driver = SimulatedDriver::new();
    // Each step needs several polls, keeping the run alive long enough to
    // stop it partway through
    for i in 0..20 {
        driver.set_element(
            &format!("#s{}", i),
            SimElement {
                visible_after_checks: 3,
                ..SimElement::default()
            },
        );
    }

    let h = harness(driver);
    let steps = (0..20u32)
        .map(|i| step(i + 1, &format!("#s{}", i), StepKind::Click, None))
        .collect();
    let test_case = case("long-run", steps);

    let id = h.engine.clone().start(test_case, "dev").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.engine.stop(&id).unwrap();

    // Wait for the run to wind down
    let mut status = h.engine.get_status(&id).unwrap();
    for _ in 0..100 {
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = h.engine.get_status(&id).unwrap();
    }

    assert_eq!(status, ExecutionStatus::Stopped);
    let results = h.engine.get_step_results(&id).unwrap();
    assert!(results.iter().any(|r| r.status == StepStatus::Passed));
    assert!(results.iter().any(|r| r.status == StepStatus::Skipped));
    assert_eq!(
        h.pool.get("chrome-1").unwrap().status,
        ResourceStatus::Available
    );
}

#[tokio::test]
async fn assert_absent_passes_with_false_value() {
    let driver = SimulatedDriver::new();
    let h = harness(driver);

    let test_case = case(
        "absence",
        vec![step(
            1,
            "#ghost",
            StepKind::Assert(AssertionKind::Present),
            Some("false"),
        )],
    );
    let execution = h.engine.run_to_completion(test_case, "dev").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Passed);
}

#[tokio::test]
async fn unknown_execution_id_is_an_error() {
    let driver = SimulatedDriver::new();
    let h = harness(driver);
    assert!(h.engine.get_status("nope").is_err());
    assert!(h.engine.stop("nope").is_err());
}
