//! TestGrid Execution Engine
//!
//! Turns a test case (plus optional data rows) into a durable execution
//! record with ordered step results, resolving elements through a cached
//! locator layer and driving an injected device/browser capability.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ExecutionEngine                                             │
//! │    ├── allocate resource (testgrid-pool)                     │
//! │    ├── open driver session (DriverFactory)                   │
//! │    ├── expand data rows (DataSet + parameterize)             │
//! │    ├── per row: execute steps in order, fail fast            │
//! │    │     ├── LocatorManager.wait_for / find (cached)         │
//! │    │     ├── ExecutionDriver.act / read                      │
//! │    │     └── screenshot + TestStepResult                     │
//! │    └── finalize status, release resource (always)            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  LocatorManager                                              │
//! │    ├── LocatorCache: (strategy, selector) -> handle, TTL'd   │
//! │    │     and liveness-checked, evicted lazily                │
//! │    └── poll loop for presence/visible/clickable/selected     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod data;
pub mod driver;
pub mod engine;
pub mod locator;
pub mod params;
pub mod repository;
pub mod sim;

pub use data::DataSet;
pub use driver::{DriverFactory, ElementHandle, ExecutionDriver};
pub use engine::ExecutionEngine;
pub use locator::{LocatorCache, LocatorManager};
pub use repository::{ExecutionRepository, InMemoryRepository, SqliteRepository};
pub use sim::{SimulatedDriver, SimulatedDriverFactory};
