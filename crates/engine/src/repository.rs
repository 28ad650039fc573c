//! Execution record persistence seam
//!
//! The engine writes execution and step records through this trait and
//! never learns about storage schema.

use parking_lot::RwLock;
use std::collections::HashMap;

use testgrid_common::{Error, ExecutionStore, Result, TestExecution, TestStepResult};

pub trait ExecutionRepository: Send + Sync {
    fn create(&self, execution: &TestExecution) -> Result<()>;
    fn update(&self, execution: &TestExecution) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<TestExecution>>;
    /// All executions of one test case, oldest first
    fn history(&self, test_case_id: &str) -> Result<Vec<TestExecution>>;
    fn append_step_result(&self, execution_id: &str, result: &TestStepResult) -> Result<()>;
    fn step_results(&self, execution_id: &str) -> Result<Vec<TestStepResult>>;
}

/// Keeps all records in process memory. The default for dry runs and tests.
#[derive(Default)]
pub struct InMemoryRepository {
    executions: RwLock<Vec<TestExecution>>,
    steps: RwLock<HashMap<String, Vec<TestStepResult>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionRepository for InMemoryRepository {
    fn create(&self, execution: &TestExecution) -> Result<()> {
        self.executions.write().push(execution.clone());
        Ok(())
    }

    fn update(&self, execution: &TestExecution) -> Result<()> {
        let mut executions = self.executions.write();
        let slot = executions
            .iter_mut()
            .find(|e| e.id == execution.id)
            .ok_or_else(|| Error::ExecutionNotFound {
                id: execution.id.clone(),
            })?;
        *slot = execution.clone();
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<TestExecution>> {
        Ok(self
            .executions
            .read()
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    fn history(&self, test_case_id: &str) -> Result<Vec<TestExecution>> {
        Ok(self
            .executions
            .read()
            .iter()
            .filter(|e| e.test_case_id == test_case_id)
            .cloned()
            .collect())
    }

    fn append_step_result(&self, execution_id: &str, result: &TestStepResult) -> Result<()> {
        self.steps
            .write()
            .entry(execution_id.to_string())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    fn step_results(&self, execution_id: &str) -> Result<Vec<TestStepResult>> {
        Ok(self
            .steps
            .read()
            .get(execution_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Durable records over the shared SQLite execution store.
pub struct SqliteRepository {
    store: ExecutionStore,
}

impl SqliteRepository {
    pub fn new(store: ExecutionStore) -> Self {
        Self { store }
    }
}

impl ExecutionRepository for SqliteRepository {
    fn create(&self, execution: &TestExecution) -> Result<()> {
        self.store.insert_execution(execution)
    }

    fn update(&self, execution: &TestExecution) -> Result<()> {
        self.store.update_execution(execution)
    }

    fn get(&self, id: &str) -> Result<Option<TestExecution>> {
        self.store.get_execution(id)
    }

    fn history(&self, test_case_id: &str) -> Result<Vec<TestExecution>> {
        self.store.list_by_test_case(test_case_id)
    }

    fn append_step_result(&self, execution_id: &str, result: &TestStepResult) -> Result<()> {
        self.store.append_step_result(execution_id, result)
    }

    fn step_results(&self, execution_id: &str) -> Result<Vec<TestStepResult>> {
        self.store.list_step_results(execution_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testgrid_common::ExecutionStatus;

    fn exercise(repo: &dyn ExecutionRepository) {
        let mut exec = TestExecution::new("case-1", "dev");
        repo.create(&exec).unwrap();

        exec.begin().unwrap();
        exec.finish(ExecutionStatus::Passed, None).unwrap();
        repo.update(&exec).unwrap();

        let loaded = repo.get(&exec.id).unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Passed);
        assert_eq!(repo.history("case-1").unwrap().len(), 1);
        assert!(repo.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_in_memory_repository() {
        exercise(&InMemoryRepository::new());
    }

    #[test]
    fn test_sqlite_repository() {
        let store = ExecutionStore::open_memory().unwrap();
        exercise(&SqliteRepository::new(store));
    }
}
