//! SQLite store for execution records

use crate::error::{Error, Result};
use crate::types::{TestExecution, TestStepResult};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Database wrapper holding finalized and in-flight execution records
#[derive(Clone)]
pub struct ExecutionStore {
    conn: Arc<Mutex<Connection>>,
}

impl ExecutionStore {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;

        info!("Opened execution store at {:?}", path.as_ref());
        Ok(store)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                test_case_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_case ON executions(test_case_id);

            CREATE TABLE IF NOT EXISTS step_results (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                step_number INTEGER NOT NULL,
                record TEXT NOT NULL,
                FOREIGN KEY (execution_id) REFERENCES executions(id)
            );
            CREATE INDEX IF NOT EXISTS idx_step_results_execution ON step_results(execution_id);
            "#,
        )?;
        Ok(())
    }

    /// Insert a newly created execution record
    pub fn insert_execution(&self, execution: &TestExecution) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO executions (id, test_case_id, status, record, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                execution.id,
                execution.test_case_id,
                execution.status.to_string(),
                serde_json::to_string(execution)?,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Overwrite an existing execution record
    pub fn update_execution(&self, execution: &TestExecution) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE executions SET status = ?2, record = ?3 WHERE id = ?1",
            params![
                execution.id,
                execution.status.to_string(),
                serde_json::to_string(execution)?,
            ],
        )?;
        if changed == 0 {
            return Err(Error::ExecutionNotFound {
                id: execution.id.clone(),
            });
        }
        Ok(())
    }

    pub fn get_execution(&self, id: &str) -> Result<Option<TestExecution>> {
        let conn = self.conn.lock();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM executions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        record
            .map(|r| serde_json::from_str(&r).map_err(Error::from))
            .transpose()
    }

    /// All executions of one test case, oldest first
    pub fn list_by_test_case(&self, test_case_id: &str) -> Result<Vec<TestExecution>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT record FROM executions WHERE test_case_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![test_case_id], |row| row.get::<_, String>(0))?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(serde_json::from_str(&row?)?);
        }
        Ok(executions)
    }

    /// Append one step result to an execution
    pub fn append_step_result(&self, execution_id: &str, result: &TestStepResult) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO step_results (execution_id, step_number, record) VALUES (?1, ?2, ?3)",
            params![
                execution_id,
                result.step_number,
                serde_json::to_string(result)?,
            ],
        )?;
        Ok(())
    }

    /// Step results of one execution in recorded order
    pub fn list_step_results(&self, execution_id: &str) -> Result<Vec<TestStepResult>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT record FROM step_results WHERE execution_id = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![execution_id], |row| row.get::<_, String>(0))?;
        let mut results = Vec::new();
        for row in rows {
            results.push(serde_json::from_str(&row?)?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionStatus, Locator, LocatorStrategy, StepKind, TestStep};

    fn sample_step() -> TestStep {
        TestStep {
            step_number: 1,
            element: Locator::new(LocatorStrategy::Id, "submit"),
            kind: StepKind::Click,
            value: None,
        }
    }

    #[test]
    fn test_execution_roundtrip() {
        let store = ExecutionStore::open_memory().unwrap();
        let mut exec = TestExecution::new("case-1", "staging");
        store.insert_execution(&exec).unwrap();

        exec.begin().unwrap();
        exec.finish(ExecutionStatus::Passed, None).unwrap();
        store.update_execution(&exec).unwrap();

        let loaded = store.get_execution(&exec.id).unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Passed);
        assert!(loaded.duration_ms.is_some());
    }

    #[test]
    fn test_update_unknown_execution_fails() {
        let store = ExecutionStore::open_memory().unwrap();
        let exec = TestExecution::new("case-1", "staging");
        assert!(matches!(
            store.update_execution(&exec),
            Err(Error::ExecutionNotFound { .. })
        ));
    }

    #[test]
    fn test_step_results_keep_order() {
        let store = ExecutionStore::open_memory().unwrap();
        let exec = TestExecution::new("case-1", "staging");
        store.insert_execution(&exec).unwrap();

        for n in 1..=3 {
            let mut step = sample_step();
            step.step_number = n;
            let result = TestStepResult::new(&step, None);
            store.append_step_result(&exec.id, &result).unwrap();
        }

        let results = store.list_step_results(&exec.id).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| r.step_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_list_by_test_case() {
        let store = ExecutionStore::open_memory().unwrap();
        for _ in 0..2 {
            store
                .insert_execution(&TestExecution::new("case-a", "dev"))
                .unwrap();
        }
        store
            .insert_execution(&TestExecution::new("case-b", "dev"))
            .unwrap();
        assert_eq!(store.list_by_test_case("case-a").unwrap().len(), 2);
        assert_eq!(store.list_by_test_case("case-b").unwrap().len(), 1);
    }
}
