//! Scripted executor for protocol tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::executor::{BufferedRows, Column, ExecuteError, Executor, Outcome, Value};

/// What a scripted statement should produce.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Rows {
        columns: Vec<Column>,
        rows: Vec<Vec<Value>>,
    },
    Update(u64),
    Error(String),
}

/// Executor that answers from a SQL-text keyed script and records every
/// statement it was asked to run.
#[derive(Default)]
pub struct MockExecutor {
    responses: HashMap<String, MockResponse>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        MockExecutor::default()
    }

    pub fn on(mut self, sql: &str, response: MockResponse) -> Self {
        self.responses.insert(sql.to_string(), response);
        self
    }

    /// Shared view of the statements executed so far; survives the executor
    /// moving into a session task.
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.executed.clone()
    }
}

impl Executor for MockExecutor {
    async fn execute(&mut self, sql: &str) -> Result<Outcome, ExecuteError> {
        self.executed.lock().unwrap().push(sql.to_string());
        match self.responses.get(sql) {
            Some(MockResponse::Rows { columns, rows }) => Ok(Outcome::Rows(Box::new(
                BufferedRows::new(columns.clone(), rows.clone()),
            ))),
            Some(MockResponse::Update(count)) => Ok(Outcome::UpdateCount(*count)),
            Some(MockResponse::Error(message)) => Err(ExecuteError {
                message: message.clone(),
                sqlstate: Some("42601".to_string()),
            }),
            None => Err(ExecuteError::new(format!("no script for: {sql}"))),
        }
    }
}
