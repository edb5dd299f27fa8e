//! The downstream executor seam.
//!
//! The protocol engine hands a single translated SQL text to an [`Executor`]
//! and gets back either an update count or a forward-only row cursor. The
//! engine never looks behind this trait; swapping the managed-service driver
//! in production means implementing it.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};

use crate::messages::types::DataType;

pub mod postgres;

#[cfg(test)]
pub mod mock;

/// Error raised by the downstream service.
#[derive(Debug, Clone)]
pub struct ExecuteError {
    pub message: String,
    pub sqlstate: Option<String>,
}

impl ExecuteError {
    pub fn new(message: impl Into<String>) -> Self {
        ExecuteError {
            message: message.into(),
            sqlstate: None,
        }
    }
}

/// One typed cell value as surfaced by the downstream service.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Numeric(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Int8,
            Value::Float(_) => DataType::Float8,
            Value::Bytes(_) => DataType::Bytea,
            Value::Date(_) => DataType::Date,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Numeric(_) => DataType::Numeric,
            Value::Array(_) => DataType::TextArray,
            _ => DataType::Text,
        }
    }
}

/// Result-set column metadata.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Column {
            name: name.into(),
            data_type,
        }
    }
}

/// Lazy, forward-only sequence of rows. Not restartable.
pub trait RowCursor: Send {
    fn columns(&self) -> &[Column];

    /// The next row, or `None` when the cursor is exhausted.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>, ExecuteError>;
}

/// What one `execute` produced.
pub enum Outcome {
    UpdateCount(u64),
    Rows(Box<dyn RowCursor>),
}

/// The black-box downstream collaborator.
pub trait Executor: Send {
    fn execute(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = Result<Outcome, ExecuteError>> + Send;
}

/// Identifies the downstream database and where its credentials live.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub project: String,
    pub instance: String,
    pub database: String,
    pub credentials: PathBuf,
}

impl BackendOptions {
    /// Fully qualified resource path of the downstream database.
    pub fn resource_path(&self) -> String {
        format!(
            "projects/{}/instances/{}/databases/{}",
            self.project, self.instance, self.database
        )
    }
}

/// A cursor over rows that are already materialized in memory.
pub struct BufferedRows {
    columns: Vec<Column>,
    rows: VecDeque<Vec<Value>>,
}

impl BufferedRows {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        BufferedRows {
            columns,
            rows: rows.into(),
        }
    }
}

impl RowCursor for BufferedRows {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>, ExecuteError> {
        Ok(self.rows.pop_front())
    }
}
