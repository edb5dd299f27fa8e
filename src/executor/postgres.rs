//! Reference [`Executor`] backed by the PostgreSQL simple-query client.
//!
//! The credentials file named on the command line carries the backend
//! connection configuration (libpq keyword/value syntax); the `-d` database
//! selects the database within it. Rows surface as native text values, which
//! is exactly what the `NativeText` result format forwards byte-for-byte.

use log::warn;

use crate::errors::Error;
use crate::executor::{
    BackendOptions, BufferedRows, Column, ExecuteError, Executor, Outcome, Value,
};
use crate::messages::types::DataType;

pub struct PostgresExecutor {
    client: tokio_postgres::Client,
}

/// Connect using the credentials file; the connection task is detached and
/// only logged on failure, the session itself sees errors via `execute`.
pub async fn connect(options: &BackendOptions) -> Result<PostgresExecutor, Error> {
    let raw = tokio::fs::read_to_string(&options.credentials)
        .await
        .map_err(|err| {
            Error::BadConfig(format!(
                "cannot read credentials file {:?}: {err}",
                options.credentials
            ))
        })?;

    let mut config: tokio_postgres::Config = raw
        .trim()
        .parse()
        .map_err(|err| Error::BadConfig(format!("bad credentials file: {err}")))?;
    config.dbname(&options.database);
    config.application_name("pg_gateman");

    let (client, connection) = config
        .connect(tokio_postgres::NoTls)
        .await
        .map_err(|err| Error::BadConfig(format!("backend connection failed: {err}")))?;

    let resource = options.resource_path();
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!("Backend connection for {resource} closed: {err}");
        }
    });

    Ok(PostgresExecutor { client })
}

impl Executor for PostgresExecutor {
    async fn execute(&mut self, sql: &str) -> Result<Outcome, ExecuteError> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(to_execute_error)?;

        let mut columns: Option<Vec<Column>> = None;
        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut update_count: u64 = 0;

        for message in messages {
            match message {
                tokio_postgres::SimpleQueryMessage::RowDescription(description) => {
                    columns = Some(
                        description
                            .iter()
                            .map(|column| Column::new(column.name(), DataType::Text))
                            .collect(),
                    );
                }
                tokio_postgres::SimpleQueryMessage::Row(row) => {
                    if columns.is_none() {
                        columns = Some(
                            row.columns()
                                .iter()
                                .map(|column| Column::new(column.name(), DataType::Text))
                                .collect(),
                        );
                    }
                    let mut values = Vec::with_capacity(row.len());
                    for index in 0..row.len() {
                        values.push(match row.get(index) {
                            Some(text) => Value::Text(text.to_string()),
                            None => Value::Null,
                        });
                    }
                    rows.push(values);
                }
                tokio_postgres::SimpleQueryMessage::CommandComplete(count) => {
                    update_count = count;
                }
                _ => {}
            }
        }

        match columns {
            Some(columns) => Ok(Outcome::Rows(Box::new(BufferedRows::new(columns, rows)))),
            None => Ok(Outcome::UpdateCount(update_count)),
        }
    }
}

fn to_execute_error(err: tokio_postgres::Error) -> ExecuteError {
    match err.as_db_error() {
        Some(db) => ExecuteError {
            message: db.message().to_string(),
            sqlstate: Some(db.code().code().to_string()),
        },
        None => ExecuteError {
            message: err.to_string(),
            sqlstate: None,
        },
    }
}
