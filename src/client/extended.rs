//! Extended query protocol: Parse/Bind/Describe/Execute/Close processed one
//! at a time, completions buffered, errors latched until the Sync barrier.

use std::sync::Arc;

use bytes::BufMut;

use crate::encoder;
use crate::errors::Error;
use crate::executor::{Executor, RowCursor};
use crate::messages::backend::{
    bind_complete, close_complete, command_complete, empty_query_response, no_data,
    parameter_description, parse_complete, portal_suspended,
};
use crate::statement::{command_complete_tag, param_format, Portal, PortalExecution, PreparedStatement};

use super::core::Client;
use super::simple_query::describe_row;

impl<S, T, E> Client<S, T, E>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
    T: tokio::io::AsyncWrite + std::marker::Unpin,
    E: Executor,
{
    /// Parse: rewrite the SQL and store it under the given name.
    pub(crate) fn handle_parse(
        &mut self,
        name: String,
        sql: String,
        param_types: Vec<i32>,
    ) -> Result<(), Error> {
        self.in_extended_batch = true;

        // A named statement may only be replaced after an explicit Close;
        // the unnamed one is overwritten freely.
        if !name.is_empty() && self.statements.contains_key(&name) {
            return Err(Error::Protocol(format!(
                "prepared statement {name:?} already exists"
            )));
        }

        let rewritten = self.config.rewriter.rewrite(&sql);
        let statement = PreparedStatement::new(name.clone(), sql, rewritten, param_types);
        self.statements.insert(name, Arc::new(statement));
        self.buffer.put(parse_complete());
        Ok(())
    }

    /// Bind: construct a portal over a prepared statement.
    pub(crate) fn handle_bind(
        &mut self,
        portal_name: String,
        statement_name: String,
        param_formats: Vec<i16>,
        param_values: Vec<Option<bytes::BytesMut>>,
        result_formats: Vec<i16>,
    ) -> Result<(), Error> {
        self.in_extended_batch = true;

        let statement = self
            .statements
            .get(&statement_name)
            .cloned()
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "prepared statement {statement_name:?} does not exist"
                ))
            })?;

        if param_values.len() != statement.param_count {
            return Err(Error::Protocol(format!(
                "bind supplies {} parameter values but {} {} expected",
                param_values.len(),
                statement.param_count,
                if statement.param_count == 1 { "is" } else { "are" },
            )));
        }

        // Validate format vectors now so a malformed Bind fails at Bind
        // time, not in the middle of an Execute.
        if param_formats.len() > 1 && param_formats.len() != param_values.len() {
            return Err(Error::Protocol(format!(
                "parameter format vector has {} entries for {} parameters",
                param_formats.len(),
                param_values.len()
            )));
        }
        for index in 0..param_values.len() {
            param_format(&param_formats, index, param_values.len())?;
        }
        for code in &result_formats {
            if *code != 0 && *code != 1 {
                return Err(Error::Protocol(format!("invalid format code {code}")));
            }
        }

        if !portal_name.is_empty() && self.portals.contains_key(&portal_name) {
            return Err(Error::Protocol(format!(
                "portal {portal_name:?} already exists"
            )));
        }

        let portal = Portal::new(
            portal_name.clone(),
            statement,
            param_formats,
            param_values,
            result_formats,
        );
        self.portals.insert(portal_name, portal);
        self.buffer.put(bind_complete());
        Ok(())
    }

    /// Describe: parameter oids and result shape for a statement, result
    /// shape only for a portal.
    pub(crate) async fn handle_describe(&mut self, target: char, name: &str) -> Result<(), Error> {
        self.in_extended_batch = true;

        if target == 'S' {
            let statement = self
                .statements
                .get(name)
                .cloned()
                .ok_or_else(|| {
                    Error::Protocol(format!("prepared statement {name:?} does not exist"))
                })?;

            // Without bound parameter values there is nothing to execute,
            // so the result shape of a row-returning statement is unknown.
            if statement.returns_rows() {
                return Err(Error::Unsupported(
                    "cannot describe a statement that has not been bound".into(),
                ));
            }
            self.buffer
                .put(parameter_description(&statement.declared_param_oids()));
            self.buffer.put(no_data());
            return Ok(());
        }

        let mut portal = self
            .portals
            .remove(name)
            .ok_or_else(|| Error::Protocol(format!("portal {name:?} does not exist")))?;
        let result = self.describe_portal(&mut portal).await;
        self.portals.insert(portal.name.clone(), portal);
        result
    }

    async fn describe_portal(&mut self, portal: &mut Portal) -> Result<(), Error> {
        self.ensure_started(portal).await?;
        match &portal.execution {
            PortalExecution::Cursor(cursor) => {
                let formats = encoder::resolve_formats(
                    &portal.result_formats,
                    cursor.columns().len(),
                    self.config.text_format,
                    self.config.force_binary,
                )?;
                self.buffer.put(describe_row(cursor.columns(), &formats));
            }
            _ => {
                self.buffer.put(no_data());
            }
        }
        Ok(())
    }

    /// Execute: run or resume the portal, emitting at most `max_rows` rows
    /// (zero means no limit).
    pub(crate) async fn handle_execute(&mut self, name: &str, max_rows: i32) -> Result<(), Error> {
        self.in_extended_batch = true;

        let mut portal = self
            .portals
            .remove(name)
            .ok_or_else(|| Error::Protocol(format!("portal {name:?} does not exist")))?;
        let result = self.execute_portal(&mut portal, max_rows).await;
        self.portals.insert(portal.name.clone(), portal);
        result
    }

    async fn execute_portal(&mut self, portal: &mut Portal, max_rows: i32) -> Result<(), Error> {
        self.ensure_started(portal).await?;

        let command = portal.statement.command.clone();
        let Portal {
            execution,
            rows_emitted,
            result_formats,
            ..
        } = portal;

        match execution {
            PortalExecution::Empty => {
                self.buffer.put(empty_query_response());
            }
            PortalExecution::Update(count) => {
                self.buffer
                    .put(command_complete(&command_complete_tag(&command, *count)));
                self.note_command(&command);
            }
            PortalExecution::Cursor(cursor) => {
                let formats = encoder::resolve_formats(
                    result_formats,
                    cursor.columns().len(),
                    self.config.text_format,
                    self.config.force_binary,
                )?;

                let limit = if max_rows > 0 {
                    max_rows as u64
                } else {
                    u64::MAX
                };
                let mut emitted: u64 = 0;
                let mut exhausted = false;
                while emitted < limit {
                    match cursor.next_row().map_err(Error::from)? {
                        Some(values) => {
                            self.buffer.put(encoder::data_row(&values, &formats)?);
                            emitted += 1;
                            *rows_emitted += 1;
                        }
                        None => {
                            exhausted = true;
                            break;
                        }
                    }
                }

                if exhausted {
                    self.buffer.put(command_complete(&command_complete_tag(
                        &command,
                        *rows_emitted,
                    )));
                } else {
                    self.buffer.put(portal_suspended());
                }
            }
            PortalExecution::NotStarted => unreachable!("portal was just started"),
        }
        Ok(())
    }

    /// Run the portal's SQL downstream if it has not run yet.
    async fn ensure_started(&mut self, portal: &mut Portal) -> Result<(), Error> {
        if portal.started() {
            return Ok(());
        }
        if portal.statement.is_empty() {
            portal.execution = PortalExecution::Empty;
            return Ok(());
        }
        let sql = portal.materialize_sql()?;
        let outcome = self.executor.execute(&sql).await?;
        portal.accept(outcome);
        Ok(())
    }

    /// Close: drop a statement or portal. Closing a name that does not
    /// exist is not an error.
    pub(crate) fn handle_close(&mut self, target: char, name: &str) -> Result<(), Error> {
        self.in_extended_batch = true;

        match target {
            'S' => {
                self.statements.remove(name);
            }
            _ => {
                self.portals.remove(name);
            }
        }
        self.buffer.put(close_complete());
        Ok(())
    }
}
