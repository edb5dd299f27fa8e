//! Simple query protocol: one Query message in, a self-contained response
//! stream out, always ending in ReadyForQuery.

use bytes::BufMut;
use log::debug;

use crate::encoder::{self, DataFormat};
use crate::errors::Error;
use crate::executor::{Executor, Outcome, RowCursor};
use crate::messages::backend::{
    command_complete, empty_query_response, ready_for_query, row_description, RowField,
};
use crate::statement::{command_complete_tag, command_token};

use super::core::Client;

impl<S, T, E> Client<S, T, E>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
    T: tokio::io::AsyncWrite + std::marker::Unpin,
    E: Executor,
{
    /// Handle one Query message. A Query implicitly ends any extended batch
    /// in progress.
    pub(crate) async fn handle_query(&mut self, sql: &str) -> Result<(), Error> {
        self.in_extended_batch = false;
        self.batch_failed = false;

        if let Err(err) = self.run_query(sql).await {
            return self.report_error(err, false).await;
        }

        self.buffer.put(ready_for_query(self.transaction.byte()));
        self.flush_buffer().await
    }

    async fn run_query(&mut self, sql: &str) -> Result<(), Error> {
        if sql.trim().is_empty() {
            self.buffer.put(empty_query_response());
            return Ok(());
        }

        // The backing service has no session variables; acknowledging SET
        // without executing it keeps drivers that configure their session
        // at connect time working. The prefix match is deliberately exact.
        if sql.starts_with("SET ") {
            debug!("Client {}: ignoring {sql:?}", self.connection_id);
            self.buffer.put(command_complete("SET"));
            return Ok(());
        }

        let rewritten = self.config.rewriter.rewrite(sql);
        let command = command_token(&rewritten);

        let outcome = self.executor.execute(&rewritten).await?;
        match outcome {
            Outcome::UpdateCount(count) => {
                self.buffer
                    .put(command_complete(&command_complete_tag(&command, count)));
                self.note_command(&command);
            }
            Outcome::Rows(mut cursor) => {
                // Simple mode has no Bind: results are always text, in the
                // session's configured text form.
                let formats = vec![
                    self.config.text_format.data_format();
                    cursor.columns().len()
                ];
                self.buffer.put(describe_row(cursor.columns(), &formats));

                let mut rows: u64 = 0;
                loop {
                    match cursor.next_row().map_err(Error::from)? {
                        Some(values) => {
                            self.buffer.put(encoder::data_row(&values, &formats)?);
                            rows += 1;
                        }
                        None => break,
                    }
                }
                self.buffer
                    .put(command_complete(&command_complete_tag(&command, rows)));
            }
        }
        Ok(())
    }
}

/// Build a RowDescription for a cursor's columns under resolved formats.
pub(crate) fn describe_row(
    columns: &[crate::executor::Column],
    formats: &[DataFormat],
) -> bytes::BytesMut {
    let fields: Vec<RowField> = columns
        .iter()
        .zip(formats.iter())
        .map(|(column, format)| RowField {
            name: &column.name,
            data_type: column.data_type,
            format: encoder::wire_code(*format),
        })
        .collect();
    row_description(&fields)
}
