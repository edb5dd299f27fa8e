/// Handle clients by pretending to be a PostgreSQL server.
use std::collections::HashMap;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use crate::config::Config;
use crate::errors::Error;
use crate::executor::Executor;
use crate::messages::backend::{error_message, ready_for_query};
use crate::messages::{
    FrontendMessage, MAX_MESSAGE_SIZE, MESSAGE_BIND, MESSAGE_CLOSE, MESSAGE_DESCRIBE,
    MESSAGE_EXECUTE, MESSAGE_PARSE, MESSAGE_TERMINATE,
};
use crate::statement::{Portal, PreparedStatement};

/// Client-visible transaction status, as reported in ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TransactionStatus {
    pub fn byte(&self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// The client state. One of these is created per accepted connection.
pub struct Client<S, T, E> {
    /// The reads are buffered (8K by default).
    pub(crate) read: BufReader<S>,

    /// We buffer the writes ourselves because we know the protocol
    /// better than a stock buffer.
    pub(crate) write: T,

    /// Internal buffer, where we place messages until we have to flush
    /// them to the client.
    pub(crate) buffer: BytesMut,

    /// Monotonic id assigned by the listener.
    pub(crate) connection_id: i64,

    /// For query cancellation, the client is given a random process ID and
    /// secret on startup. Cancel requests are currently accepted and
    /// dropped, so neither is consulted again.
    #[allow(dead_code)]
    pub(crate) process_id: i32,
    #[allow(dead_code)]
    pub(crate) secret_key: i32,

    pub(crate) config: Arc<Config>,

    /// This session's own downstream handle.
    pub(crate) executor: E,

    /// name -> prepared statement. The unnamed statement lives under "".
    pub(crate) statements: HashMap<String, Arc<PreparedStatement>>,

    /// name -> portal. The unnamed portal lives under "".
    pub(crate) portals: HashMap<String, Portal>,

    pub(crate) transaction: TransactionStatus,

    /// Set once the first extended-protocol message of a batch arrives,
    /// cleared by Sync.
    pub(crate) in_extended_batch: bool,

    /// Latched by the first error inside an extended batch. While set,
    /// everything except Sync (and Terminate) is dropped unanswered.
    pub(crate) batch_failed: bool,
}

impl<S, T, E> Client<S, T, E>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
    T: tokio::io::AsyncWrite + std::marker::Unpin,
    E: Executor,
{
    /// Main per-session loop: read one message, process it to completion,
    /// read the next. Returns when the client terminates or goes away.
    pub async fn handle(&mut self) -> Result<(), Error> {
        loop {
            let mut code = [0u8; 1];
            if self.read.read_exact(&mut code).await.is_err() {
                // Client went away without a Terminate.
                debug!("Client {} closed the connection", self.connection_id);
                return Ok(());
            }

            let len = match self.read.read_i32().await {
                Ok(len) => len,
                Err(_) => return Ok(()),
            };
            if !(4..=MAX_MESSAGE_SIZE).contains(&len) {
                // Don't try to talk to a client this far out of sync.
                return Err(Error::MaxMessageSize);
            }

            let mut payload = vec![0u8; (len - 4) as usize];
            self.read
                .read_exact(&mut payload)
                .await
                .map_err(|err| Error::SocketError(format!("failed to read message: {err}")))?;
            let body = BytesMut::from(&payload[..]);

            trace!(
                "Client {}: message {:?} ({} bytes)",
                self.connection_id,
                code[0] as char,
                len
            );

            // A failed extended batch swallows everything up to the Sync
            // barrier; Terminate still works so a client can always leave.
            if self.batch_failed
                && code[0] != crate::messages::MESSAGE_SYNC
                && code[0] != MESSAGE_TERMINATE
            {
                continue;
            }

            let message = match FrontendMessage::decode(code[0], &body) {
                Ok(message) => message,
                Err(err) => {
                    // A bad extended-protocol message poisons the batch; a
                    // bad message in the ready state gets its error and a
                    // fresh ReadyForQuery.
                    let extended = self.in_extended_batch
                        || matches!(
                            code[0],
                            MESSAGE_PARSE
                                | MESSAGE_BIND
                                | MESSAGE_DESCRIBE
                                | MESSAGE_EXECUTE
                                | MESSAGE_CLOSE
                        );
                    self.report_error(err, extended).await?;
                    continue;
                }
            };

            match message {
                FrontendMessage::Terminate => {
                    debug!("Client {} sent Terminate", self.connection_id);
                    self.release();
                    return Ok(());
                }
                FrontendMessage::Query { sql } => {
                    self.handle_query(&sql).await?;
                }
                FrontendMessage::Parse {
                    name,
                    sql,
                    param_types,
                } => {
                    let result = self.handle_parse(name, sql, param_types);
                    self.finish_extended(result).await?;
                }
                FrontendMessage::Bind {
                    portal,
                    statement,
                    param_formats,
                    param_values,
                    result_formats,
                } => {
                    let result = self.handle_bind(
                        portal,
                        statement,
                        param_formats,
                        param_values,
                        result_formats,
                    );
                    self.finish_extended(result).await?;
                }
                FrontendMessage::Describe { target, name } => {
                    let result = self.handle_describe(target, &name).await;
                    self.finish_extended(result).await?;
                }
                FrontendMessage::Execute { portal, max_rows } => {
                    let result = self.handle_execute(&portal, max_rows).await;
                    self.finish_extended(result).await?;
                }
                FrontendMessage::Close { target, name } => {
                    let result = self.handle_close(target, &name);
                    self.finish_extended(result).await?;
                }
                FrontendMessage::Sync => {
                    self.handle_sync().await?;
                }
                FrontendMessage::Flush => {
                    self.flush_buffer().await?;
                }
                FrontendMessage::Password { .. } => {
                    self.report_error(
                        Error::Protocol("unexpected password message".into()),
                        self.in_extended_batch,
                    )
                    .await?;
                }
                FrontendMessage::FunctionCall => {
                    self.report_error(
                        Error::Unsupported("the function call sub-protocol is not supported".into()),
                        self.in_extended_batch,
                    )
                    .await?;
                }
            }
        }
    }

    /// Route an extended-operation result into the batch error latch.
    pub(crate) async fn finish_extended(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        match result {
            Ok(()) => Ok(()),
            Err(err) => self.report_error(err, true).await,
        }
    }

    /// Emit an ErrorResponse for a non-fatal error. In extended mode the
    /// first error latches the batch; in simple mode the response is
    /// followed by ReadyForQuery and the session stays ready.
    pub(crate) async fn report_error(&mut self, err: Error, extended: bool) -> Result<(), Error> {
        if err.is_fatal() {
            return Err(err);
        }
        debug!("Client {}: {err}", self.connection_id);

        if self.transaction == TransactionStatus::InTransaction {
            self.transaction = TransactionStatus::Failed;
        }

        if extended {
            if !self.batch_failed {
                self.batch_failed = true;
                self.buffer.put(error_message(&err.to_string(), err.sqlstate()));
            }
            Ok(())
        } else {
            self.buffer.put(error_message(&err.to_string(), err.sqlstate()));
            self.buffer.put(ready_for_query(self.transaction.byte()));
            self.flush_buffer().await
        }
    }

    /// Write out everything buffered so far.
    pub(crate) async fn flush_buffer(&mut self) -> Result<(), Error> {
        if !self.buffer.is_empty() {
            let buffer = std::mem::take(&mut self.buffer);
            self.write
                .write_all(&buffer)
                .await
                .map_err(|err| Error::SocketError(format!("failed to write to socket: {err}")))?;
        }
        self.write
            .flush()
            .await
            .map_err(|err| Error::SocketError(format!("failed to flush socket: {err}")))?;
        Ok(())
    }

    /// Sync: the extended-mode barrier. Reports the transaction status and
    /// clears the error latch.
    pub(crate) async fn handle_sync(&mut self) -> Result<(), Error> {
        let status = if self.batch_failed {
            b'E'
        } else {
            self.transaction.byte()
        };
        self.batch_failed = false;
        self.in_extended_batch = false;

        // The unnamed portal does not outlive the implicit transaction.
        if self.transaction != TransactionStatus::InTransaction {
            self.portals.remove("");
        }

        self.buffer.put(ready_for_query(status));
        self.flush_buffer().await
    }

    /// Track transaction boundaries from completed command tags.
    pub(crate) fn note_command(&mut self, command: &str) {
        match command {
            "BEGIN" => self.transaction = TransactionStatus::InTransaction,
            "COMMIT" | "ROLLBACK" => {
                self.transaction = TransactionStatus::Idle;
                self.end_transaction();
            }
            _ => {}
        }
    }

    pub(crate) fn end_transaction(&mut self) {
        self.portals.remove("");
    }

    /// Drop everything the session holds; any open cursor goes with it.
    pub(crate) fn release(&mut self) {
        self.portals.clear();
        self.statements.clear();
    }
}
