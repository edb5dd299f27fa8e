use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use crate::config::{Config, REPORTED_SERVER_VERSION};
use crate::errors::Error;
use crate::executor::Executor;
use crate::messages::backend::{
    authentication_ok, backend_key_data, cleartext_password_challenge, ready_for_query,
    server_parameter_message,
};
use crate::messages::constants::*;

use super::core::{Client, TransactionStatus};

/// Type of connection received from client.
pub(crate) enum ClientConnectionType {
    Startup,
    SslRequest,
    GssEncRequest,
    CancelQuery,
}

/// Handle the first message the client sends.
pub(crate) async fn get_startup<S>(
    stream: &mut S,
) -> Result<(ClientConnectionType, BytesMut), Error>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
{
    // Get startup message length.
    let len = match stream.read_i32().await {
        Ok(len) => len,
        Err(_) => return Err(Error::ClientBadStartup),
    };

    // Validate message length: minimum is 8 bytes (4 for length field + 4
    // for protocol code). Also reject negative or excessively large lengths.
    if !(8..=8 * 1024).contains(&len) {
        return Err(Error::ClientBadStartup);
    }

    // Get the rest of the message.
    let mut startup = vec![0u8; (len - 4) as usize];
    match stream.read_exact(&mut startup).await {
        Ok(_) => (),
        Err(_) => return Err(Error::ClientBadStartup),
    };

    let mut bytes = BytesMut::from(&startup[..]);
    let code = bytes.get_i32();

    match code {
        // Client is requesting SSL (TLS).
        SSL_REQUEST_CODE => Ok((ClientConnectionType::SslRequest, bytes)),

        // Client is requesting GSSAPI encryption.
        GSSENC_REQUEST_CODE => Ok((ClientConnectionType::GssEncRequest, bytes)),

        // Client wants to use plain text, requesting regular startup.
        PROTOCOL_VERSION_NUMBER => Ok((ClientConnectionType::Startup, bytes)),

        // Client is requesting to cancel a running query.
        CANCEL_REQUEST_CODE => Ok((ClientConnectionType::CancelQuery, bytes)),

        // Something else, probably something is wrong, and it's not our
        // fault, e.g. badly implemented Postgres client.
        _ => Err(Error::UnexpectedStartupCode(code)),
    }
}

/// Parse StartupMessage parameters, e.g. user, database, application_name.
pub(crate) fn parse_startup(mut bytes: BytesMut) -> Result<HashMap<String, String>, Error> {
    let mut result = HashMap::new();
    let mut buf = Vec::new();
    let mut tmp = String::new();

    while bytes.has_remaining() {
        let mut c = bytes.get_u8();

        // Null-terminated C-strings.
        while c != 0 {
            tmp.push(c as char);
            if !bytes.has_remaining() {
                return Err(Error::ClientBadStartup);
            }
            c = bytes.get_u8();
        }

        if !tmp.is_empty() {
            buf.push(tmp.clone());
            tmp.clear();
        }
    }

    // Expect pairs of name and value, and at least one pair to be present.
    if buf.len() % 2 != 0 || buf.len() < 2 {
        return Err(Error::ClientBadStartup);
    }

    let mut i = 0;
    while i < buf.len() {
        let name = buf[i].clone();
        let value = buf[i + 1].clone();
        let _ = result.insert(name, value);
        i += 2;
    }

    // The user parameter is mandatory by the protocol.
    if !result.contains_key("user") {
        return Err(Error::ClientBadStartup);
    }

    Ok(result)
}

impl<S, T, E> Client<S, T, E>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
    T: tokio::io::AsyncWrite + std::marker::Unpin,
    E: Executor,
{
    /// Handle Postgres client startup: optional password exchange, then the
    /// parameter echo, key data and the first ReadyForQuery.
    pub async fn startup(
        mut read: S,
        mut write: T,
        bytes: BytesMut, // The rest of the startup message.
        config: Arc<Config>,
        executor: E,
        connection_id: i64,
    ) -> Result<Client<S, T, E>, Error> {
        let parameters = parse_startup(bytes)?;
        let user = parameters.get("user").cloned().unwrap_or_default();
        let database = parameters.get("database").cloned().unwrap_or_else(|| user.clone());
        debug!("Client {connection_id} startup: user={user} database={database}");

        if config.require_auth {
            // Challenge the client for a password; accept whatever comes
            // back. The flag exists for drivers that insist on an auth
            // round-trip, not for access control.
            write
                .write_all(&cleartext_password_challenge())
                .await
                .map_err(|err| Error::SocketError(format!("failed to write challenge: {err}")))?;
            write
                .flush()
                .await
                .map_err(|err| Error::SocketError(format!("failed to flush socket: {err}")))?;
            read_password(&mut read).await?;
        }

        // Generate random backend ID and secret key.
        let process_id: i32 = rand::random();
        let secret_key: i32 = rand::random();

        let mut buf = BytesMut::new();
        buf.put(authentication_ok());
        buf.put(server_parameter_message(
            "server_version",
            REPORTED_SERVER_VERSION,
        ));
        buf.put(server_parameter_message("client_encoding", "UTF8"));
        buf.put(server_parameter_message("DateStyle", "ISO"));
        buf.put(server_parameter_message("TimeZone", "UTC"));
        buf.put(server_parameter_message("integer_datetimes", "on"));
        buf.put(server_parameter_message(
            "standard_conforming_strings",
            "on",
        ));
        buf.put(backend_key_data(process_id, secret_key));
        buf.put(ready_for_query(TRANSACTION_IDLE));
        write
            .write_all(&buf)
            .await
            .map_err(|err| Error::SocketError(format!("failed to write startup reply: {err}")))?;
        write
            .flush()
            .await
            .map_err(|err| Error::SocketError(format!("failed to flush socket: {err}")))?;

        Ok(Client {
            read: BufReader::new(read),
            write,
            buffer: BytesMut::new(),
            connection_id,
            process_id,
            secret_key,
            config,
            executor,
            statements: HashMap::new(),
            portals: HashMap::new(),
            transaction: TransactionStatus::Idle,
            in_extended_batch: false,
            batch_failed: false,
        })
    }
}

/// Read a Password message from the client. The content is not validated.
async fn read_password<S>(stream: &mut S) -> Result<Vec<u8>, Error>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
{
    let mut code = [0u8; 1];
    stream
        .read_exact(&mut code)
        .await
        .map_err(|err| Error::SocketError(format!("failed to read password message: {err}")))?;

    if code[0] != MESSAGE_PASSWORD {
        return Err(Error::Protocol(format!(
            "expected password message (p), received {:?} instead",
            code[0] as char
        )));
    }

    let len = stream
        .read_i32()
        .await
        .map_err(|err| Error::SocketError(format!("failed to read password length: {err}")))?;
    if !(4..=8 * 1024).contains(&len) {
        return Err(Error::Protocol("bad password message length".into()));
    }

    let mut password = vec![0u8; (len - 4) as usize];
    stream
        .read_exact(&mut password)
        .await
        .map_err(|err| Error::SocketError(format!("failed to read password content: {err}")))?;

    Ok(password)
}
