//! Full-session protocol tests: a scripted executor behind a real session
//! loop, driven over in-memory byte streams.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::encoder::TextFormat;
use crate::errors::Error;
use crate::executor::mock::{MockExecutor, MockResponse};
use crate::executor::{BackendOptions, Column, Value};
use crate::messages::types::DataType;
use crate::messages::FrontendMessage;
use crate::rewrite::{QueryRewriter, RewriteRuleConfig};

use super::core::Client;
use super::startup::{get_startup, ClientConnectionType};

fn make_config(
    text_format: TextFormat,
    force_binary: bool,
    require_auth: bool,
    rules: &[RewriteRuleConfig],
) -> Arc<Config> {
    Arc::new(Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        backend: BackendOptions {
            project: "test-project".to_string(),
            instance: "test-instance".to_string(),
            database: "test-database".to_string(),
            credentials: PathBuf::from("/dev/null"),
        },
        text_format,
        force_binary,
        require_auth,
        psql_mode: false,
        rewriter: QueryRewriter::new(false, rules).unwrap(),
    })
}

fn default_config() -> Arc<Config> {
    make_config(TextFormat::PostgreSql, false, false, &[])
}

/// Run a session over an in-memory stream; returns the client end and the
/// session task handle.
fn start_session(
    config: Arc<Config>,
    executor: MockExecutor,
) -> (DuplexStream, JoinHandle<Result<(), Error>>) {
    let (client_side, mut server_side) = duplex(1 << 20);

    let handle = tokio::spawn(async move {
        let bytes = loop {
            match get_startup(&mut server_side).await? {
                (ClientConnectionType::Startup, bytes) => break bytes,
                (ClientConnectionType::SslRequest, _)
                | (ClientConnectionType::GssEncRequest, _) => {
                    server_side
                        .write_all(b"N")
                        .await
                        .map_err(|err| Error::SocketError(err.to_string()))?;
                }
                (ClientConnectionType::CancelQuery, _) => return Ok(()),
            }
        };
        let (read, write) = tokio::io::split(server_side);
        let mut client = Client::startup(read, write, bytes, config, executor, 1).await?;
        client.handle().await
    });

    (client_side, handle)
}

fn startup_packet() -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_i32(crate::messages::PROTOCOL_VERSION_NUMBER);
    body.put(&b"user\0foo\0database\0bar\0\0"[..]);

    let mut packet = BytesMut::new();
    packet.put_i32(body.len() as i32 + 4);
    packet.put(body);
    packet.to_vec()
}

async fn send(stream: &mut DuplexStream, message: FrontendMessage) {
    let frame = message.encode().unwrap();
    stream.write_all(&frame).await.unwrap();
}

async fn read_message(stream: &mut DuplexStream) -> (u8, Vec<u8>) {
    let mut code = [0u8; 1];
    stream.read_exact(&mut code).await.unwrap();
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let len = i32::from_be_bytes(len);
    let mut payload = vec![0u8; (len - 4) as usize];
    stream.read_exact(&mut payload).await.unwrap();
    (code[0], payload)
}

/// Read messages up to and including the next ReadyForQuery.
async fn read_until_ready(stream: &mut DuplexStream) -> Vec<(u8, Vec<u8>)> {
    let mut messages = Vec::new();
    loop {
        let message = read_message(stream).await;
        let done = message.0 == b'Z';
        messages.push(message);
        if done {
            break;
        }
    }
    messages
}

fn tags(messages: &[(u8, Vec<u8>)]) -> Vec<u8> {
    messages.iter().map(|(code, _)| *code).collect()
}

/// Send the startup packet and consume the handshake response.
async fn complete_startup(stream: &mut DuplexStream) -> Vec<(u8, Vec<u8>)> {
    stream.write_all(&startup_packet()).await.unwrap();
    let messages = read_until_ready(stream).await;

    // AuthenticationOk first, ReadyForQuery(idle) last.
    assert_eq!(messages.first().unwrap().0, b'R');
    assert_eq!(&messages.first().unwrap().1[..], &[0, 0, 0, 0]);
    assert_eq!(messages.last().unwrap().0, b'Z');
    assert_eq!(&messages.last().unwrap().1[..], b"I");
    messages
}

fn query(sql: &str) -> FrontendMessage {
    FrontendMessage::Query {
        sql: sql.to_string(),
    }
}

fn parse(name: &str, sql: &str) -> FrontendMessage {
    FrontendMessage::Parse {
        name: name.to_string(),
        sql: sql.to_string(),
        param_types: vec![],
    }
}

fn bind(portal: &str, statement: &str, values: Vec<Option<&[u8]>>) -> FrontendMessage {
    FrontendMessage::Bind {
        portal: portal.to_string(),
        statement: statement.to_string(),
        param_formats: vec![0],
        param_values: values
            .into_iter()
            .map(|value| value.map(BytesMut::from))
            .collect(),
        result_formats: vec![0],
    }
}

fn execute(portal: &str, max_rows: i32) -> FrontendMessage {
    FrontendMessage::Execute {
        portal: portal.to_string(),
        max_rows,
    }
}

fn one_int_row(name: &str, value: i64) -> MockResponse {
    MockResponse::Rows {
        columns: vec![Column::new(name, DataType::Int8)],
        rows: vec![vec![Value::Int(value)]],
    }
}

#[tokio::test]
async fn test_startup_reports_parameters_and_key_data() {
    let (mut stream, handle) = start_session(default_config(), MockExecutor::new());
    let messages = complete_startup(&mut stream).await;

    let parameters: Vec<String> = messages
        .iter()
        .filter(|(code, _)| *code == b'S')
        .map(|(_, payload)| {
            String::from_utf8_lossy(&payload[..payload.iter().position(|b| *b == 0).unwrap()])
                .to_string()
        })
        .collect();
    assert!(parameters.contains(&"server_version".to_string()));
    assert!(parameters.contains(&"client_encoding".to_string()));
    assert!(parameters.contains(&"DateStyle".to_string()));
    assert!(tags(&messages).contains(&b'K'));

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_ssl_request_is_refused_with_n() {
    let (mut stream, handle) = start_session(default_config(), MockExecutor::new());

    let mut ssl_request = BytesMut::new();
    ssl_request.put_i32(8);
    ssl_request.put_i32(crate::messages::SSL_REQUEST_CODE);
    stream.write_all(&ssl_request).await.unwrap();

    let mut answer = [0u8; 1];
    stream.read_exact(&mut answer).await.unwrap();
    assert_eq!(answer[0], b'N');

    // The client proceeds with a plain startup on the same connection.
    complete_startup(&mut stream).await;
    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_request_closes_silently() {
    let (mut stream, handle) = start_session(default_config(), MockExecutor::new());

    let mut cancel = BytesMut::new();
    cancel.put_i32(16);
    cancel.put_i32(crate::messages::CANCEL_REQUEST_CODE);
    cancel.put_i32(1234);
    cancel.put_i32(5678);
    stream.write_all(&cancel).await.unwrap();

    assert!(handle.await.unwrap().is_ok());
    // No response at all.
    let mut buf = [0u8; 1];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_auth_flag_demands_password_but_ignores_it() {
    let config = make_config(TextFormat::PostgreSql, false, true, &[]);
    let (mut stream, handle) = start_session(config, MockExecutor::new());

    stream.write_all(&startup_packet()).await.unwrap();
    let (code, payload) = read_message(&mut stream).await;
    assert_eq!(code, b'R');
    assert_eq!(&payload[..], &[0, 0, 0, 3]);

    send(
        &mut stream,
        FrontendMessage::Password {
            password: b"anything-goes".to_vec(),
        },
    )
    .await;

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(messages.first().unwrap().0, b'R');
    assert_eq!(&messages.first().unwrap().1[..], &[0, 0, 0, 0]);

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

// Scenario S1: SET is acknowledged without reaching the executor.
#[tokio::test]
async fn test_set_is_short_circuited() {
    let executor = MockExecutor::new();
    let log = executor.log();
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, query("SET TIME ZONE 'UTC'")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'C', b'Z']);
    assert_eq!(&messages[0].1[..], b"SET\0");
    assert_eq!(&messages[1].1[..], b"I");
    assert!(log.lock().unwrap().is_empty());

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

// The prefix match is case-sensitive: lowercase set goes downstream.
#[tokio::test]
async fn test_lowercase_set_reaches_the_executor() {
    let executor =
        MockExecutor::new().on("set application_name = 'x'", MockResponse::Update(0));
    let log = executor.log();
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, query("set application_name = 'x'")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'C', b'Z']);
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["set application_name = 'x'".to_string()]
    );

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

// Scenario S2: simple select.
#[tokio::test]
async fn test_simple_select() {
    let executor = MockExecutor::new().on(
        "SELECT 1",
        MockResponse::Rows {
            columns: vec![Column::new("?column?", DataType::Int4)],
            rows: vec![vec![Value::Int(1)]],
        },
    );
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, query("SELECT 1")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'T', b'D', b'C', b'Z']);

    // RowDescription names the column and the int4 oid.
    let row_description = &messages[0].1;
    assert!(row_description
        .windows(9)
        .any(|window| window == b"?column?\0"));
    assert_eq!(&messages[1].1[..], &[0, 1, 0, 0, 0, 1, b'1']);
    assert_eq!(&messages[2].1[..], b"SELECT 1\0");
    assert_eq!(&messages[3].1[..], b"I");

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

// Scenario S3: empty query.
#[tokio::test]
async fn test_empty_query() {
    let (mut stream, handle) = start_session(default_config(), MockExecutor::new());
    complete_startup(&mut stream).await;

    send(&mut stream, query("")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'I', b'Z']);

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_simple_update_reports_downstream_count() {
    let executor =
        MockExecutor::new().on("UPDATE albums SET title = 'x'", MockResponse::Update(7));
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, query("UPDATE albums SET title = 'x'")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'C', b'Z']);
    assert_eq!(&messages[0].1[..], b"UPDATE 7\0");

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_simple_error_keeps_session_ready() {
    let executor = MockExecutor::new().on(
        "SELECT broken",
        MockResponse::Error("no such column: broken".to_string()),
    );
    let executor = executor.on("SELECT 2", one_int_row("two", 2));
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, query("SELECT broken")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'E', b'Z']);
    let error_payload = String::from_utf8_lossy(&messages[0].1).to_string();
    assert!(error_payload.contains("no such column: broken"));
    assert!(error_payload.contains("42601"));

    // The session stays usable.
    send(&mut stream, query("SELECT 2")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'T', b'D', b'C', b'Z']);

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

// Property 3: unmatched SQL reaches the executor byte-for-byte.
#[tokio::test]
async fn test_unmatched_sql_passes_through_unchanged() {
    let sql = "SELECT  a ,\tb FROM \"Weird\"  -- comment";
    let executor = MockExecutor::new().on(sql, MockResponse::Update(0));
    let log = executor.log();
    let (mut stream, handle) = start_session(
        make_config(
            TextFormat::PostgreSql,
            false,
            false,
            &[RewriteRuleConfig {
                input_pattern: "^NEVER MATCHES$".to_string(),
                output_pattern: "whatever".to_string(),
            }],
        ),
        executor,
    );
    complete_startup(&mut stream).await;

    send(&mut stream, query(sql)).await;
    read_until_ready(&mut stream).await;
    assert_eq!(log.lock().unwrap().as_slice(), &[sql.to_string()]);

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rewrite_rule_applies_before_execution() {
    let executor = MockExecutor::new().on("SELECT 1", one_int_row("one", 1));
    let log = executor.log();
    let (mut stream, handle) = start_session(
        make_config(
            TextFormat::PostgreSql,
            false,
            false,
            &[RewriteRuleConfig {
                input_pattern: "^PING$".to_string(),
                output_pattern: "SELECT 1".to_string(),
            }],
        ),
        executor,
    );
    complete_startup(&mut stream).await;

    send(&mut stream, query("PING")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'T', b'D', b'C', b'Z']);
    assert_eq!(log.lock().unwrap().as_slice(), &["SELECT 1".to_string()]);

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

// Scenario S4: extended happy path.
#[tokio::test]
async fn test_extended_happy_path() {
    let executor = MockExecutor::new().on(
        "SELECT '42'",
        MockResponse::Rows {
            columns: vec![Column::new("?column?", DataType::Text)],
            rows: vec![vec![Value::Text("42".to_string())]],
        },
    );
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, parse("s1", "SELECT $1")).await;
    send(&mut stream, bind("p1", "s1", vec![Some(b"42")])).await;
    send(
        &mut stream,
        FrontendMessage::Describe {
            target: 'P',
            name: "p1".to_string(),
        },
    )
    .await;
    send(&mut stream, execute("p1", 0)).await;
    send(&mut stream, FrontendMessage::Sync).await;

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'1', b'2', b'T', b'D', b'C', b'Z']);
    assert_eq!(&messages[3].1[..], &[0, 1, 0, 0, 0, 2, b'4', b'2']);
    assert_eq!(&messages[4].1[..], b"SELECT 1\0");
    assert_eq!(&messages[5].1[..], b"I");

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

// Scenario S5 / property 6: one ErrorResponse, everything else dropped
// until Sync.
#[tokio::test]
async fn test_extended_error_skips_to_sync() {
    let executor = MockExecutor::new().on(
        "SELECT bogus(",
        MockResponse::Error("syntax error at end of input".to_string()),
    );
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, parse("s2", "SELECT bogus(")).await;
    send(&mut stream, bind("p2", "s2", vec![])).await;
    send(&mut stream, execute("p2", 0)).await;
    send(&mut stream, execute("p2", 0)).await;
    send(&mut stream, FrontendMessage::Sync).await;

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'1', b'2', b'E', b'Z']);
    assert_eq!(&messages.last().unwrap().1[..], b"E");

    // The batch error is gone after Sync.
    send(&mut stream, query("")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'I', b'Z']);

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

// Scenario S6 / property 2: suspension resumes with no row duplicated or
// skipped, and the final tag counts every emitted row.
#[tokio::test]
async fn test_portal_suspension_and_resume() {
    let executor = MockExecutor::new().on(
        "SELECT name FROM singers",
        MockResponse::Rows {
            columns: vec![Column::new("name", DataType::Text)],
            rows: vec![
                vec![Value::Text("alice".to_string())],
                vec![Value::Text("bob".to_string())],
                vec![Value::Text("carol".to_string())],
            ],
        },
    );
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, parse("s", "SELECT name FROM singers")).await;
    send(&mut stream, bind("p", "s", vec![])).await;
    send(&mut stream, execute("p", 2)).await;
    send(&mut stream, FrontendMessage::Flush).await;

    let (code, _) = read_message(&mut stream).await; // ParseComplete
    assert_eq!(code, b'1');
    let (code, _) = read_message(&mut stream).await; // BindComplete
    assert_eq!(code, b'2');
    let (code, first) = read_message(&mut stream).await;
    assert_eq!(code, b'D');
    assert!(first.ends_with(b"alice"));
    let (code, second) = read_message(&mut stream).await;
    assert_eq!(code, b'D');
    assert!(second.ends_with(b"bob"));
    let (code, _) = read_message(&mut stream).await; // PortalSuspended
    assert_eq!(code, b's');

    send(&mut stream, execute("p", 0)).await;
    send(&mut stream, FrontendMessage::Sync).await;

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'D', b'C', b'Z']);
    assert!(messages[0].1.ends_with(b"carol"));
    assert_eq!(&messages[1].1[..], b"SELECT 3\0");

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

// Property 4: Close is idempotent and never errors on unknown names.
#[tokio::test]
async fn test_close_unknown_name_is_not_an_error() {
    let (mut stream, handle) = start_session(default_config(), MockExecutor::new());
    complete_startup(&mut stream).await;

    for _ in 0..2 {
        send(
            &mut stream,
            FrontendMessage::Close {
                target: 'S',
                name: "never-existed".to_string(),
            },
        )
        .await;
    }
    send(&mut stream, FrontendMessage::Sync).await;

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'3', b'3', b'Z']);
    assert_eq!(&messages.last().unwrap().1[..], b"I");

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_named_statement_cannot_be_overwritten_without_close() {
    let executor = MockExecutor::new();
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, parse("dup", "SELECT 1")).await;
    send(&mut stream, parse("dup", "SELECT 2")).await;
    send(&mut stream, FrontendMessage::Sync).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'1', b'E', b'Z']);

    // After Close the name is free again.
    send(
        &mut stream,
        FrontendMessage::Close {
            target: 'S',
            name: "dup".to_string(),
        },
    )
    .await;
    send(&mut stream, parse("dup", "SELECT 2")).await;
    send(&mut stream, FrontendMessage::Sync).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'3', b'1', b'Z']);

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unnamed_statement_is_overwritten_freely() {
    let executor = MockExecutor::new().on("SELECT 2", one_int_row("two", 2));
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, parse("", "SELECT 1")).await;
    send(&mut stream, parse("", "SELECT 2")).await;
    send(&mut stream, bind("", "", vec![])).await;
    send(&mut stream, execute("", 0)).await;
    send(&mut stream, FrontendMessage::Sync).await;

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'1', b'1', b'2', b'D', b'C', b'Z']);

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bind_parameter_count_mismatch() {
    let (mut stream, handle) = start_session(default_config(), MockExecutor::new());
    complete_startup(&mut stream).await;

    send(&mut stream, parse("s", "SELECT $1, $2")).await;
    send(&mut stream, bind("p", "s", vec![Some(b"1")])).await;
    send(&mut stream, FrontendMessage::Sync).await;

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'1', b'E', b'Z']);
    assert_eq!(&messages.last().unwrap().1[..], b"E");

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_describe_statement_without_result_set() {
    let (mut stream, handle) = start_session(default_config(), MockExecutor::new());
    complete_startup(&mut stream).await;

    send(
        &mut stream,
        FrontendMessage::Parse {
            name: "ins".to_string(),
            sql: "INSERT INTO t (a) VALUES ($1)".to_string(),
            param_types: vec![20],
        },
    )
    .await;
    send(
        &mut stream,
        FrontendMessage::Describe {
            target: 'S',
            name: "ins".to_string(),
        },
    )
    .await;
    send(&mut stream, FrontendMessage::Sync).await;

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'1', b't', b'n', b'Z']);
    // ParameterDescription carries the declared int8 oid.
    assert_eq!(&messages[1].1[..], &[0, 1, 0, 0, 0, 20]);

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_describe_unbound_select_is_refused() {
    let (mut stream, handle) = start_session(default_config(), MockExecutor::new());
    complete_startup(&mut stream).await;

    send(&mut stream, parse("sel", "SELECT * FROM t")).await;
    send(
        &mut stream,
        FrontendMessage::Describe {
            target: 'S',
            name: "sel".to_string(),
        },
    )
    .await;
    send(&mut stream, FrontendMessage::Sync).await;

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'1', b'E', b'Z']);
    let error_payload = String::from_utf8_lossy(&messages[1].1).to_string();
    assert!(error_payload.contains("cannot describe"));

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_force_binary_applies_to_empty_result_format_vector() {
    let executor = MockExecutor::new().on("SELECT 513", one_int_row("n", 513));
    let config = make_config(TextFormat::PostgreSql, true, false, &[]);
    let (mut stream, handle) = start_session(config, executor);
    complete_startup(&mut stream).await;

    send(&mut stream, parse("s", "SELECT 513")).await;
    send(
        &mut stream,
        FrontendMessage::Bind {
            portal: "p".to_string(),
            statement: "s".to_string(),
            param_formats: vec![],
            param_values: vec![],
            result_formats: vec![],
        },
    )
    .await;
    send(&mut stream, execute("p", 0)).await;
    send(&mut stream, FrontendMessage::Sync).await;

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'1', b'2', b'D', b'C', b'Z']);
    // int8 binary: 8 bytes big-endian.
    assert_eq!(
        &messages[2].1[..],
        &[0, 1, 0, 0, 0, 8, 0, 0, 0, 0, 0, 0, 2, 1]
    );

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_native_text_format_renders_backend_style() {
    let executor = MockExecutor::new().on(
        "SELECT active FROM users",
        MockResponse::Rows {
            columns: vec![Column::new("active", DataType::Bool)],
            rows: vec![vec![Value::Bool(true)]],
        },
    );
    let config = make_config(TextFormat::Native, false, false, &[]);
    let (mut stream, handle) = start_session(config, executor);
    complete_startup(&mut stream).await;

    send(&mut stream, query("SELECT active FROM users")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'T', b'D', b'C', b'Z']);
    assert!(messages[1].1.ends_with(b"true"));

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_transaction_status_follows_command_tags() {
    let executor = MockExecutor::new()
        .on("BEGIN", MockResponse::Update(0))
        .on("COMMIT", MockResponse::Update(0));
    let (mut stream, handle) = start_session(default_config(), executor);
    complete_startup(&mut stream).await;

    send(&mut stream, query("BEGIN")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(&messages[0].1[..], b"BEGIN\0");
    assert_eq!(&messages.last().unwrap().1[..], b"T");

    send(&mut stream, query("COMMIT")).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(&messages.last().unwrap().1[..], b"I");

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_function_call_is_rejected_as_unsupported() {
    let (mut stream, handle) = start_session(default_config(), MockExecutor::new());
    complete_startup(&mut stream).await;

    send(&mut stream, FrontendMessage::FunctionCall).await;
    let messages = read_until_ready(&mut stream).await;
    assert_eq!(tags(&messages), vec![b'E', b'Z']);
    let error_payload = String::from_utf8_lossy(&messages[0].1).to_string();
    assert!(error_payload.contains("0A000"));

    send(&mut stream, FrontendMessage::Terminate).await;
    handle.await.unwrap().unwrap();
}
