use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use log::{debug, info};
use tokio::io::{split, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::errors::Error;
use crate::executor::Executor;

use super::core::Client;
use super::startup::{get_startup, ClientConnectionType};

/// Client entrypoint: negotiate the startup phase on a fresh connection and
/// run the session to completion.
pub async fn client_entrypoint<E>(
    mut stream: TcpStream,
    config: Arc<Config>,
    executor: E,
    connection_id: i64,
) -> Result<(), Error>
where
    E: Executor,
{
    let addr = stream
        .peer_addr()
        .map_err(|err| Error::SocketError(format!("failed to get peer address: {err:?}")))?;

    // SSLRequest and GSSENCRequest are both refused with a single 'N'; the
    // client is expected to retry with a plain StartupMessage on the same
    // connection.
    let bytes = loop {
        match get_startup(&mut stream).await? {
            (ClientConnectionType::Startup, bytes) => break bytes,

            (ClientConnectionType::SslRequest, _) | (ClientConnectionType::GssEncRequest, _) => {
                let mut no = BytesMut::new();
                no.put_u8(b'N');
                stream
                    .write_all(&no)
                    .await
                    .map_err(|err| Error::SocketError(format!("failed to refuse: {err}")))?;
            }

            (ClientConnectionType::CancelQuery, mut bytes) => {
                // Cancel requests arrive on their own connection carrying a
                // process id and secret key; accepted and dropped.
                if bytes.remaining() >= 8 {
                    let process_id = bytes.get_i32();
                    debug!("Cancel request for backend {process_id} from {addr:?}, ignored");
                }
                return Ok(());
            }
        }
    };

    info!("Client {addr:?} connected");

    let (read, write) = split(stream);
    let mut client = Client::startup(read, write, bytes, config, executor, connection_id).await?;
    client.handle().await
}
