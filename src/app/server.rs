use std::collections::HashMap;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use socket2::SockRef;
use tokio::net::TcpSocket;
use tokio::signal::unix::{signal as unix_signal, SignalKind};

use crate::client::client_entrypoint;
use crate::config::Config;
use crate::errors::Error;
use crate::executor::Executor;
use crate::format_duration;

/// Global counter for clients currently connected to the gateway.
pub static CURRENT_CLIENT_COUNT: AtomicI64 = AtomicI64::new(0);

/// Monotonic connection id source.
static NEXT_CONNECTION_ID: AtomicI64 = AtomicI64::new(1);

/// Live sessions, shared between the listener and the shutdown path.
pub type SessionRegistry = Arc<Mutex<HashMap<i64, SocketAddr>>>;

/// Accept loop: one spawned task per connection, each with its own
/// downstream handle. Returns after a graceful shutdown has drained every
/// live session.
pub async fn run_server<F, Fut, E>(config: Arc<Config>, connect: F) -> Result<(), Error>
where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<E, Error>> + Send + 'static,
    E: Executor + 'static,
{
    let addr = format!("{}:{}", config.host, config.port)
        .to_socket_addrs()
        .map_err(|err| Error::BadConfig(format!("bad listen address: {err}")))?
        .next()
        .ok_or_else(|| Error::BadConfig("bad listen address".into()))?;

    let listen_socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|err| Error::BadConfig(format!("cannot create listen socket: {err}")))?;

    listen_socket
        .set_reuseaddr(true)
        .map_err(|err| Error::BadConfig(format!("can't set reuseaddr: {err}")))?;
    listen_socket
        .set_nodelay(true)
        .map_err(|err| Error::BadConfig(format!("can't set nodelay: {err}")))?;
    {
        let sock_ref = SockRef::from(&listen_socket);
        if let Err(err) = sock_ref.set_linger(Some(Duration::from_secs(0))) {
            warn!("Could not configure tcp_so_linger for socket: {err:?}");
        }
    }
    listen_socket
        .bind(addr)
        .map_err(|err| Error::BadConfig(format!("can't bind to {addr}: {err}")))?;
    let listener = listen_socket
        .listen(1024)
        .map_err(|err| Error::BadConfig(format!("listener socket error: {err}")))?;

    info!("Running on {addr}");
    info!("Serving {}", config.backend.resource_path());

    let sessions: SessionRegistry = Arc::new(Mutex::new(HashMap::new()));

    let mut term_signal = unix_signal(SignalKind::terminate())
        .map_err(|err| Error::BadConfig(format!("can't install signal handler: {err}")))?;
    let mut interrupt_signal = unix_signal(SignalKind::interrupt())
        .map_err(|err| Error::BadConfig(format!("can't install signal handler: {err}")))?;

    info!("Waiting for dear clients");
    loop {
        tokio::select! {
            _ = interrupt_signal.recv() => {
                info!("Got SIGINT, starting graceful shutdown");
                break;
            },

            _ = term_signal.recv() => {
                info!("Got SIGTERM, starting graceful shutdown");
                break;
            },

            new_client = listener.accept() => {
                let (socket, addr) = match new_client {
                    Ok((socket, addr)) => (socket, addr),
                    Err(err) => {
                        error!("accept error: {err:?}");
                        continue;
                    }
                };

                if let Err(err) = socket.set_nodelay(true) {
                    warn!("Can't set nodelay for client {addr:?}: {err:?}");
                }

                let config = config.clone();
                let connect = connect.clone();
                let sessions = sessions.clone();
                let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst);

                tokio::task::spawn(async move {
                    CURRENT_CLIENT_COUNT.fetch_add(1, Ordering::SeqCst);
                    sessions.lock().insert(connection_id, addr);
                    let start = chrono::offset::Utc::now().naive_utc();

                    let result = match connect().await {
                        Ok(executor) => {
                            client_entrypoint(socket, config, executor, connection_id).await
                        }
                        Err(err) => Err(err),
                    };

                    let duration = chrono::offset::Utc::now().naive_utc() - start;
                    match result {
                        Ok(()) => {
                            info!(
                                "Client {:?} disconnected, session duration: {}",
                                addr,
                                format_duration(&duration)
                            );
                        }
                        Err(err) => {
                            warn!(
                                "Client {:?} disconnected with error {:?}, duration: {}",
                                addr,
                                err,
                                format_duration(&duration)
                            );
                        }
                    }

                    sessions.lock().remove(&connection_id);
                    CURRENT_CLIENT_COUNT.fetch_add(-1, Ordering::SeqCst);
                });
            }
        }
    }

    // Stop accepting; live sessions run to their natural end. The benign
    // error the in-flight accept call may report is not worth more than an
    // info line.
    drop(listener);
    info!("Listener socket closed");

    let mut interval = tokio::time::interval(Duration::from_millis(500));
    loop {
        interval.tick().await;
        let remaining = CURRENT_CLIENT_COUNT.load(Ordering::SeqCst);
        if remaining == 0 {
            break;
        }
        debug!(
            "Waiting for {} client{} to disconnect",
            remaining,
            if remaining == 1 { "" } else { "s" }
        );
    }

    info!("Shutting down...");
    Ok(())
}
