//! # Listener / accept loop
//!
//! Spawn-one-task-per-connection accept loop, generalized from an abrupt
//! `std::process::exit` signal-handling instinct to a
//! `CancellationToken`-driven graceful drain: the accept loop stops, the
//! listener closes, and already-spawned handler tasks are awaited before
//! `run` returns.

use crate::backend::BackendSession;
use crate::conn::handle_connection;
use crate::dispatch::Dispatcher;
use crate::errors::ApplicationError;
use crate::metrics;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Owns the client-facing TCP listener and the shared dispatcher every
/// accepted connection is handed.
pub struct Server<S: BackendSession + 'static> {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<S>>,
}

impl<S: BackendSession + 'static> Server<S> {
    pub async fn bind(port: u16, dispatcher: Arc<Dispatcher<S>>) -> Result<Server<S>, ApplicationError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let addr = listener.local_addr()?;
        crate::log_and_stderr!(info, "Listening on", addr);
        Ok(Server { listener, dispatcher })
    }

    /// Runs the accept loop until `shutdown` is cancelled, then drains every
    /// in-flight handler task before returning.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ApplicationError> {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("Shutdown signal received, closing the listener");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            log::debug!("Accepted connection from {peer_addr}");
                            metrics::record_connection_opened();
                            let dispatcher = Arc::clone(&self.dispatcher);
                            tasks.spawn(async move {
                                if let Err(e) = handle_connection(stream, dispatcher).await {
                                    log::warn!("Connection from {peer_addr} ended with an error: {e}");
                                }
                                metrics::record_connection_closed();
                            });
                        }
                        Err(e) => {
                            log::warn!("Accept error: {e}");
                        }
                    }
                }
            }
        }

        log::info!("Waiting for {} in-flight connection(s) to finish", tasks.len());
        while tasks.join_next().await.is_some() {}

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackendSession;
    use crate::ring::Ring;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn spawn_test_server() -> (std::net::SocketAddr, CancellationToken) {
        let ring = Ring::new(vec!["b0".to_string()], 10);
        let sessions = HashMap::from([(
            "b0".to_string(),
            MockBackendSession::seeded([("foo".to_string(), "bar".to_string())]),
        )]);
        let dispatcher = Arc::new(Dispatcher::new(ring, sessions));

        let listener = TcpListener::bind(crate::constants::LOCAL_SOCKET_ADDR_STR_TEST)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server { listener, dispatcher };
        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            server.run(server_shutdown).await.unwrap();
        });
        (addr, shutdown)
    }

    #[tokio::test]
    async fn ping_over_the_wire() {
        let (addr, shutdown) = spawn_test_server().await;

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        const EXPECTED: &[u8] = b"+PONG\r\n";
        let mut rdbuf = [0u8; EXPECTED.len()];
        conn.read_exact(&mut rdbuf).await.unwrap();
        assert_eq!(EXPECTED, &rdbuf);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn get_set_round_trip_over_the_wire() {
        let (addr, shutdown) = spawn_test_server().await;
        let mut conn = TcpStream::connect(addr).await.unwrap();

        conn.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await.unwrap();
        const EXPECTED_GET: &[u8] = b"$3\r\nbar\r\n";
        let mut rdbuf = [0u8; EXPECTED_GET.len()];
        conn.read_exact(&mut rdbuf).await.unwrap();
        assert_eq!(EXPECTED_GET, &rdbuf);

        conn.write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nnew\r\n$1\r\n1\r\n").await.unwrap();
        const EXPECTED_SET: &[u8] = b"+OK\r\n";
        let mut rdbuf = [0u8; EXPECTED_SET.len()];
        conn.read_exact(&mut rdbuf).await.unwrap();
        assert_eq!(EXPECTED_SET, &rdbuf);

        conn.write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nnosu\r\n").await.unwrap();
        const EXPECTED_MISS: &[u8] = b"$-1\r\n";
        let mut rdbuf = [0u8; EXPECTED_MISS.len()];
        conn.read_exact(&mut rdbuf).await.unwrap();
        assert_eq!(EXPECTED_MISS, &rdbuf);

        shutdown.cancel();
    }
}
