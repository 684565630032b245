//! # Connection Handler
//!
//! One task per accepted client, driving the read → dispatch → write loop
//! of §4.5. Strictly sequential: the next frame is never read until the
//! previous reply has been fully written, so there is no pipelining.
//!
//! Buffer-to-response loop shape (`stream.write_all`/`flush`) generalized
//! from "parse one PING" to the full dispatcher, grounded on the original
//! `pkg/proto/server.go`'s `handleClient` (loop calling `HandleRequest`
//! until EOF, logging and returning on I/O error).

use crate::backend::{BackendSession, CallContext};
use crate::dispatch::Dispatcher;
use crate::errors::ConnectionError;
use crate::metrics;
use crate::resp::{self, DecodeError};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::BufReader;
use tokio::net::TcpStream;

/// Drives one client connection to completion.
///
/// Returns once the connection closes, cleanly or otherwise; the caller
/// (the accept loop in `server.rs`) is responsible for the connections
/// gauge and for logging the outcome.
pub async fn handle_connection<S: BackendSession + 'static>(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher<S>>,
) -> Result<(), ConnectionError> {
    let peer_addr = stream.peer_addr()?;
    log::trace!("accepted connection from {peer_addr}");

    let mut stream = BufReader::new(stream);

    loop {
        let started = Instant::now();
        let cmd = match resp::parse_command(&mut stream).await {
            Ok(cmd) => cmd,
            Err(DecodeError::Eof) => {
                log::debug!("{peer_addr} disconnected");
                return Ok(());
            }
            Err(DecodeError::Protocol(e)) => {
                log::warn!("{peer_addr} sent a malformed frame: {e}");
                let reply = crate::resp::Reply::error(e.to_string());
                // Best-effort: the buffer position is no longer trustworthy
                // after a protocol error, so the connection closes either way.
                let _ = resp::write_reply(&mut stream, &reply).await;
                return Err(ConnectionError::Protocol(e));
            }
            Err(DecodeError::Io(e)) => {
                log::warn!("{peer_addr} I/O error while reading: {e}");
                return Err(ConnectionError::Io(e));
            }
        };

        let ctx = CallContext::background();
        let reply = dispatcher.dispatch(cmd, &ctx).await;

        resp::write_reply(&mut stream, &reply).await.map_err(|e| {
            log::warn!("{peer_addr} I/O error while writing: {e}");
            ConnectionError::Io(e)
        })?;

        metrics::record_command_proxied();
        metrics::record_latency(started.elapsed());
    }
}
