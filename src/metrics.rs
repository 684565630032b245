//! # Metrics sink
//!
//! A thin wrapper over the `metrics` facade crate, matching the bucket
//! boundaries and naming scheme of the original `PrometheusMetrics` struct
//! (`pkg/proto/metrics.go`) translated from `redproxy_*` to this crate's
//! name. Exposition is a minimal hand-rolled `/metrics` HTTP listener,
//! consistent with hand-rolling small protocol listeners (`server.rs`)
//! rather than reaching for a web framework.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const COMMANDS_PROXIED_TOTAL: &str = "redshard_commands_proxied_total";
pub const CONNECTIONS: &str = "redshard_connections";
pub const LATENCY_SECONDS: &str = "redshard_latency_seconds";

/// Histogram bucket boundaries spanning 1µs..5s, matching the original
/// `redproxy_latency` histogram exactly.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.000_001, 0.000_002, 0.000_005, 0.000_01, 0.000_02, 0.000_05, 0.000_1, 0.000_2, 0.000_5,
    0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0,
];

/// Installs the `metrics` facade's global recorder and returns a handle
/// that can render the current state as Prometheus text.
///
/// Must be called exactly once per process, before any `metrics::counter!`/
/// `gauge!`/`histogram!` call.
pub fn install() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(LATENCY_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )
        .expect("static bucket list is always valid")
        .install_recorder()
        .expect("metrics recorder installs exactly once at startup")
}

pub fn record_connection_opened() {
    metrics::gauge!(CONNECTIONS).increment(1.0);
}

pub fn record_connection_closed() {
    metrics::gauge!(CONNECTIONS).decrement(1.0);
}

pub fn record_command_proxied() {
    metrics::counter!(COMMANDS_PROXIED_TOTAL).increment(1);
}

pub fn record_latency(elapsed: Duration) {
    metrics::histogram!(LATENCY_SECONDS).record(elapsed.as_secs_f64());
}

/// Serves the rendered Prometheus text at `/metrics` until `cancellation`
/// fires. One connection at a time is plenty for a scrape endpoint; this is
/// not a general-purpose HTTP server.
pub async fn serve(
    addr: SocketAddr,
    handle: PrometheusHandle,
    cancellation: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Metrics endpoint listening on {addr}");

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (mut stream, _) = accepted?;
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_one(&mut stream, &handle).await {
                        log::debug!("metrics connection error: {e}");
                    }
                });
            }
        }
    }
}

async fn serve_one(
    stream: &mut tokio::net::TcpStream,
    handle: &PrometheusHandle,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    let _ = stream.read(&mut buf).await?;

    let body = handle.render();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}
