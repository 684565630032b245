//! # redshard — a transparent RESP sharding proxy

use clap::Parser;
use log::info;
use redshard::backend::tcp::TcpBackendSession;
use redshard::cli::Args;
use redshard::dispatch::Dispatcher;
use redshard::errors::ApplicationError;
use redshard::ring::Ring;
use redshard::server::Server;
use redshard::{metrics, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting redshard with backends: {:?}", args.hosts);

    let mut sessions = HashMap::with_capacity(args.hosts.len());
    for host in &args.hosts {
        let session = TcpBackendSession::connect(host)
            .await
            .map_err(|e| ApplicationError::Other(anyhow::anyhow!("failed to connect to backend {host}: {e}")))?;
        sessions.insert(host.clone(), session);
    }

    let ring = Ring::new(args.hosts.clone(), args.virtual_nodes);
    let dispatcher = Arc::new(Dispatcher::new(ring, sessions));

    let metrics_handle = metrics::install();
    let shutdown = CancellationToken::new();

    let metrics_addr = args
        .metrics_addr
        .parse()
        .map_err(|e| ApplicationError::Other(anyhow::anyhow!("invalid --metrics-addr: {e}")))?;
    let metrics_shutdown = shutdown.clone();
    let metrics_task = tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_addr, metrics_handle, metrics_shutdown).await {
            log::error!("metrics endpoint failed: {e}");
        }
    });

    spawn_signal_listener(shutdown.clone());

    let server = Server::bind(args.port, dispatcher).await?;
    server.run(shutdown).await?;

    metrics_task.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Listens for SIGINT (all platforms) and SIGTERM (unix only), publishing a
/// `CancellationToken` instead of calling `process::exit` directly so
/// in-flight connections get to finish.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C");
        }
        shutdown.cancel();
    });
}
