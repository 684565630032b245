//! # Command-line arguments

use crate::constants::{DEFAULT_METRICS_ADDR, DEFAULT_PORT, DEFAULT_VIRTUAL_NODES};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "redshard")]
#[command(author, version, about = "A transparent sharding proxy for a RESP key-value cache", long_about = None)]
pub struct Args {
    /// The port the proxy listens on for client connections.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Comma-separated backend host:port list.
    #[arg(long, value_delimiter = ',', required = true)]
    pub hosts: Vec<String>,

    /// Logging verbosity, fed straight to `env_logger`.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Bind address for the `/metrics` Prometheus exposition endpoint.
    #[arg(long, default_value = DEFAULT_METRICS_ADDR)]
    pub metrics_addr: String,

    /// Per-backend virtual node count on the consistent hash ring.
    #[arg(long, default_value_t = DEFAULT_VIRTUAL_NODES)]
    pub virtual_nodes: usize,
}
