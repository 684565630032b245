//! # Constants
//!
//! Constants used throughout the application

/// Default TCP port the proxy listens on for client connections.
pub const DEFAULT_PORT: u16 = 46379;

/// Default bind address for the Prometheus `/metrics` exposition endpoint.
pub const DEFAULT_METRICS_ADDR: &str = "127.0.0.1:9100";

/// Default per-backend virtual node count on the consistent hash ring.
pub const DEFAULT_VIRTUAL_NODES: usize = 10;

/// Local address used by tests that bind an ephemeral port.
#[cfg(test)]
pub const LOCAL_SOCKET_ADDR_STR_TEST: &str = "127.0.0.1:0";
