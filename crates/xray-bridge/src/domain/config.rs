//! Bridge configuration types.
//!
//! These structs are the single source of truth for runtime settings.  They
//! can be built from a TOML file and CLI flags (see
//! `infrastructure::config_file` and `main.rs`) or from defaults, which are
//! suitable for local development and tests.
//!
//! # Design rationale
//!
//! Keeping configuration as plain structs (no global state, no environment
//! reads inside the domain) makes handles and proxies easy to build in tests
//! with exactly the timeouts a test needs.

use std::net::SocketAddr;
use std::time::Duration;

/// Receive buffer size for embedded handles: 512 KiB.
pub const DEFAULT_BUFFER_CAPACITY: usize = 512 * 1024;

/// Settings shared by every tunnel endpoint, whatever consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Extra HTTP headers sent with the WebSocket upgrade request
    /// (e.g. an `Authorization` header).
    pub headers: Vec<(String, String)>,

    /// How long to wait for the remote's `device:ok` after starting to
    /// connect.  Covers TCP connect, TLS, and the upgrade as well.
    pub handshake_timeout: Duration,

    /// How long a local close waits for the remote to acknowledge the
    /// WebSocket close before the socket is dropped anyway.
    pub close_grace: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            handshake_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(1),
        }
    }
}

/// Settings for the synchronous handle adapter (embedded mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleConfig {
    pub tunnel: TunnelConfig,

    /// Timeout applied when a read or write passes `None`.  `None` here
    /// means wait without bound.
    pub default_timeout: Option<Duration>,

    /// Upper bound on a single wait inside `read`, so a closed tunnel is
    /// noticed even if a wake-up is missed.
    pub poll_interval: Duration,

    /// Capacity of the receive ring buffer in bytes.
    pub buffer_capacity: usize,
}

impl Default for HandleConfig {
    /// | Field             | Default     |
    /// |-------------------|-------------|
    /// | default_timeout   | 10 000 ms   |
    /// | poll_interval     | 500 ms      |
    /// | buffer_capacity   | 512 KiB     |
    fn default() -> Self {
        Self {
            tunnel: TunnelConfig::default(),
            default_timeout: Some(Duration::from_millis(10_000)),
            poll_interval: Duration::from_millis(500),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Settings for the local TCP proxy (proxy mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// WebSocket URL of the remote device endpoint.
    pub tunnel_url: String,

    /// Local address the proxy listens on.  Loopback by default so the
    /// device is not exposed to the LAN by accident.
    pub bind_addr: SocketAddr,

    /// Number of inbound frames that may queue for the local socket before
    /// the tunnel stops reading from the network.
    pub relay_queue_depth: usize,

    pub tunnel: TunnelConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            tunnel_url: String::new(),
            // Compile-time-known valid socket address.
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5555)),
            relay_queue_depth: 64,
            tunnel: TunnelConfig::default(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
