//! TOML configuration file for the bridge.
//!
//! Every field is optional; a missing file, section, or key falls back to
//! the defaults in [`crate::domain::config`].  Example:
//!
//! ```toml
//! [tunnel]
//! url = "wss://xray.example.com/devices/42"
//! handshake_timeout_ms = 10000
//! close_grace_ms = 1000
//!
//! [tunnel.headers]
//! Authorization = "Bearer 0123abcd"
//!
//! [handle]
//! default_timeout_ms = 10000   # 0 waits without bound
//! poll_interval_ms = 500
//! buffer_capacity = 524288
//!
//! [proxy]
//! bind_address = "127.0.0.1"
//! local_port = 5555
//! relay_queue_depth = 64
//!
//! [logging]
//! trace = false
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the key is absent, so a file only needs the settings
//! it changes.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{HandleConfig, ProxyConfig, TunnelConfig, DEFAULT_BUFFER_CAPACITY};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `proxy.bind_address` is not an IP address.
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),
}

/// Top-level structure of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub tunnel: TunnelSection,
    #[serde(default)]
    pub handle: HandleSection,
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TunnelSection {
    /// Tunnel endpoint; usually given on the command line instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    /// Extra headers sent with the WebSocket upgrade request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HandleSection {
    /// `0` means reads and writes without an explicit timeout wait forever.
    #[serde(default = "default_io_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxySection {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    #[serde(default = "default_relay_queue_depth")]
    pub relay_queue_depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingSection {
    /// Same effect as `XRAY_TRACE=1`.
    #[serde(default)]
    pub trace: bool,
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}
fn default_close_grace_ms() -> u64 {
    1_000
}
fn default_io_timeout_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_local_port() -> u16 {
    5555
}
fn default_relay_queue_depth() -> usize {
    64
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            url: None,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            close_grace_ms: default_close_grace_ms(),
            headers: BTreeMap::new(),
        }
    }
}

impl Default for HandleSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_io_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            local_port: default_local_port(),
            relay_queue_depth: default_relay_queue_depth(),
        }
    }
}

// ── Conversion into domain configs ────────────────────────────────────────────

impl FileConfig {
    pub fn tunnel_config(&self) -> TunnelConfig {
        TunnelConfig {
            headers: self
                .tunnel
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            handshake_timeout: Duration::from_millis(self.tunnel.handshake_timeout_ms),
            close_grace: Duration::from_millis(self.tunnel.close_grace_ms),
        }
    }

    pub fn handle_config(&self) -> HandleConfig {
        let default_timeout = match self.handle.default_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        HandleConfig {
            tunnel: self.tunnel_config(),
            default_timeout,
            poll_interval: Duration::from_millis(self.handle.poll_interval_ms),
            buffer_capacity: self.handle.buffer_capacity,
        }
    }

    /// Builds a proxy config.  The tunnel URL is left empty when the file
    /// does not name one.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBindAddress`] if `proxy.bind_address` is not an
    /// IP address.
    pub fn proxy_config(&self) -> Result<ProxyConfig, ConfigError> {
        let ip: IpAddr = self
            .proxy
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.proxy.bind_address.clone()))?;
        Ok(ProxyConfig {
            tunnel_url: self.tunnel.url.clone().unwrap_or_default(),
            bind_addr: SocketAddr::new(ip, self.proxy.local_port),
            relay_queue_depth: self.proxy.relay_queue_depth,
            tunnel: self.tunnel_config(),
        })
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

/// Parses configuration from TOML text.
///
/// # Errors
///
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn parse_config(content: &str) -> Result<FileConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads configuration from `path`, returning defaults if it does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
