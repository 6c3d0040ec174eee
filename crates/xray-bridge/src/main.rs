//! X-Ray proxy launcher: entry point.
//!
//! Connects to a remote device through an X-Ray WebSocket tunnel and exposes
//! it as a local TCP port, so any debugger that speaks the device protocol
//! over TCP can use it unchanged.
//!
//! # Usage
//!
//! ```text
//! xray-proxy --url <URL> [OPTIONS]
//!
//! Options:
//!   --url               <URL>     Tunnel endpoint (ws:// or wss://)
//!   --local-port        <PORT>    Local TCP port [default: 5555]
//!   --bind              <IP>      Local bind address [default: 127.0.0.1]
//!   --config            <FILE>    Optional TOML configuration file
//!   --handshake-timeout <MS>      Wait for device:ok [default: 10000]
//!   --header            <K=V>     Extra upgrade request header (repeatable)
//!   --trace                       Debug logging (same as XRAY_TRACE=1)
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable           | Description                        |
//! |--------------------|------------------------------------|
//! | `XRAY_TUNNEL_URL`  | Tunnel endpoint                    |
//! | `XRAY_LOCAL_PORT`  | Local TCP port                     |
//! | `XRAY_BIND`        | Local bind address                 |
//! | `XRAY_CONFIG`      | Configuration file path            |
//! | `XRAY_TRACE`       | `1`/`true`/`True` for debug output |
//! | `RUST_LOG`         | Full filter; overrides the above   |
//!
//! CLI values override the configuration file, which overrides built-in
//! defaults.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;

use xray_bridge::domain::ProxyConfig;
use xray_bridge::infrastructure::config_file::{load_config, FileConfig};
use xray_bridge::infrastructure::{logging, run_proxy};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// X-Ray tunnel proxy.
///
/// Opens a WebSocket tunnel to a remote device and relays one local TCP
/// connection at a time through it.
#[derive(Debug, Parser)]
#[command(
    name = "xray-proxy",
    about = "Expose a remote device behind an X-Ray WebSocket tunnel as a local TCP port",
    version
)]
struct Cli {
    /// Tunnel endpoint, e.g. `wss://xray.example.com/devices/42`.
    ///
    /// May also come from `[tunnel] url` in the configuration file.
    #[arg(long, env = "XRAY_TUNNEL_URL")]
    url: Option<String>,

    /// Local TCP port to listen on once the device is ready.
    #[arg(long, env = "XRAY_LOCAL_PORT")]
    local_port: Option<u16>,

    /// Local IP address to bind.  Loopback unless you mean to share the
    /// device with the network.
    #[arg(long, env = "XRAY_BIND")]
    bind: Option<String>,

    /// Optional TOML configuration file.
    #[arg(long, env = "XRAY_CONFIG")]
    config: Option<PathBuf>,

    /// Milliseconds to wait for the remote's `device:ok`.
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// Extra WebSocket upgrade header as `Name=Value`.  Repeatable.
    #[arg(long = "header", value_name = "NAME=VALUE")]
    headers: Vec<String>,

    /// Enable debug logging.
    #[arg(long)]
    trace: bool,
}

impl Cli {
    /// Merges the CLI arguments over `file` into a [`ProxyConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if no tunnel URL is given anywhere, `--bind` is not
    /// an IP address, or a `--header` is not `Name=Value`.
    fn into_proxy_config(self, file: &FileConfig) -> anyhow::Result<ProxyConfig> {
        let mut config = file
            .proxy_config()
            .context("invalid [proxy] section in config file")?;

        if let Some(url) = self.url {
            config.tunnel_url = url;
        }
        if config.tunnel_url.is_empty() {
            bail!("no tunnel URL given (use --url or [tunnel] url in the config file)");
        }

        if let Some(bind) = &self.bind {
            let ip: IpAddr = bind
                .parse()
                .with_context(|| format!("invalid bind address: '{bind}'"))?;
            config.bind_addr = SocketAddr::new(ip, config.bind_addr.port());
        }
        if let Some(port) = self.local_port {
            config.bind_addr.set_port(port);
        }
        if let Some(ms) = self.handshake_timeout {
            config.tunnel.handshake_timeout = Duration::from_millis(ms);
        }

        for header in &self.headers {
            let (name, value) = header
                .split_once('=')
                .with_context(|| format!("invalid header '{header}': expected NAME=VALUE"))?;
            config
                .tunnel
                .headers
                .push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed; the optional config file is loaded.
/// 2. Logging is initialised (`RUST_LOG`, else `--trace`/`XRAY_TRACE`).
/// 3. A Ctrl+C handler is spawned; it clears a shared `running` flag.
/// 4. [`run_proxy`] opens the tunnel, binds the local port once the device is
///    ready, and relays until shutdown or until the remote goes away.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => FileConfig::default(),
    };

    let trace = cli.trace || file.logging.trace || logging::trace_enabled_from_env();
    logging::init(trace);

    let config = cli.into_proxy_config(&file)?;
    info!(
        "X-Ray proxy starting: tunnel={}, local={}",
        config.tunnel_url, config.bind_addr
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_proxy(config, running).await?;

    info!("X-Ray proxy stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
