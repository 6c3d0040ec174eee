//! Proxy mode: the remote device exposed as a local TCP port.
//!
//! This module is responsible for:
//!
//! 1. Opening the tunnel and waiting for `device:ok`.
//! 2. Binding the local TCP listener, only once the device is ready.
//! 3. Accepting one local connection at a time and relaying its bytes:
//!    - **Local → Remote**: socket reads become binary frames, in order.
//!    - **Remote → Local**: binary frames are written to the socket.
//! 4. Announcing `client:ok` when a session starts and `client:fail` when it
//!    ends, so the remote knows whether anyone is listening.
//! 5. Stopping when the `running` flag is cleared or the tunnel ends.
//!
//! # One session at a time
//!
//! The device on the other end speaks a single byte stream.  Interleaving
//! two local clients would corrupt it, so a second connection that arrives
//! while one is active is accepted and immediately dropped.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use xray_core::{ConnectionState, TunnelError, TunnelUrl};

use crate::application::RelaySink;
use crate::domain::ProxyConfig;
use crate::infrastructure::tunnel::{open_tunnel, TunnelHandle};

/// Size of a single local socket read; one read becomes one binary frame.
const RELAY_READ_CHUNK: usize = 64 * 1024;

/// How often the accept loop re-checks the `running` flag and tunnel state.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

type RelayTunnel = TunnelHandle<mpsc::Sender<Vec<u8>>>;

/// A proxy whose tunnel is ready and whose listener is bound.
pub struct Proxy {
    config: ProxyConfig,
    url: TunnelUrl,
    listener: TcpListener,
    tunnel: RelayTunnel,
    drained: Arc<Notify>,
    driver: JoinHandle<()>,
}

impl Proxy {
    /// Opens the tunnel, waits for the handshake, then binds the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the tunnel fails to reach
    /// `Ready`, or the local address cannot be bound.
    pub async fn start(config: ProxyConfig) -> anyhow::Result<Self> {
        let url = TunnelUrl::parse(&config.tunnel_url)
            .with_context(|| format!("invalid tunnel URL '{}'", config.tunnel_url))?;

        let drained = Arc::new(Notify::new());
        let (tunnel, handshake, driver) = open_tunnel(
            url.clone(),
            config.tunnel.clone(),
            RelaySink::new(),
            Arc::clone(&drained),
            None,
        );
        let driver = tokio::spawn(driver);

        match handshake.await {
            Ok(Ok(())) => info!("tunnel to {url} ready"),
            Ok(Err(e)) => {
                return Err(e).with_context(|| format!("failed to open tunnel to {url}"));
            }
            Err(_) => return Err(anyhow!("tunnel driver for {url} stopped during handshake")),
        }

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind proxy listener on {}", config.bind_addr))?;

        Ok(Self {
            config,
            url,
            listener,
            tunnel,
            drained,
            driver,
        })
    }

    /// The address the listener is bound to (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns the OS error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Current state of the tunnel.
    pub fn tunnel_state(&self) -> ConnectionState {
        self.tunnel.state()
    }

    /// Accepts local connections until `running` is cleared or the tunnel
    /// ends.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::RemoteClosed`] (wrapped in `anyhow`) when the
    /// tunnel ends while the proxy is still meant to be running.
    pub async fn run(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        info!(
            "proxy for {} listening on {}",
            self.url,
            self.local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| self.config.bind_addr.to_string())
        );

        let session_active = Arc::new(AtomicBool::new(false));

        let result = loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping proxy");
                break Ok(());
            }

            if self.tunnel.is_closed() {
                let state = self.tunnel.state();
                warn!("tunnel to {} ended: {state}", self.url);
                break Err(anyhow::Error::new(TunnelError::RemoteClosed)
                    .context(format!("tunnel to {} ended: {state}", self.url)));
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    if session_active.swap(true, Ordering::SeqCst) {
                        warn!("rejecting {peer_addr}: a relay session is already active");
                        drop(stream);
                        continue;
                    }

                    let tunnel = self.tunnel.clone();
                    let drained = Arc::clone(&self.drained);
                    let active = Arc::clone(&session_active);
                    let depth = self.config.relay_queue_depth;
                    tokio::spawn(async move {
                        relay_session(stream, peer_addr, tunnel, drained, depth).await;
                        active.store(false, Ordering::SeqCst);
                    });
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {
                    // No connection in the last poll interval.
                }
            }
        };

        self.tunnel.close();
        let grace = self.config.tunnel.close_grace + ACCEPT_POLL;
        if timeout(grace, self.driver).await.is_err() {
            debug!("tunnel driver did not finish within {} ms", grace.as_millis());
        }

        result
    }
}

/// Opens the tunnel, binds the local port, and relays until shutdown or
/// remote disconnect.
///
/// # Errors
///
/// See [`Proxy::start`] and [`Proxy::run`].
pub async fn run_proxy(config: ProxyConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    Proxy::start(config).await?.run(running).await
}

// ── Relay session ─────────────────────────────────────────────────────────────

/// Relays bytes between one local socket and the tunnel until either side
/// stops.
async fn relay_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tunnel: RelayTunnel,
    drained: Arc<Notify>,
    queue_depth: usize,
) {
    let session_id = Uuid::new_v4();
    info!("relay session {session_id} started for {peer_addr}");

    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(queue_depth.max(1));
    if let Err(e) = tunnel.attach(frame_tx) {
        warn!("relay session {session_id}: cannot attach: {e}");
        return;
    }

    let (mut reader, mut writer) = stream.into_split();

    // ── Local → Remote ────────────────────────────────────────────────────────
    let uplink = async {
        let mut buf = vec![0u8; RELAY_READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("relay session {session_id}: local peer closed");
                    break;
                }
                Ok(n) => {
                    // One frame in flight per session.
                    if let Err(e) = tunnel.send_and_wait(buf[..n].to_vec()).await {
                        debug!("relay session {session_id}: send failed: {e}");
                        break;
                    }
                }
                Err(e) => {
                    warn!("relay session {session_id}: local read error: {e}");
                    break;
                }
            }
        }
    };

    // ── Remote → Local ────────────────────────────────────────────────────────
    let downlink = async {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                warn!("relay session {session_id}: local write error: {e}");
                break;
            }
            drained.notify_one();
        }
        // The sender is dropped when the tunnel ends.
        let _ = writer.shutdown().await;
    };

    tokio::select! {
        _ = uplink => {}
        _ = downlink => debug!("relay session {session_id}: tunnel stopped delivering"),
    }

    // Detaching sends client:fail.  Waking the driver releases any frame it
    // was holding for this session.
    if tunnel.detach().is_err() {
        debug!("relay session {session_id}: tunnel already stopped");
    }
    drained.notify_one();
    info!("relay session {session_id} for {peer_addr} ended");
}
