//! Blocking handle adapter: a tunnel presented as read/write calls.
//!
//! # Threading
//!
//! ```text
//! caller threads                      xray-event-loop thread
//! ──────────────                      ──────────────────────
//! WsHandle::write ──Send cmd──────►   tunnel driver ──► WebSocket
//!        ◄──────── reply (std channel, recv_timeout)
//! WsHandle::read  ◄── Mailbox (Condvar) ◄── BufferSink::deliver
//! ```
//!
//! `read` never touches the socket; it only drains the mailbox.  `write`
//! marshals the frame onto the loop and waits for the loop to report that it
//! was sent.  Any number of threads may call either.
//!
//! # Async callers
//!
//! Construction and I/O block the calling thread.  Do not call them from
//! inside an async task; use [`tokio::task::spawn_blocking`] or the proxy
//! mode instead.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};
use xray_core::{ConnectionState, TunnelError, TunnelUrl};

use crate::application::{BufferSink, Mailbox, Transport};
use crate::domain::HandleConfig;
use crate::infrastructure::event_loop::{EventLoop, REASON_LOOP_STOPPED};
use crate::infrastructure::tunnel::{open_tunnel, SendReply, TunnelHandle};

/// A tunnel endpoint in embedded mode.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use xray_bridge::domain::HandleConfig;
/// use xray_bridge::WsHandle;
///
/// let handle = WsHandle::connect("wss://xray.example.com/devices/42", HandleConfig::default())?;
/// handle.write(b"\x01\x02", None)?;
/// let reply = handle.read(16, Some(Duration::from_secs(1)))?;
/// # Ok::<(), xray_bridge::TunnelError>(())
/// ```
pub struct WsHandle {
    serial: String,
    config: HandleConfig,
    mailbox: Arc<Mailbox>,
    tunnel: TunnelHandle<()>,
    event_loop: Arc<EventLoop>,
    owns_loop: bool,
    close_reason: Mutex<Option<String>>,
}

impl WsHandle {
    /// Connects on a private event loop that lives as long as the handle.
    ///
    /// Blocks until the remote reports `device:ok`, fails, or the handshake
    /// timeout elapses.
    ///
    /// # Errors
    ///
    /// [`TunnelError::InvalidUrl`] for a bad URL; [`TunnelError::Connect`]
    /// for every failure to reach `Ready`.
    pub fn connect(url: &str, config: HandleConfig) -> Result<Self, TunnelError> {
        let event_loop = EventLoop::start()
            .map_err(|e| TunnelError::Connect(format!("cannot start event loop: {e}")))?;
        Self::open(url, config, event_loop, true)
    }

    /// Connects on a shared event loop.  The loop keeps running when the
    /// handle is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub fn connect_on(
        event_loop: Arc<EventLoop>,
        url: &str,
        config: HandleConfig,
    ) -> Result<Self, TunnelError> {
        Self::open(url, config, event_loop, false)
    }

    fn open(
        url: &str,
        config: HandleConfig,
        event_loop: Arc<EventLoop>,
        owns_loop: bool,
    ) -> Result<Self, TunnelError> {
        let url = TunnelUrl::parse(url)?;
        let mailbox = Mailbox::new(config.buffer_capacity);
        let sink = BufferSink::new(Arc::clone(&mailbox));

        let (tunnel, handshake, driver) =
            open_tunnel(url.clone(), config.tunnel.clone(), sink, mailbox.drained(), Some(()));
        event_loop
            .spawn(driver)
            .map_err(|_| TunnelError::Connect(REASON_LOOP_STOPPED.to_string()))?;

        // The driver enforces the handshake timeout itself, and a cancelled
        // driver drops the sender, so this wait is bounded.  The driver
        // attaches the mailbox itself when `device:ok` arrives.
        match handshake.blocking_recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("handle to {url} failed to connect: {e}");
                return Err(e);
            }
            Err(_) => return Err(TunnelError::Connect(REASON_LOOP_STOPPED.to_string())),
        }

        info!("handle connected to {url}");

        Ok(Self {
            serial: url.serial(),
            config,
            mailbox,
            tunnel,
            event_loop,
            owns_loop,
            close_reason: Mutex::new(None),
        })
    }

    /// Reads up to `max` bytes.
    ///
    /// Waits until `max` bytes are buffered, the tunnel ends, or the timeout
    /// elapses, and returns whatever is buffered by then.  If the buffer
    /// fills up and the event loop has to hold incoming data back, the read
    /// returns what is buffered straight away.  An empty result means the
    /// tunnel has ended.
    ///
    /// # Errors
    ///
    /// [`TunnelError::Timeout`] if nothing arrived in time;
    /// [`TunnelError::CommandFailed`] if the handle was closed with a reason.
    pub fn read(&self, max: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TunnelError> {
        self.check_open()?;
        let timeout = timeout.or(self.config.default_timeout);
        let outcome = self.mailbox.read(max, timeout, self.config.poll_interval);

        if !outcome.data.is_empty() {
            return Ok(outcome.data);
        }
        if outcome.state.is_terminal() {
            self.check_open()?;
            debug!("read on {} tunnel returns no data", outcome.state);
            return Ok(Vec::new());
        }
        if outcome.timed_out {
            return Err(TunnelError::Timeout);
        }
        Ok(Vec::new())
    }

    /// Sends `data` as one binary frame and returns its length once the
    /// event loop has written it.
    ///
    /// # Errors
    ///
    /// [`TunnelError::CommandFailed`] if the tunnel is not streaming or the
    /// loop is gone; [`TunnelError::Timeout`] if the loop did not finish in
    /// time (the frame may still be sent).
    pub fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize, TunnelError> {
        self.check_open()?;
        let state = self.mailbox.state();
        if state.is_terminal() {
            return Err(TunnelError::CommandFailed(format!("tunnel is {state}")));
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tunnel
            .send_payload(data.to_vec(), Some(SendReply::Blocking(reply_tx)))?;

        let reply = match timeout.or(self.config.default_timeout) {
            Some(timeout) => reply_rx.recv_timeout(timeout),
            None => reply_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match reply {
            Ok(result) => result.map(|()| data.len()),
            Err(RecvTimeoutError::Timeout) => Err(TunnelError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TunnelError::CommandFailed(REASON_LOOP_STOPPED.to_string()))
            }
        }
    }

    /// Closes the tunnel.
    ///
    /// With a non-empty `reason` the close counts as a failure: this call
    /// returns `CommandFailed(reason)` and so does every later read or write.
    pub fn close(&self, reason: Option<&str>) -> Result<(), TunnelError> {
        let reason = reason.filter(|r| !r.is_empty());
        if let Some(reason) = reason {
            let mut slot = self.close_reason.lock().unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert_with(|| reason.to_string());
        }

        info!("closing handle to {}", self.serial);
        self.tunnel.close();

        match reason {
            Some(reason) => Err(TunnelError::CommandFailed(reason.to_string())),
            None => Ok(()),
        }
    }

    /// Bytes ready to read without waiting.
    pub fn avail(&self) -> usize {
        self.mailbox.avail()
    }

    /// `"<host>:<port>"` of the tunnel endpoint.
    pub fn serial_number(&self) -> &str {
        &self.serial
    }

    pub fn state(&self) -> ConnectionState {
        self.mailbox.state()
    }

    fn check_open(&self) -> Result<(), TunnelError> {
        let slot = self.close_reason.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(reason) => Err(TunnelError::CommandFailed(reason.clone())),
            None => Ok(()),
        }
    }
}

impl Transport for WsHandle {
    fn read(&self, max: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TunnelError> {
        WsHandle::read(self, max, timeout)
    }

    fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize, TunnelError> {
        WsHandle::write(self, data, timeout)
    }

    fn close(&self, reason: Option<&str>) -> Result<(), TunnelError> {
        WsHandle::close(self, reason)
    }

    fn avail(&self) -> usize {
        WsHandle::avail(self)
    }

    fn serial_number(&self) -> &str {
        WsHandle::serial_number(self)
    }
}

impl Drop for WsHandle {
    fn drop(&mut self) {
        self.tunnel.close();
        if self.owns_loop {
            // Give the close handshake a chance before cancelling the driver.
            let grace = self.config.tunnel.close_grace + self.config.poll_interval;
            if !self.mailbox.wait_terminal(grace) {
                debug!("tunnel to {} still open at drop; cancelling", self.serial);
            }
            self.event_loop.shutdown();
        }
    }
}
