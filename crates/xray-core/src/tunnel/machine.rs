//! The tunnel connection state machine.
//!
//! [`TunnelMachine`] owns the [`ConnectionState`] of one tunnel endpoint and
//! the [`FrameSink`] its payload goes to.  Every input (a frame from the
//! remote, a request from the local side, a socket event) is a method call
//! that updates the state and returns the [`Action`]s the I/O loop must
//! perform.  The machine itself never performs I/O, so each transition can be
//! tested with plain method calls.
//!
//! # Who calls what
//!
//! ```text
//! I/O loop event                 machine method          typical actions
//! ──────────────                 ──────────────          ───────────────
//! connect/upgrade failed         on_connect_failed()     ResolveHandshake(Err)
//! upgrade completed              on_open()               -
//! text frame                     on_text()               ResolveHandshake(Ok), CloseSocket
//! binary frame                   on_binary()             (Delivery result)
//! consumer attached              attach()                SendControl(client:ok)
//! consumer went away             detach()                SendControl(client:fail)
//! local close request            close()                 CloseSocket
//! socket closed / errored        on_disconnect()         ResolveHandshake(Err)
//! ```

use tracing::{debug, info, warn};

use crate::tunnel::control::ControlMessage;
use crate::tunnel::sink::{FrameSink, SinkError};
use crate::tunnel::state::{ConnectionState, TransitionError};

/// Failure reason recorded when the remote reports `device:fail`.
pub const REASON_DEVICE_FAILED: &str = "device failed";

/// Failure reason recorded when a frame can never fit in the sink.
pub const REASON_FRAME_TOO_LARGE: &str = "frame exceeds buffer capacity";

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Complete the pending handshake.  Emitted at most once per machine.
    ResolveHandshake(Result<(), String>),
    /// Send a control message as a text frame.
    SendControl(ControlMessage),
    /// Start closing the WebSocket.
    CloseSocket,
}

/// Outcome of offering an inbound binary frame to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The sink took the frame.
    Delivered,
    /// The frame arrived outside `Streaming` or had no consumer; discarded.
    Dropped,
    /// The sink is full.  The frame is handed back; offer it again after the
    /// consumer drains, and read nothing else from the socket until then.
    Stalled(Vec<u8>),
    /// The frame can never be delivered; the tunnel has failed.
    Aborted(Vec<Action>),
}

/// Running counters for one tunnel, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Binary frames handed to the sink.
    pub payload_frames: u64,
    /// Bytes in those frames.
    pub payload_bytes: u64,
    /// Binary frames discarded (not streaming, or consumer gone).
    pub dropped_frames: u64,
    /// Text frames that did not change anything.
    pub ignored_text_frames: u64,
}

/// State machine for a single tunnel endpoint.
///
/// # Example
///
/// ```rust
/// use xray_core::{Action, ConnectionState, ControlMessage, FrameSink, SinkError, TunnelMachine};
///
/// struct Discard;
/// impl FrameSink for Discard {
///     type Consumer = ();
///     fn attach(&mut self, _: ()) {}
///     fn detach(&mut self) {}
///     fn deliver(&mut self, _: &[u8]) -> Result<(), SinkError> { Ok(()) }
///     fn state_changed(&mut self, _: &ConnectionState) {}
/// }
///
/// let mut machine = TunnelMachine::new(Discard);
/// assert_eq!(machine.on_text(b"device:ok"), vec![Action::ResolveHandshake(Ok(()))]);
/// assert_eq!(
///     machine.attach(()).unwrap(),
///     vec![Action::SendControl(ControlMessage::ClientReady)]
/// );
/// assert_eq!(machine.state(), &ConnectionState::Streaming);
/// ```
pub struct TunnelMachine<S: FrameSink> {
    state: ConnectionState,
    sink: S,
    handshake_resolved: bool,
    stats: FrameStats,
}

impl<S: FrameSink> TunnelMachine<S> {
    /// Creates a machine in `Connecting` with a pending handshake.
    pub fn new(sink: S) -> Self {
        Self {
            state: ConnectionState::Connecting,
            sink,
            handshake_resolved: false,
            stats: FrameStats::default(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Returns `true` until the handshake has been resolved either way.
    pub fn handshake_pending(&self) -> bool {
        !self.handshake_resolved
    }

    // ── Socket events ─────────────────────────────────────────────────────────

    /// The WebSocket upgrade succeeded.  The tunnel stays `Connecting` until
    /// the remote reports `device:ok`.
    pub fn on_open(&mut self) {
        debug!("tunnel upgraded; waiting for {}", ControlMessage::DeviceReady);
    }

    /// The socket could not be opened or upgraded.
    pub fn on_connect_failed(&mut self, reason: impl Into<String>) -> Vec<Action> {
        let reason = reason.into();
        let mut actions = Vec::new();
        if self.state.is_terminal() {
            return actions;
        }
        warn!("tunnel connect failed: {reason}");
        self.set_state(ConnectionState::Failed(reason.clone()));
        self.resolve_handshake(Err(reason), &mut actions);
        actions
    }

    /// The socket closed or errored.  `reason` is `None` for a clean close.
    pub fn on_disconnect(&mut self, reason: Option<String>) -> Vec<Action> {
        let mut actions = Vec::new();
        match self.state {
            ConnectionState::Connecting => {
                let reason =
                    reason.unwrap_or_else(|| "connection lost before device ready".to_string());
                info!("tunnel lost during handshake: {reason}");
                self.set_state(ConnectionState::Failed(reason.clone()));
                self.resolve_handshake(Err(reason), &mut actions);
            }
            ConnectionState::Ready | ConnectionState::Streaming => {
                match &reason {
                    Some(r) => info!("tunnel dropped by remote: {r}"),
                    None => info!("tunnel closed by remote"),
                }
                self.set_state(ConnectionState::Closed);
            }
            ConnectionState::Closing => {
                debug!("tunnel close completed");
                self.set_state(ConnectionState::Closed);
            }
            ConnectionState::Closed | ConnectionState::Failed(_) => {}
        }
        actions
    }

    // ── Frames ────────────────────────────────────────────────────────────────

    /// Interprets a text frame against the control vocabulary.
    pub fn on_text(&mut self, payload: &[u8]) -> Vec<Action> {
        let mut actions = Vec::new();

        match ControlMessage::parse(payload) {
            Some(ControlMessage::DeviceReady) if self.state == ConnectionState::Connecting => {
                info!("remote device ready");
                self.set_state(ConnectionState::Ready);
                self.resolve_handshake(Ok(()), &mut actions);
            }
            Some(ControlMessage::DeviceFailed)
                if !self.state.is_terminal() && self.state != ConnectionState::Closing =>
            {
                warn!("remote reported {}", ControlMessage::DeviceFailed);
                actions.extend(self.fail(REASON_DEVICE_FAILED));
            }
            Some(msg) => {
                debug!("ignoring {msg} in state {}", self.state);
                self.stats.ignored_text_frames += 1;
            }
            None => {
                debug!("ignoring unknown text frame ({} bytes)", payload.len());
                self.stats.ignored_text_frames += 1;
            }
        }

        actions
    }

    /// Offers a binary payload frame to the sink.
    ///
    /// Payload is only meaningful once both sides are ready; anything that
    /// arrives earlier (or after the consumer left) is dropped.
    pub fn on_binary(&mut self, payload: Vec<u8>) -> Delivery {
        if self.state != ConnectionState::Streaming {
            debug!(
                "dropping {} byte payload frame in state {}",
                payload.len(),
                self.state
            );
            self.stats.dropped_frames += 1;
            return Delivery::Dropped;
        }

        match self.sink.deliver(&payload) {
            Ok(()) => {
                debug!("delivered {} byte payload frame", payload.len());
                self.stats.payload_frames += 1;
                self.stats.payload_bytes += payload.len() as u64;
                Delivery::Delivered
            }
            Err(SinkError::Full) => {
                debug!("sink full; holding {} byte frame", payload.len());
                Delivery::Stalled(payload)
            }
            Err(e @ SinkError::Oversized { .. }) => {
                warn!("{e}");
                Delivery::Aborted(self.fail(REASON_FRAME_TOO_LARGE))
            }
            Err(SinkError::Detached) => {
                debug!("no consumer attached; dropping {} byte frame", payload.len());
                self.stats.dropped_frames += 1;
                Delivery::Dropped
            }
        }
    }

    // ── Local requests ────────────────────────────────────────────────────────

    /// Attaches a consumer and announces `client:ok` to the remote.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless the tunnel is `Ready`.
    pub fn attach(&mut self, consumer: S::Consumer) -> Result<Vec<Action>, TransitionError> {
        let next = self.state.transition(ConnectionState::Streaming)?;
        self.sink.attach(consumer);
        self.set_state(next);
        info!("consumer attached; tunnel streaming");
        Ok(vec![Action::SendControl(ControlMessage::ClientReady)])
    }

    /// Detaches the consumer and tells the remote with `client:fail`.
    ///
    /// A no-op (apart from releasing the sink's consumer) when not streaming.
    pub fn detach(&mut self) -> Vec<Action> {
        self.sink.detach();
        if self.state != ConnectionState::Streaming {
            return Vec::new();
        }
        self.set_state(ConnectionState::Ready);
        info!("consumer detached; tunnel ready for a new consumer");
        vec![Action::SendControl(ControlMessage::ClientFailed)]
    }

    /// Starts an orderly close.  Idempotent: a no-op once closing, closed,
    /// or failed.
    pub fn close(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state.is_terminal() || self.state == ConnectionState::Closing {
            return actions;
        }
        info!("closing tunnel from state {}", self.state);
        self.set_state(ConnectionState::Closing);
        self.resolve_handshake(Err("tunnel closed before device ready".to_string()), &mut actions);
        actions.push(Action::CloseSocket);
        actions
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Moves to `Failed(reason)` and asks for the socket to be closed.
    fn fail(&mut self, reason: &str) -> Vec<Action> {
        let mut actions = Vec::new();
        self.set_state(ConnectionState::Failed(reason.to_string()));
        self.resolve_handshake(Err(reason.to_string()), &mut actions);
        actions.push(Action::CloseSocket);
        actions
    }

    fn resolve_handshake(&mut self, outcome: Result<(), String>, actions: &mut Vec<Action>) {
        if self.handshake_resolved {
            return;
        }
        self.handshake_resolved = true;
        actions.push(Action::ResolveHandshake(outcome));
    }

    fn set_state(&mut self, next: ConnectionState) {
        match self.state.transition(next) {
            Ok(next) => {
                debug!("tunnel state {} -> {}", self.state, next);
                self.state = next;
                self.sink.state_changed(&self.state);
            }
            Err(e) => warn!("{e}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
