//! WebSocket client that drives a [`TunnelMachine`] over a real socket.
//!
//! # How it works
//!
//! [`open_tunnel`] returns three things:
//!
//! 1. a [`TunnelHandle`] for sending commands (payload, attach, detach, close)
//!    and observing the connection state,
//! 2. a oneshot receiver that resolves once with the handshake outcome,
//! 3. the driver future, which the caller spawns on whichever runtime should
//!    own the socket (the embedded [`EventLoop`](super::EventLoop) or the
//!    proxy's own runtime).
//!
//! The driver is the only code that touches the socket or the state machine.
//! It loops over three event sources with `tokio::select!`:
//!
//! ```text
//! commands  ─┐
//! ws frames ─┼─► TunnelMachine ─► Vec<Action> ─► ws writes / handshake / close
//! drained   ─┘     (only while a frame is held back)
//! ```
//!
//! While a frame is held back because the sink reported `Full`, the driver
//! stops reading the socket altogether.  The WebSocket library's own
//! buffering, and then TCP flow control, push back on the remote.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use xray_core::{
    Action, ConnectionState, ControlMessage, Delivery, FrameSink, TunnelError, TunnelMachine,
    TunnelUrl,
};

use crate::domain::TunnelConfig;
use crate::infrastructure::event_loop::REASON_LOOP_STOPPED;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Outcome of waiting for `device:ok`.
pub type HandshakeResult = Result<(), TunnelError>;

/// Reply slot for a payload send.
#[derive(Debug)]
pub enum SendReply {
    /// A std channel, so blocking callers can wait on it with a timeout.
    Blocking(SyncSender<Result<(), TunnelError>>),
    /// Completes a task awaiting [`TunnelHandle::send_and_wait`].
    Async(oneshot::Sender<Result<(), TunnelError>>),
}

impl SendReply {
    fn complete(self, result: Result<(), TunnelError>) {
        // The caller may have timed out and gone away.
        match self {
            SendReply::Blocking(tx) => {
                let _ = tx.try_send(result);
            }
            SendReply::Async(tx) => {
                let _ = tx.send(result);
            }
        }
    }
}

/// Requests the driver carries out on behalf of local code.
#[derive(Debug)]
pub enum TunnelCommand<C> {
    /// Send one binary frame.  `reply`, if given, receives the result.
    Send {
        payload: Vec<u8>,
        reply: Option<SendReply>,
    },
    /// Attach a consumer and announce `client:ok`.
    Attach(C),
    /// Detach the consumer and announce `client:fail`.
    Detach,
    /// Close the tunnel.
    Close,
}

/// Cloneable handle to a running tunnel driver.
pub struct TunnelHandle<C> {
    commands: mpsc::UnboundedSender<TunnelCommand<C>>,
    state: watch::Receiver<ConnectionState>,
}

impl<C> Clone for TunnelHandle<C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            state: self.state.clone(),
        }
    }
}

impl<C> TunnelHandle<C> {
    /// Queues a binary frame for sending.
    ///
    /// # Errors
    ///
    /// [`TunnelError::CommandFailed`] if the driver is gone.
    pub fn send_payload(
        &self,
        payload: Vec<u8>,
        reply: Option<SendReply>,
    ) -> Result<(), TunnelError> {
        self.command(TunnelCommand::Send { payload, reply })
    }

    /// Sends one binary frame and waits until the driver has written it.
    ///
    /// At most one frame per caller is queued at a time, so a fast producer
    /// is held to the pace of the socket.
    ///
    /// # Errors
    ///
    /// [`TunnelError::CommandFailed`] if the tunnel is not streaming, the
    /// send failed, or the driver is gone.
    pub async fn send_and_wait(&self, payload: Vec<u8>) -> Result<(), TunnelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_payload(payload, Some(SendReply::Async(reply_tx)))?;
        reply_rx
            .await
            .unwrap_or_else(|_| Err(TunnelError::CommandFailed(REASON_LOOP_STOPPED.to_string())))
    }

    pub fn attach(&self, consumer: C) -> Result<(), TunnelError> {
        self.command(TunnelCommand::Attach(consumer))
    }

    pub fn detach(&self) -> Result<(), TunnelError> {
        self.command(TunnelCommand::Detach)
    }

    /// Asks the driver to close.  A no-op if it has already stopped.
    pub fn close(&self) {
        // The driver being gone means the tunnel is already closed.
        let _ = self.command(TunnelCommand::Close);
    }

    /// Most recent state published by the driver.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Returns `true` once the driver has stopped or the tunnel is terminal.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed() || self.state.borrow().is_terminal()
    }

    fn command(&self, command: TunnelCommand<C>) -> Result<(), TunnelError> {
        self.commands
            .send(command)
            .map_err(|_| TunnelError::CommandFailed(REASON_LOOP_STOPPED.to_string()))
    }
}

/// Prepares a tunnel to `url` that delivers payload into `sink`.
///
/// `drained` must be signalled by the consumer every time it frees space in
/// the sink; the driver waits on it while a frame is held back.
///
/// With `attach_on_ready` set, the driver attaches that consumer in the same
/// step that handles `device:ok`, before it reads another frame, so payload
/// sent right behind `device:ok` is not dropped.
///
/// Nothing happens until the returned future is spawned.
pub fn open_tunnel<S>(
    url: TunnelUrl,
    config: TunnelConfig,
    sink: S,
    drained: Arc<Notify>,
    attach_on_ready: Option<S::Consumer>,
) -> (
    TunnelHandle<S::Consumer>,
    oneshot::Receiver<HandshakeResult>,
    impl Future<Output = ()> + Send + 'static,
)
where
    S: FrameSink + 'static,
    S::Consumer: 'static,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (handshake_tx, handshake_rx) = oneshot::channel();

    let driver = TunnelDriver {
        url,
        config,
        machine: TunnelMachine::new(sink),
        state_tx,
        handshake_tx: Some(handshake_tx),
        drained,
        attach_on_ready,
    };

    let handle = TunnelHandle {
        commands: command_tx,
        state: state_rx,
    };

    (handle, handshake_rx, driver.run(command_rx))
}

// ── Driver ────────────────────────────────────────────────────────────────────

struct TunnelDriver<S: FrameSink> {
    url: TunnelUrl,
    config: TunnelConfig,
    machine: TunnelMachine<S>,
    state_tx: watch::Sender<ConnectionState>,
    handshake_tx: Option<oneshot::Sender<HandshakeResult>>,
    drained: Arc<Notify>,
    attach_on_ready: Option<S::Consumer>,
}

impl<S: FrameSink> TunnelDriver<S> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<TunnelCommand<S::Consumer>>) {
        let deadline = Instant::now() + self.config.handshake_timeout;

        let (mut ws_tx, mut ws_rx) = match connect(&self.url, &self.config, deadline).await {
            Ok(stream) => stream.split(),
            Err(reason) => {
                let actions = self.machine.on_connect_failed(reason);
                self.apply_local(actions);
                self.publish_state();
                return;
            }
        };
        self.machine.on_open();
        let drained = Arc::clone(&self.drained);

        // A frame the sink could not take yet.  While set, the socket is not read.
        let mut held: Option<Vec<u8>> = None;

        loop {
            let actions = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut ws_tx).await,
                    None => {
                        debug!("all tunnel handles dropped; closing");
                        self.machine.close()
                    }
                },

                _ = drained.notified(), if held.is_some() => {
                    match held.take() {
                        Some(frame) => self.offer(frame, &mut held),
                        None => Vec::new(),
                    }
                }

                frame = ws_rx.next(), if held.is_none() => {
                    self.handle_frame(frame, &mut held)
                }

                _ = sleep_until(deadline), if self.machine.handshake_pending() => {
                    let reason = format!(
                        "no {} within {} ms",
                        ControlMessage::DeviceReady,
                        self.config.handshake_timeout.as_millis()
                    );
                    self.machine.on_connect_failed(reason)
                }
            };

            let close_requested = self.apply(actions, &mut ws_tx).await;
            self.publish_state();

            if close_requested {
                self.close_socket(&mut ws_tx, &mut ws_rx).await;
                self.publish_state();
            }

            if self.machine.state().is_terminal() {
                break;
            }
        }

        info!(
            "tunnel to {} finished: {} ({:?})",
            self.url,
            self.machine.state(),
            self.machine.stats()
        );
    }

    // ── Event handlers ────────────────────────────────────────────────────────

    async fn handle_command(
        &mut self,
        command: TunnelCommand<S::Consumer>,
        ws_tx: &mut WsSink,
    ) -> Vec<Action> {
        match command {
            TunnelCommand::Send { payload, reply } => {
                let (result, actions) = self.send_payload(payload, ws_tx).await;
                if let Some(reply) = reply {
                    reply.complete(result);
                }
                actions
            }
            TunnelCommand::Attach(consumer) => match self.machine.attach(consumer) {
                Ok(actions) => actions,
                Err(e) => {
                    warn!("cannot attach consumer: {e}");
                    Vec::new()
                }
            },
            TunnelCommand::Detach => self.machine.detach(),
            TunnelCommand::Close => self.machine.close(),
        }
    }

    async fn send_payload(
        &mut self,
        payload: Vec<u8>,
        ws_tx: &mut WsSink,
    ) -> (Result<(), TunnelError>, Vec<Action>) {
        let state = self.machine.state().clone();
        if state != ConnectionState::Streaming {
            return (
                Err(TunnelError::CommandFailed(format!("tunnel is {state}"))),
                Vec::new(),
            );
        }

        let len = payload.len();
        match ws_tx.send(Message::Binary(payload)).await {
            Ok(()) => {
                debug!("sent {len} byte payload frame");
                (Ok(()), Vec::new())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("tunnel send failed: {reason}");
                let actions = self.machine.on_disconnect(Some(reason.clone()));
                (Err(TunnelError::CommandFailed(reason)), actions)
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        held: &mut Option<Vec<u8>>,
    ) -> Vec<Action> {
        match frame {
            Some(Ok(Message::Binary(payload))) => self.offer(payload, held),
            Some(Ok(Message::Text(text))) => self.machine.on_text(text.as_bytes()),
            Some(Ok(Message::Close(frame))) => {
                debug!("remote sent close frame: {frame:?}");
                self.machine.on_disconnect(None)
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Vec::new(),
            Some(Err(e)) => self.machine.on_disconnect(Some(e.to_string())),
            None => self.machine.on_disconnect(None),
        }
    }

    /// Offers a payload frame to the sink, holding it back if the sink is full.
    fn offer(&mut self, payload: Vec<u8>, held: &mut Option<Vec<u8>>) -> Vec<Action> {
        match self.machine.on_binary(payload) {
            Delivery::Delivered | Delivery::Dropped => Vec::new(),
            Delivery::Stalled(frame) => {
                *held = Some(frame);
                Vec::new()
            }
            Delivery::Aborted(actions) => actions,
        }
    }

    // ── Actions ───────────────────────────────────────────────────────────────

    /// Carries out `actions`.  Returns `true` if the socket should be closed.
    async fn apply(&mut self, actions: Vec<Action>, ws_tx: &mut WsSink) -> bool {
        let mut close_requested = false;
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::ResolveHandshake(outcome) => {
                    let ready = outcome.is_ok();
                    self.resolve_handshake(outcome);
                    if ready {
                        queue.extend(self.attach_pending_consumer());
                    }
                }
                Action::SendControl(message) => {
                    debug!("sending control {message}");
                    if let Err(e) = ws_tx.send(Message::Text(message.as_str().to_string())).await {
                        warn!("failed to send {message}: {e}");
                    }
                }
                Action::CloseSocket => close_requested = true,
            }
        }
        close_requested
    }

    /// Attaches the consumer given to [`open_tunnel`], if any.
    fn attach_pending_consumer(&mut self) -> Vec<Action> {
        let Some(consumer) = self.attach_on_ready.take() else {
            return Vec::new();
        };
        match self.machine.attach(consumer) {
            Ok(actions) => actions,
            Err(e) => {
                warn!("cannot attach consumer on ready: {e}");
                Vec::new()
            }
        }
    }

    /// Carries out actions when there is no socket to write to.
    fn apply_local(&mut self, actions: Vec<Action>) {
        for action in actions {
            if let Action::ResolveHandshake(outcome) = action {
                self.resolve_handshake(outcome);
            }
        }
    }

    fn resolve_handshake(&mut self, outcome: Result<(), String>) {
        // Waiters read the state as soon as they wake.
        self.publish_state();
        if let Some(tx) = self.handshake_tx.take() {
            // The waiter may have given up already.
            let _ = tx.send(outcome.map_err(TunnelError::Connect));
        }
    }

    /// Sends a close frame and waits up to the close grace period for the
    /// remote to answer.
    async fn close_socket(&mut self, ws_tx: &mut WsSink, ws_rx: &mut WsSource) {
        if let Err(e) = ws_tx.send(Message::Close(None)).await {
            debug!("close frame not sent: {e}");
        }

        let drain = async {
            while let Some(Ok(message)) = ws_rx.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
        };
        if timeout(self.config.close_grace, drain).await.is_err() {
            debug!("remote did not acknowledge close in time");
        }

        let actions = self.machine.on_disconnect(None);
        self.apply_local(actions);
    }

    fn publish_state(&self) {
        let current = self.machine.state();
        self.state_tx.send_if_modified(|published| {
            if *published == *current {
                false
            } else {
                *published = current.clone();
                true
            }
        });
    }
}

// ── Connecting ────────────────────────────────────────────────────────────────

/// Builds the upgrade request and connects, bounded by `deadline`.
async fn connect(
    url: &TunnelUrl,
    config: &TunnelConfig,
    deadline: Instant,
) -> Result<WsStream, String> {
    let request = build_request(url, config)?;
    info!("connecting tunnel to {url}");

    match timeout_at(deadline, connect_async(request)).await {
        Ok(Ok((stream, response))) => {
            debug!("tunnel upgrade accepted: {}", response.status());
            Ok(stream)
        }
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!(
            "connect timed out after {} ms",
            config.handshake_timeout.as_millis()
        )),
    }
}

fn build_request(url: &TunnelUrl, config: &TunnelConfig) -> Result<Request, String> {
    let mut request = url
        .to_string()
        .into_client_request()
        .map_err(|e| e.to_string())?;

    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("invalid header name {name:?}: {e}"))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid value for header {name}: {e}"))?;
        request.headers_mut().append(name, value);
    }
    Ok(request)
}

impl<S: FrameSink> Drop for TunnelDriver<S> {
    /// A driver cancelled mid-flight (event loop shut down) still moves its
    /// sink to a terminal state so blocked readers wake up.
    fn drop(&mut self) {
        if !self.machine.state().is_terminal() {
            self.machine
                .on_disconnect(Some(REASON_LOOP_STOPPED.to_string()));
            self.publish_state();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
