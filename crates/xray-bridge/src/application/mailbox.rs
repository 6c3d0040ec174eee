//! The receive mailbox: the single hand-off point between the event-loop
//! thread and blocking readers.
//!
//! # Threads involved
//!
//! ```text
//! event-loop thread                    caller thread(s)
//! ─────────────────                    ────────────────
//! BufferSink::deliver ──push()──►  ┌──────────────┐
//! BufferSink::state_changed ─────► │ Mutex<ring,  │ ◄──read()── WsHandle::read
//!                                  │       state> │ ◄──avail()─ WsHandle::avail
//!        ▲                         └──────┬───────┘
//!        │  drained (tokio Notify)        │ readable (Condvar)
//!        └────────────────────────────────┘
//! ```
//!
//! Every push and every state change calls `notify_all` on the condition
//! variable, so a blocked reader wakes as soon as there is something to see.
//! Readers additionally cap each wait at a poll interval, which bounds how
//! long a missed wake-up could delay them.
//!
//! When a reader removes bytes it signals `drained`, which the event loop
//! waits on while it holds back a frame that did not fit.  A push that does
//! not fit marks the mailbox as stalled; a reader that sees the stall takes
//! whatever is buffered instead of waiting for more, since nothing more can
//! arrive until it drains.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::debug;
use xray_core::{BufferFull, ConnectionState, FrameSink, RingBuffer, SinkError};

/// What a blocking read saw when it stopped waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Up to the requested number of bytes; possibly empty.
    pub data: Vec<u8>,
    /// Tunnel state at the moment the read finished.
    pub state: ConnectionState,
    /// `true` if the deadline passed before the request was satisfied.
    pub timed_out: bool,
}

struct MailboxState {
    ring: RingBuffer,
    state: ConnectionState,
    /// The producer holds a frame that did not fit.
    stalled: bool,
}

impl MailboxState {
    /// Whether a reader asking for `want` bytes can stop waiting.
    fn satisfies(&self, want: usize) -> bool {
        self.ring.len() >= want
            || self.state.is_terminal()
            || (self.stalled && !self.ring.is_empty())
    }
}

/// Ring buffer plus tunnel state behind one lock, with one readiness signal.
pub struct Mailbox {
    inner: Mutex<MailboxState>,
    readable: Condvar,
    drained: Arc<Notify>,
    capacity: usize,
}

impl Mailbox {
    /// Creates an empty mailbox holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MailboxState {
                ring: RingBuffer::with_capacity(capacity),
                state: ConnectionState::Connecting,
                stalled: false,
            }),
            readable: Condvar::new(),
            drained: Arc::new(Notify::new()),
            capacity,
        })
    }

    /// Signal fired whenever a reader frees space.
    pub fn drained(&self) -> Arc<Notify> {
        Arc::clone(&self.drained)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes waiting to be read.  Never blocks on the network.
    pub fn avail(&self) -> usize {
        self.lock().ring.len()
    }

    /// Last tunnel state published by the event loop.
    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    /// Appends one frame, all or nothing, and wakes readers.
    ///
    /// # Errors
    ///
    /// Returns [`BufferFull`] if the frame does not fit right now.  The
    /// mailbox is then stalled until a reader drains it.
    pub fn push(&self, payload: &[u8]) -> Result<(), BufferFull> {
        let mut inner = self.lock();
        let result = inner.ring.write(payload).map(|_| ());
        inner.stalled = result.is_err();
        drop(inner);
        self.readable.notify_all();
        result
    }

    /// Returns `true` while the producer is holding back a frame.
    pub fn is_stalled(&self) -> bool {
        self.lock().stalled
    }

    /// Records a new tunnel state and wakes readers.
    pub fn publish_state(&self, state: ConnectionState) {
        self.lock().state = state;
        self.readable.notify_all();
    }

    /// Waits until `max` bytes are buffered, the tunnel is terminal, or
    /// `timeout` elapses, then returns up to `max` bytes.
    ///
    /// A request larger than the capacity is satisfied by a full buffer, and
    /// a stalled producer satisfies any request once something is buffered.
    ///
    /// `timeout = None` waits without a deadline.  Each individual wait lasts
    /// at most `poll`.
    pub fn read(&self, max: usize, timeout: Option<Duration>, poll: Duration) -> ReadOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let want = max.min(self.capacity);
        let mut timed_out = false;
        let mut inner = self.lock();

        while !inner.satisfies(want) {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        timed_out = true;
                        break;
                    }
                    poll.min(deadline - now)
                }
                None => poll,
            };
            inner = self
                .readable
                .wait_timeout(inner, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let data = inner.ring.read(max);
        if !data.is_empty() {
            inner.stalled = false;
        }
        let state = inner.state.clone();
        drop(inner);

        if !data.is_empty() {
            debug!("mailbox: drained {} bytes", data.len());
            self.drained.notify_one();
        }

        ReadOutcome {
            data,
            state,
            timed_out,
        }
    }

    /// Blocks until the tunnel is terminal or `timeout` elapses.  Returns
    /// `true` if the tunnel is terminal.
    pub fn wait_terminal(&self, timeout: Duration) -> bool {
        let inner = self.lock();
        let (inner, _) = self
            .readable
            .wait_timeout_while(inner, timeout, |inner| !inner.state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        inner.state.is_terminal()
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        // Every critical section is a single ring or state update, so the
        // data is consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Buffer sink ───────────────────────────────────────────────────────────────

/// Frame sink that appends payload to a [`Mailbox`].  Used by the embedded
/// handle adapter.
pub struct BufferSink {
    mailbox: Arc<Mailbox>,
}

impl BufferSink {
    pub fn new(mailbox: Arc<Mailbox>) -> Self {
        Self { mailbox }
    }
}

impl FrameSink for BufferSink {
    type Consumer = ();

    // The mailbox always exists; attaching only changes the tunnel state.
    fn attach(&mut self, _consumer: ()) {}

    fn detach(&mut self) {}

    fn deliver(&mut self, payload: &[u8]) -> Result<(), SinkError> {
        if payload.len() > self.mailbox.capacity() {
            return Err(SinkError::Oversized {
                len: payload.len(),
                capacity: self.mailbox.capacity(),
            });
        }
        self.mailbox.push(payload).map_err(|_| SinkError::Full)
    }

    fn state_changed(&mut self, state: &ConnectionState) {
        self.mailbox.publish_state(state.clone());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
