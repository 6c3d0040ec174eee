//! Frame sink that forwards payload to a local TCP relay session.
//!
//! The sink owns the sending half of a bounded channel; the relay session's
//! socket writer owns the receiving half.  A full channel is reported as
//! [`SinkError::Full`], which the tunnel loop turns into backpressure.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use xray_core::{ConnectionState, FrameSink, SinkError};

/// Forward-to-socket sink used by the proxy listener.
#[derive(Default)]
pub struct RelaySink {
    tx: Option<mpsc::Sender<Vec<u8>>>,
}

impl RelaySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a relay session is attached.
    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }
}

impl FrameSink for RelaySink {
    type Consumer = mpsc::Sender<Vec<u8>>;

    fn attach(&mut self, consumer: Self::Consumer) {
        self.tx = Some(consumer);
    }

    fn detach(&mut self) {
        self.tx = None;
    }

    fn deliver(&mut self, payload: &[u8]) -> Result<(), SinkError> {
        let Some(tx) = &self.tx else {
            return Err(SinkError::Detached);
        };
        match tx.try_send(payload.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SinkError::Full),
            Err(TrySendError::Closed(_)) => {
                debug!("relay session went away; detaching");
                self.tx = None;
                Err(SinkError::Detached)
            }
        }
    }

    fn state_changed(&mut self, state: &ConnectionState) {
        // Dropping the sender ends the socket writer, which closes the
        // local connection.
        if state.is_terminal() {
            self.tx = None;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
