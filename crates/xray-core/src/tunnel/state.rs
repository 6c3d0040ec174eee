//! Connection lifecycle states and the legal transitions between them.
//!
//! ```text
//!              device:ok            attach
//! Connecting ────────────► Ready ◄──────────► Streaming
//!     │                      │      detach        │
//!     │ connect error /      │                    │
//!     │ device:fail          └────────┬───────────┘
//!     ▼                               │ close / disconnect
//!   Failed ◄── device:fail ───────────┤
//!                                     ▼
//!                                  Closing ──► Closed
//! ```
//!
//! `Closed` and `Failed` are terminal: nothing leaves them.

use std::fmt;

use thiserror::Error;

/// Lifecycle state of a single tunnel endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Socket being opened, or upgraded and waiting for `device:ok`.
    Connecting,
    /// Remote device ready; no local consumer attached yet.
    Ready,
    /// A consumer is attached and payload flows in both directions.
    Streaming,
    /// Close requested; waiting for the socket to finish closing.
    Closing,
    /// Closed cleanly or by the remote after the handshake.
    Closed,
    /// The tunnel failed; the string says why.
    Failed(String),
}

/// Returned when a caller asks for a transition the lifecycle does not allow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal tunnel transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl ConnectionState {
    /// Returns `true` for states nothing can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed(_))
    }

    /// Returns `true` once the handshake has completed and the tunnel is
    /// still usable.
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::Streaming)
    }

    /// Returns `true` if the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Connecting, Ready) => true,
            (Connecting, Failed(_)) => true,
            (Connecting, Closing) => true,
            (Ready, Streaming) => true,
            (Streaming, Ready) => true,
            (Ready | Streaming, Closing | Closed | Failed(_)) => true,
            (Closing, Closed) => true,
            (Closing, Failed(_)) => true,
            _ => false,
        }
    }

    /// Validates and returns `next`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the move is not in the lifecycle.
    pub fn transition(&self, next: ConnectionState) -> Result<ConnectionState, TransitionError> {
        if self.can_transition_to(&next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self.clone(),
                to: next,
            })
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("Connecting"),
            ConnectionState::Ready => f.write_str("Ready"),
            ConnectionState::Streaming => f.write_str("Streaming"),
            ConnectionState::Closing => f.write_str("Closing"),
            ConnectionState::Closed => f.write_str("Closed"),
            ConnectionState::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
