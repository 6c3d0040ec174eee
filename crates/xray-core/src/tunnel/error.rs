//! Error kinds surfaced by tunnel endpoints, proxies, and handles.

use thiserror::Error;

use crate::buffer::ring::BufferFull;
use crate::tunnel::url::UrlError;

/// Everything that can go wrong with a tunnel, as seen by its user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TunnelError {
    /// The tunnel never reached `Ready`: socket, TLS, upgrade, `device:fail`,
    /// or handshake timeout.  Fatal to this attempt; nothing retries.
    #[error("tunnel connect failed: {0}")]
    Connect(String),

    /// The tunnel was dropped by the remote after the handshake.
    #[error("tunnel closed by remote")]
    RemoteClosed,

    /// A write did not fit in the receive buffer.
    #[error(transparent)]
    BufferFull(#[from] BufferFull),

    /// The handle was closed because of an error, or the tunnel cannot
    /// carry the command any more.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// A read or write did not complete in the allotted time.  Safe to retry.
    #[error("operation timed out")]
    Timeout,

    /// The tunnel URL could not be parsed.
    #[error(transparent)]
    InvalidUrl(#[from] UrlError),
}

impl TunnelError {
    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TunnelError::Timeout | TunnelError::BufferFull(_))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
