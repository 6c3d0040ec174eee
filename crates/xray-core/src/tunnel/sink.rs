//! The seam between the state machine and whatever consumes tunnel payload.
//!
//! The bridge has two consumers: a local TCP socket (proxy mode) and a ring
//! buffer drained by a blocking reader (embedded mode).  Rather than two
//! state machines, there is one [`TunnelMachine`](crate::TunnelMachine)
//! generic over a [`FrameSink`], and the caller picks the sink at
//! construction.

use thiserror::Error;

use crate::tunnel::state::ConnectionState;

/// Why a sink could not take a payload frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The consumer is behind.  Hold the frame and retry after it drains.
    #[error("sink is full")]
    Full,

    /// The frame can never fit (larger than the sink's total capacity).
    #[error("frame of {len} bytes exceeds sink capacity of {capacity} bytes")]
    Oversized { len: usize, capacity: usize },

    /// No consumer is attached any more.
    #[error("sink has no attached consumer")]
    Detached,
}

/// Destination for inbound payload frames.
///
/// All methods are called from the tunnel's event-loop thread only, and
/// must not block.
#[cfg_attr(test, mockall::automock(type Consumer = ();))]
pub trait FrameSink: Send {
    /// What a consumer hands over when it attaches (a channel sender for a
    /// socket relay, nothing for a buffer).
    type Consumer: Send;

    /// Connects a consumer.  Called on `Ready → Streaming`.
    fn attach(&mut self, consumer: Self::Consumer);

    /// Disconnects the current consumer, if any.
    fn detach(&mut self);

    /// Takes one payload frame, all or nothing.
    ///
    /// # Errors
    ///
    /// [`SinkError::Full`] asks the caller to apply backpressure and retry.
    /// [`SinkError::Oversized`] and [`SinkError::Detached`] are final.
    fn deliver(&mut self, payload: &[u8]) -> Result<(), SinkError>;

    /// Observes every state change so blocked consumers can be woken.
    fn state_changed(&mut self, state: &ConnectionState);
}
