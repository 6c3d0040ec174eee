//! # xray-core
//!
//! Shared library for the X-Ray tunnel bridge containing the bounded byte
//! buffer, the tunnel URL model, the control-message vocabulary, and the
//! connection state machine.
//!
//! This crate has zero dependencies on sockets, threads, or async runtimes.
//! Everything here can be driven from a unit test with plain method calls.
//!
//! # Architecture overview (for beginners)
//!
//! X-Ray carries the bytes of a device transport (normally USB) over a
//! WebSocket so a debugger on one machine can reach a device plugged into
//! another.  Binary WebSocket frames carry the device bytes verbatim; text
//! frames carry a tiny control vocabulary (`device:ok`, `client:ok`, ...).
//!
//! - **`buffer`** – A fixed-capacity ring buffer.  It is the hand-off point
//!   between the network thread (producer) and a blocking reader (consumer).
//!
//! - **`tunnel`** – The tunnel URL parser, the control vocabulary, the
//!   connection state enum, and [`TunnelMachine`]: the state machine that
//!   decides what to do with every inbound frame and every local request.
//!   It never touches a socket; it returns [`Action`]s for the I/O loop to
//!   carry out.

pub mod buffer;
pub mod tunnel;

// Re-export the most-used types at the crate root so callers can write
// `xray_core::RingBuffer` instead of `xray_core::buffer::ring::RingBuffer`.
pub use buffer::ring::{BufferFull, RingBuffer};
pub use tunnel::control::ControlMessage;
pub use tunnel::error::TunnelError;
pub use tunnel::machine::{Action, Delivery, FrameStats, TunnelMachine};
pub use tunnel::sink::{FrameSink, SinkError};
pub use tunnel::state::{ConnectionState, TransitionError};
pub use tunnel::url::{Scheme, TunnelUrl, UrlError};
