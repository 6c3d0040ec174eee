//! Application layer for xray-bridge.
//!
//! Contains the two frame sinks the tunnel machine can be built with, the
//! mailbox that backs the embedded sink, and the [`Transport`] trait that
//! the embedded handle implements.
//!
//! # For beginners
//!
//! Nothing in this layer opens a socket.  The sinks are plain structs that
//! the event loop calls synchronously, so every behaviour here is tested with
//! ordinary `#[test]` functions and in-memory channels.

pub mod mailbox;
pub mod relay;
pub mod transport;

pub use mailbox::{BufferSink, Mailbox, ReadOutcome};
pub use relay::RelaySink;
pub use transport::Transport;
