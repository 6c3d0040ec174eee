//! Tunnel protocol: endpoint URL, control vocabulary, connection lifecycle,
//! and the state machine that ties them together.
//!
//! # Wire protocol
//!
//! ```text
//! binary frame  →  opaque device bytes, forwarded verbatim
//! text frame    →  one of: device:ok | device:fail | client:ok | client:fail
//!                  (anything else is ignored)
//! ```
//!
//! # Handshake
//!
//! ```text
//! Remote (device side)                 Local (this bridge)
//! ────────────────────                 ───────────────────
//!                       ← WebSocket upgrade
//! "device:ok"           →              Connecting → Ready
//!                                      consumer attaches
//!                       ← "client:ok"  Ready → Streaming
//! binary payload       ⇄               binary payload
//! ```

pub mod control;
pub mod error;
pub mod machine;
pub mod sink;
pub mod state;
pub mod url;

pub use control::ControlMessage;
pub use error::TunnelError;
pub use machine::{Action, Delivery, FrameStats, TunnelMachine};
pub use sink::{FrameSink, SinkError};
pub use state::{ConnectionState, TransitionError};
pub use url::{Scheme, TunnelUrl, UrlError};
