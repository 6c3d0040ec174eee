//! xray-bridge library crate.
//!
//! Exposes a remote device, reachable through a WebSocket tunnel, either as a
//! local TCP port (proxy mode) or as a blocking read/write handle usable from
//! any thread (embedded mode).
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Remote device endpoint (binary payload + text control over WebSocket)
//!         ↕
//! [xray-bridge]
//!   ├── domain/            Plain config structs: TunnelConfig, HandleConfig, ProxyConfig
//!   ├── application/       Frame sinks (relay, buffer), Mailbox, Transport trait
//!   └── infrastructure/
//!         ├── event_loop   Background tokio runtime owning all tunnel I/O
//!         ├── tunnel       WebSocket client driving the xray-core state machine
//!         ├── proxy        Local TCP listener and relay session
//!         ├── ws_handle    Blocking handle adapter (implements Transport)
//!         ├── config_file  TOML configuration loading
//!         └── logging      tracing-subscriber setup
//!         ↕
//! Local debugger (TCP socket or in-process calls)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no external dependencies (no I/O, no async, no frameworks).
//! - `application` depends on `domain` and `xray-core`; it never opens sockets.
//! - `infrastructure` depends on all other layers plus `tokio` and `tungstenite`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: frame sinks and the transport interface.
pub mod application;

/// Infrastructure layer: event loop, WebSocket tunnel, proxy, handle.
pub mod infrastructure;

pub use application::Transport;
pub use infrastructure::{EventLoop, WsHandle};
pub use xray_core::TunnelError;
