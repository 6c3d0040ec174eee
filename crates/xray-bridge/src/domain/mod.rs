//! Domain layer for xray-bridge.
//!
//! Pure configuration types with no dependencies on I/O, networking, or
//! runtimes.  The state machine and ring buffer themselves live in
//! `xray-core`; this layer only describes how a bridge is set up.

pub mod config;

pub use config::{HandleConfig, ProxyConfig, TunnelConfig, DEFAULT_BUFFER_CAPACITY};
