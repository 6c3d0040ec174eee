//! Infrastructure layer for xray-bridge.
//!
//! Contains all I/O: the background event loop, the WebSocket tunnel driver,
//! the local TCP proxy, the blocking handle, config files, and logging.

pub mod config_file;
pub mod event_loop;
pub mod logging;
pub mod proxy;
pub mod tunnel;
pub mod ws_handle;

pub use config_file::{load_config, ConfigError, FileConfig};
pub use event_loop::EventLoop;
pub use proxy::{run_proxy, Proxy};
pub use tunnel::{open_tunnel, TunnelCommand, TunnelHandle};
pub use ws_handle::WsHandle;
