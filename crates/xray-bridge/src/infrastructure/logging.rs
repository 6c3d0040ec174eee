//! Log subscriber setup.
//!
//! The bridge logs through `tracing`.  Verbosity is chosen in this order:
//!
//! 1. `RUST_LOG`, if set and valid (e.g. `RUST_LOG=xray_bridge=debug`).
//! 2. `debug` when tracing is switched on (`XRAY_TRACE` or `--trace`).
//! 3. `error` otherwise, so an embedding application sees nothing unless
//!    something goes wrong.

use tracing_subscriber::EnvFilter;

/// Environment variable that switches on debug logging.
pub const TRACE_ENV_VAR: &str = "XRAY_TRACE";

/// Returns `true` if `value` switches tracing on: `1`, `true`, or `True`.
pub fn is_trace_value(value: &str) -> bool {
    matches!(value, "1" | "true" | "True")
}

/// Reads [`TRACE_ENV_VAR`] from the environment.
pub fn trace_enabled_from_env() -> bool {
    std::env::var(TRACE_ENV_VAR)
        .map(|v| is_trace_value(&v))
        .unwrap_or(false)
}

/// Default filter directive when `RUST_LOG` is absent.
pub fn default_directive(trace: bool) -> &'static str {
    if trace {
        "debug"
    } else {
        "error"
    }
}

/// Installs the global `tracing` subscriber.
///
/// Returns `false` if a subscriber was already installed (for example by an
/// embedding application); the existing one is left in place.
pub fn init(trace: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(trace)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
