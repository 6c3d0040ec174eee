//! The background event loop that owns all tunnel I/O in embedded mode.
//!
//! Embedded callers are ordinary blocking threads with no async runtime of
//! their own.  [`EventLoop`] gives them one: a single-worker tokio runtime on
//! a dedicated thread named `xray-event-loop`.  Every tunnel driver runs
//! there, so socket reads, frame handling, and state transitions all happen
//! on one thread.
//!
//! An `EventLoop` is an ordinary value, not a process-wide singleton.  Share
//! one between several handles with `Arc`, or give each test its own.

use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use xray_core::TunnelError;

/// Reason reported to callers once the loop has been stopped.
pub const REASON_LOOP_STOPPED: &str = "event loop stopped";

/// A one-worker tokio runtime running on its own thread.
pub struct EventLoop {
    runtime: Mutex<Option<Runtime>>,
}

impl EventLoop {
    /// Starts the loop thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the runtime cannot be built (for example, the
    /// OS refuses to create a thread).
    pub fn start() -> io::Result<Arc<Self>> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("xray-event-loop")
            .enable_all()
            .build()?;
        info!("event loop started");
        Ok(Arc::new(Self {
            runtime: Mutex::new(Some(runtime)),
        }))
    }

    /// Returns `true` until [`shutdown`](Self::shutdown) has been called.
    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Spawns `future` on the loop thread.
    ///
    /// # Errors
    ///
    /// [`TunnelError::CommandFailed`] if the loop has been shut down.
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>, TunnelError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match self.lock().as_ref() {
            Some(runtime) => Ok(runtime.spawn(future)),
            None => Err(TunnelError::CommandFailed(REASON_LOOP_STOPPED.to_string())),
        }
    }

    /// Cancels every task on the loop and stops its thread.
    ///
    /// Cancelling a tunnel driver drops its pending handshake sender, so
    /// anyone still waiting for `device:ok` is released with an error.
    /// Calling this more than once is a no-op.
    pub fn shutdown(&self) {
        let runtime = self.lock().take();
        match runtime {
            Some(runtime) => {
                // Does not wait for the worker thread, so it is safe to call
                // from any context, including a task on this very loop.
                runtime.shutdown_background();
                info!("event loop stopped");
            }
            None => debug!("event loop already stopped"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Runtime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
