//! The byte-transport interface protocol clients are written against.
//!
//! A debugger speaking a device protocol only needs to move bytes.  Writing
//! it against [`Transport`] lets the same client run over a USB backend, a
//! tunnel handle, or an in-memory fake in tests.

use std::time::Duration;

use xray_core::TunnelError;

/// A blocking, thread-safe byte transport to one device.
///
/// `timeout = None` means "use the transport's default timeout".
pub trait Transport: Send + Sync {
    /// Returns up to `max` bytes.  May return fewer; an empty result means
    /// the transport is closed.
    fn read(&self, max: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TunnelError>;

    /// Sends `data` in full and returns its length.
    fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize, TunnelError>;

    /// Closes the transport.  With a reason, the close is reported as an
    /// error and every later call fails with the same error.
    fn close(&self, reason: Option<&str>) -> Result<(), TunnelError>;

    /// Bytes that can be read without waiting.
    fn avail(&self) -> usize;

    /// Identifier of the device on the other end.
    fn serial_number(&self) -> &str;

    /// Reads exactly `len` bytes, looping over short reads.
    ///
    /// # Errors
    ///
    /// [`TunnelError::RemoteClosed`] if the transport closes before `len`
    /// bytes arrive; otherwise whatever [`Transport::read`] returns.
    fn read_exact(&self, len: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TunnelError> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let chunk = self.read(len - out.len(), timeout)?;
            if chunk.is_empty() {
                return Err(TunnelError::RemoteClosed);
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
