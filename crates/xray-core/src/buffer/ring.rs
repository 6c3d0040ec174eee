//! Fixed-capacity circular byte buffer.
//!
//! # What is a ring buffer? (for beginners)
//!
//! A ring buffer is an array whose end wraps around to its start.  Two
//! indices chase each other around the array: `tail` is where the next write
//! lands and `head` is where the next read starts.  When an index reaches the
//! end of the array it wraps back to 0, so the storage is reused forever
//! without shifting bytes around.
//!
//! ```text
//!  capacity = 8, used = 5
//!
//!  index:  0   1   2   3   4   5   6   7
//!        [ F | G | H | . | . | C | D | E ]
//!                      ^       ^
//!                    tail    head
//! ```
//!
//! # Full versus empty
//!
//! When the buffer is completely full *and* when it is completely empty,
//! `head == tail`.  The indices alone cannot tell the two apart, so the buffer
//! tracks the number of used bytes explicitly.
//!
//! # No overwrite
//!
//! Unlike a logging ring that silently overwrites the oldest data, this buffer
//! refuses a write that does not fit and returns [`BufferFull`].  The tunnel
//! treats that as backpressure: it stops reading the network until the
//! consumer drains some bytes.

use thiserror::Error;

/// Returned when a write needs more space than the buffer has free.
///
/// The buffer is left exactly as it was before the failed write.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("buffer full: {requested} bytes requested, {free} bytes free")]
pub struct BufferFull {
    /// Size of the rejected write.
    pub requested: usize,
    /// Free space at the time of the write.
    pub free: usize,
}

/// A bounded FIFO of bytes with a capacity fixed at construction.
///
/// # Examples
///
/// ```rust
/// use xray_core::RingBuffer;
///
/// let mut ring = RingBuffer::with_capacity(8);
/// ring.write(b"ABCD").unwrap();
/// ring.write(b"EFGH").unwrap();
/// assert!(ring.write(b"I").is_err());
/// assert_eq!(ring.read(8), b"ABCDEFGH");
/// assert!(ring.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    /// Index of the oldest unread byte.
    head: usize,
    /// Index where the next written byte goes.
    tail: usize,
    /// Number of unread bytes; disambiguates full from empty.
    used: usize,
}

impl RingBuffer {
    /// Creates an empty buffer able to hold exactly `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            used: 0,
        }
    }

    /// Total number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.used
    }

    /// Returns `true` when there is nothing to read.
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Returns `true` when no further byte can be written.
    pub fn is_full(&self) -> bool {
        self.used == self.capacity()
    }

    /// Number of bytes that can be written before the buffer is full.
    pub fn free(&self) -> usize {
        self.capacity() - self.used
    }

    /// Appends all of `data`, or nothing at all.
    ///
    /// Returns the number of bytes written, which is always `data.len()` on
    /// success.
    ///
    /// # Errors
    ///
    /// Returns [`BufferFull`] if `data.len()` exceeds [`free`](Self::free).
    /// The buffer is not modified in that case.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, BufferFull> {
        let free = self.free();
        if data.len() > free {
            return Err(BufferFull {
                requested: data.len(),
                free,
            });
        }
        if data.is_empty() {
            return Ok(0);
        }

        let capacity = self.capacity();

        // Copy up to the physical end of the storage, then wrap to index 0
        // for whatever is left.
        let first = data.len().min(capacity - self.tail);
        self.storage[self.tail..self.tail + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        if rest > 0 {
            self.storage[..rest].copy_from_slice(&data[first..]);
        }

        self.tail = (self.tail + data.len()) % capacity;
        self.used += data.len();
        Ok(data.len())
    }

    /// Removes and returns up to `max` of the oldest bytes.
    ///
    /// Never blocks: returns an empty vector when the buffer is empty.
    pub fn read(&mut self, max: usize) -> Vec<u8> {
        let count = max.min(self.used);
        let mut out = Vec::with_capacity(count);
        if count == 0 {
            return out;
        }

        let capacity = self.capacity();
        let first = count.min(capacity - self.head);
        out.extend_from_slice(&self.storage[self.head..self.head + first]);
        let rest = count - first;
        if rest > 0 {
            out.extend_from_slice(&self.storage[..rest]);
        }

        self.head = (self.head + count) % capacity;
        self.used -= count;
        out
    }

    /// Discards all unread bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.used = 0;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
