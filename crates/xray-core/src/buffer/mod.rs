//! Bounded byte storage shared between the tunnel's event loop and a
//! blocking consumer.

pub mod ring;

pub use ring::{BufferFull, RingBuffer};
