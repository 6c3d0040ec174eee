//! End-to-end tunnel sessions driven through the public API only.
//!
//! These tests play both sides of a session by hand: they feed the state
//! machine the frames a remote would send and check the actions it asks the
//! I/O loop to perform.  The sink is a [`RingBuffer`], the same structure the
//! embedded handle reads from.

use xray_core::{
    Action, ConnectionState, ControlMessage, Delivery, FrameSink, RingBuffer, SinkError,
    TunnelMachine,
};

/// Sink backed by a ring buffer, as the embedded handle uses.
struct RingSink {
    ring: RingBuffer,
    last_state: Option<ConnectionState>,
}

impl RingSink {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::with_capacity(capacity),
            last_state: None,
        }
    }
}

impl FrameSink for RingSink {
    type Consumer = ();

    fn attach(&mut self, _consumer: ()) {}

    fn detach(&mut self) {}

    fn deliver(&mut self, payload: &[u8]) -> Result<(), SinkError> {
        if payload.len() > self.ring.capacity() {
            return Err(SinkError::Oversized {
                len: payload.len(),
                capacity: self.ring.capacity(),
            });
        }
        self.ring.write(payload).map(|_| ()).map_err(|_| SinkError::Full)
    }

    fn state_changed(&mut self, state: &ConnectionState) {
        self.last_state = Some(state.clone());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_full_session_from_handshake_to_remote_close() {
    // Arrange
    let mut machine = TunnelMachine::new(RingSink::with_capacity(64));
    machine.on_open();

    // Act: handshake
    let handshake = machine.on_text(ControlMessage::DeviceReady.as_str().as_bytes());
    let attach = machine.attach(()).expect("ready to attach");

    // Assert
    assert_eq!(handshake, vec![Action::ResolveHandshake(Ok(()))]);
    assert_eq!(
        attach,
        vec![Action::SendControl(ControlMessage::ClientReady)]
    );

    // Act: payload, then the remote goes away
    assert_eq!(machine.on_binary(b"hello".to_vec()), Delivery::Delivered);
    assert!(machine.on_disconnect(None).is_empty());

    // Assert: data delivered before the close is still there to read
    assert_eq!(machine.sink_mut().ring.read(64), b"hello");
    assert_eq!(machine.state(), &ConnectionState::Closed);
    assert_eq!(machine.sink().last_state, Some(ConnectionState::Closed));
    assert_eq!(machine.stats().payload_bytes, 5);
}

#[test]
fn test_held_frame_is_delivered_after_consumer_drains() {
    // Arrange: 8-byte ring already holding 6 bytes
    let mut machine = TunnelMachine::new(RingSink::with_capacity(8));
    machine.on_text(b"device:ok");
    machine.attach(()).expect("ready to attach");
    assert_eq!(machine.on_binary(b"AAAAAA".to_vec()), Delivery::Delivered);

    // Act: the next frame does not fit
    let held = match machine.on_binary(b"BBBB".to_vec()) {
        Delivery::Stalled(frame) => frame,
        other => panic!("expected a stalled frame, got {other:?}"),
    };
    let drained = machine.sink_mut().ring.read(6);
    let retried = machine.on_binary(held);

    // Assert: order is preserved and nothing is lost
    assert_eq!(drained, b"AAAAAA");
    assert_eq!(retried, Delivery::Delivered);
    assert_eq!(machine.sink_mut().ring.read(8), b"BBBB");
}

#[test]
fn test_detach_and_reattach_round_trip_control_messages() {
    let mut machine = TunnelMachine::new(RingSink::with_capacity(8));
    machine.on_text(b"device:ok");
    machine.attach(()).expect("ready to attach");

    let detached = machine.detach();
    let reattached = machine.attach(()).expect("ready again");

    assert_eq!(
        detached,
        vec![Action::SendControl(ControlMessage::ClientFailed)]
    );
    assert_eq!(
        reattached,
        vec![Action::SendControl(ControlMessage::ClientReady)]
    );
    assert_eq!(machine.state(), &ConnectionState::Streaming);
}

#[test]
fn test_local_close_is_idempotent() {
    let mut machine = TunnelMachine::new(RingSink::with_capacity(8));
    machine.on_text(b"device:ok");

    let first = machine.close();
    let second = machine.close();
    machine.on_disconnect(None);
    let third = machine.close();

    assert_eq!(first, vec![Action::CloseSocket]);
    assert!(second.is_empty());
    assert!(third.is_empty());
    assert_eq!(machine.state(), &ConnectionState::Closed);
}
