//! Integration tests for the embedded handle against a simulated remote.
//!
//! The handle blocks its caller, so these are plain `#[test]`s; the remote
//! runs on its own runtime (see `common::RemoteThread`).

mod common;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use xray_bridge::domain::HandleConfig;
use xray_bridge::{EventLoop, Transport, TunnelError, WsHandle};
use xray_core::ConnectionState;

use common::{handshake, hold_open, next_data, send_binary, send_text, RemoteThread};

fn fast_config() -> HandleConfig {
    let mut config = HandleConfig::default();
    config.tunnel.handshake_timeout = Duration::from_secs(3);
    config.tunnel.close_grace = Duration::from_millis(200);
    config.poll_interval = Duration::from_millis(50);
    config
}

/// Polls `cond` every 10 ms for up to 3 s.
fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn test_hello_is_available_then_read_before_timeout() {
    // Arrange: device:ok, wait for client:ok, then one payload frame
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        send_binary(&mut ws, b"hello").await;
        hold_open(&mut ws).await;
    });
    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));

    // Act
    assert!(eventually(|| handle.avail() == 5), "avail never reached 5");
    let start = Instant::now();
    let data = assert_ok!(handle.read(5, Some(Duration::from_millis(1000))));

    // Assert
    assert_eq!(data, b"hello");
    assert!(start.elapsed() < Duration::from_millis(1000));
    assert_eq!(handle.avail(), 0);
}

#[test]
fn test_payload_right_behind_device_ok_is_not_lost() {
    // Arrange: the remote does not wait for client:ok before sending data
    let remote = RemoteThread::spawn(|mut ws| async move {
        send_text(&mut ws, "device:ok").await;
        send_binary(&mut ws, b"hello").await;
        hold_open(&mut ws).await;
    });

    // Act
    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));
    let data = assert_ok!(handle.read(5, Some(Duration::from_millis(1000))));

    // Assert
    assert_eq!(data, b"hello");
    assert_eq!(handle.state(), ConnectionState::Streaming);
}

#[test]
fn test_client_ok_is_sent_once_after_device_ok() {
    let (seen_tx, seen_rx) = mpsc::channel();
    let remote = RemoteThread::spawn(move |mut ws| async move {
        send_text(&mut ws, "device:ok").await;
        while let Some(msg) = next_data(&mut ws).await {
            seen_tx.send(msg).ok();
        }
    });

    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));
    let first = seen_rx.recv_timeout(Duration::from_secs(3));
    assert_ok!(handle.write(b"x", Some(Duration::from_secs(1))));
    let second = seen_rx.recv_timeout(Duration::from_secs(3));

    assert_eq!(first, Ok(Message::Text("client:ok".to_string())));
    assert_eq!(second, Ok(Message::Binary(b"x".to_vec())));
}

#[test]
fn test_device_fail_after_ready_ends_reads_and_fails_writes() {
    // Arrange
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        send_text(&mut ws, "device:fail").await;
        hold_open(&mut ws).await;
    });
    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));

    // Act
    let start = Instant::now();
    let data = assert_ok!(handle.read(4, Some(Duration::from_secs(5))));
    let write = handle.write(b"abc", Some(Duration::from_secs(1)));

    // Assert: the read returns as soon as the tunnel fails
    assert!(data.is_empty());
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(matches!(write, Err(TunnelError::CommandFailed(_))));
    assert_eq!(
        handle.state(),
        ConnectionState::Failed("device failed".to_string())
    );
}

#[test]
fn test_device_fail_during_handshake_is_a_connect_error() {
    let remote = RemoteThread::spawn(|mut ws| async move {
        send_text(&mut ws, "device:fail").await;
        hold_open(&mut ws).await;
    });

    let result = WsHandle::connect(&remote.url, fast_config());

    assert!(matches!(result, Err(TunnelError::Connect(_))));
}

#[test]
fn test_missing_device_ok_fails_within_handshake_timeout() {
    // Arrange: the remote upgrades but never says device:ok
    let remote = RemoteThread::spawn(|mut ws| async move {
        hold_open(&mut ws).await;
    });
    let mut config = fast_config();
    config.tunnel.handshake_timeout = Duration::from_millis(300);

    // Act
    let start = Instant::now();
    let result = WsHandle::connect(&remote.url, config);

    // Assert
    assert!(matches!(result, Err(TunnelError::Connect(_))));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_unreachable_endpoint_is_a_connect_error() {
    // Arrange: bind then drop a listener so the port is very likely closed
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };

    let result = WsHandle::connect(&format!("ws://127.0.0.1:{port}/x"), fast_config());

    assert!(matches!(result, Err(TunnelError::Connect(_))));
}

#[test]
fn test_invalid_url_is_rejected_before_connecting() {
    let result = WsHandle::connect("http://example.com/devices/1", fast_config());
    assert!(matches!(result, Err(TunnelError::InvalidUrl(_))));
}

#[test]
fn test_write_arrives_as_one_binary_frame() {
    // Arrange
    let (seen_tx, seen_rx) = mpsc::channel();
    let remote = RemoteThread::spawn(move |mut ws| async move {
        handshake(&mut ws).await;
        let frame = next_data(&mut ws).await;
        seen_tx.send(frame).expect("test alive");
        hold_open(&mut ws).await;
    });
    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));

    // Act
    let written = assert_ok!(handle.write(&[1, 2, 3], Some(Duration::from_secs(2))));

    // Assert
    assert_eq!(written, 3);
    let frame = seen_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("remote saw a frame");
    assert_eq!(frame, Some(Message::Binary(vec![1, 2, 3])));
}

#[test]
fn test_read_without_data_times_out() {
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        hold_open(&mut ws).await;
    });
    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));

    let result = handle.read(1, Some(Duration::from_millis(100)));

    assert_eq!(assert_err!(result), TunnelError::Timeout);
}

#[test]
fn test_close_with_reason_fails_now_and_later() {
    // Arrange
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        hold_open(&mut ws).await;
    });
    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));

    // Act
    let closed = handle.close(Some("device unplugged"));

    // Assert
    let expected = TunnelError::CommandFailed("device unplugged".to_string());
    assert_eq!(closed, Err(expected.clone()));
    assert_eq!(handle.read(1, Some(Duration::from_millis(50))), Err(expected.clone()));
    assert_eq!(handle.write(b"x", None), Err(expected));
}

#[test]
fn test_close_without_reason_ends_reads_quietly() {
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        hold_open(&mut ws).await;
    });
    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));

    assert_ok!(handle.close(None));
    let data = assert_ok!(handle.read(1, Some(Duration::from_secs(3))));

    assert!(data.is_empty());
    assert!(handle.state().is_terminal());
}

#[test]
fn test_remote_close_ends_reads() {
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        send_binary(&mut ws, b"last").await;
        let _ = ws.close(None).await;
    });
    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));

    // Bytes that arrived before the close are still readable.
    let data = assert_ok!(handle.read(4, Some(Duration::from_secs(3))));
    let after = assert_ok!(handle.read(4, Some(Duration::from_secs(3))));

    assert_eq!(data, b"last");
    assert!(after.is_empty());
    assert_eq!(handle.state(), ConnectionState::Closed);
}

#[test]
fn test_frames_are_held_back_until_reader_drains() {
    // Arrange: 8-byte buffer, three 6-byte frames; only one fits at a time
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        send_binary(&mut ws, b"AAAAAA").await;
        send_binary(&mut ws, b"BBBBBB").await;
        send_binary(&mut ws, b"CCCCCC").await;
        hold_open(&mut ws).await;
    });
    let mut config = fast_config();
    config.buffer_capacity = 8;
    let handle = assert_ok!(WsHandle::connect(&remote.url, config));

    // Act
    let mut received = Vec::new();
    for _ in 0..3 {
        received.extend(assert_ok!(handle.read(6, Some(Duration::from_secs(3)))));
    }

    // Assert: nothing lost, nothing reordered
    assert_eq!(received, b"AAAAAABBBBBBCCCCCC");
    assert!(handle.avail() <= 8);
}

#[test]
fn test_read_returns_early_when_incoming_data_is_held_back() {
    // Arrange: 8-byte buffer; the second frame cannot fit behind the first
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        send_binary(&mut ws, b"AAAAAA").await;
        send_binary(&mut ws, b"BBBB").await;
        hold_open(&mut ws).await;
    });
    let mut config = fast_config();
    config.buffer_capacity = 8;
    let handle = assert_ok!(WsHandle::connect(&remote.url, config));

    // Act: ask for more than will ever be buffered at once
    let start = Instant::now();
    let first = assert_ok!(handle.read(8, Some(Duration::from_secs(3))));
    let first_elapsed = start.elapsed();
    let second = assert_ok!(handle.read(4, Some(Duration::from_secs(3))));

    // Assert: the first read does not run to its timeout, and the held
    // frame follows once the buffer drained
    assert_eq!(first, b"AAAAAA");
    assert!(first_elapsed < Duration::from_secs(2));
    assert_eq!(second, b"BBBB");
}

#[test]
fn test_unbounded_read_larger_than_capacity_does_not_hang() {
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        send_binary(&mut ws, b"wxyz").await;
        hold_open(&mut ws).await;
    });
    let mut config = fast_config();
    config.buffer_capacity = 4;
    config.default_timeout = None;
    let handle = assert_ok!(WsHandle::connect(&remote.url, config));

    let data = assert_ok!(handle.read(64, None));

    assert_eq!(data, b"wxyz");
}

#[test]
fn test_frame_larger_than_buffer_fails_tunnel() {
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        send_binary(&mut ws, &[0u8; 16]).await;
        hold_open(&mut ws).await;
    });
    let mut config = fast_config();
    config.buffer_capacity = 4;
    let handle = assert_ok!(WsHandle::connect(&remote.url, config));

    let data = assert_ok!(handle.read(4, Some(Duration::from_secs(3))));

    assert!(data.is_empty());
    assert_eq!(
        handle.state(),
        ConnectionState::Failed("frame exceeds buffer capacity".to_string())
    );
}

#[test]
fn test_upgrade_request_carries_extra_headers() {
    // Arrange: capture the Authorization header during the upgrade
    let (header_tx, header_rx) = mpsc::channel();
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .expect("bind");
    let url = format!("ws://{}/devices/auth", listener.local_addr().expect("addr"));
    runtime.spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let value = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            header_tx.send(value).expect("test alive");
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .expect("upgrade");
        handshake(&mut ws).await;
        hold_open(&mut ws).await;
    });
    let mut config = fast_config();
    config
        .tunnel
        .headers
        .push(("Authorization".to_string(), "Bearer t0k3n".to_string()));

    // Act
    let handle = assert_ok!(WsHandle::connect(&url, config));

    // Assert
    let header = header_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("upgrade seen");
    assert_eq!(header.as_deref(), Some("Bearer t0k3n"));
    drop(handle);
}

#[test]
fn test_serial_number_is_host_and_port() {
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        hold_open(&mut ws).await;
    });
    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));

    let port = remote.url.split(':').nth(2).and_then(|rest| rest.split('/').next());

    assert_eq!(
        handle.serial_number(),
        format!("127.0.0.1:{}", port.expect("port in url"))
    );
}

#[test]
fn test_handles_share_one_event_loop_and_shutdown_releases_readers() {
    // Arrange: two endpoints on one injected loop
    let first = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        hold_open(&mut ws).await;
    });
    let second = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        send_binary(&mut ws, b"two").await;
        hold_open(&mut ws).await;
    });
    let event_loop = assert_ok!(EventLoop::start());
    let a = assert_ok!(WsHandle::connect_on(
        Arc::clone(&event_loop),
        &first.url,
        fast_config()
    ));
    let b = assert_ok!(WsHandle::connect_on(
        Arc::clone(&event_loop),
        &second.url,
        fast_config()
    ));
    assert_eq!(assert_ok!(b.read(3, Some(Duration::from_secs(3)))), b"two");

    // Act: stop the loop twice; the second call is a no-op
    event_loop.shutdown();
    event_loop.shutdown();

    // Assert: a blocked reader is released well before its timeout
    let start = Instant::now();
    let data = assert_ok!(a.read(1, None));
    assert!(data.is_empty());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        b.write(b"x", Some(Duration::from_millis(200))),
        Err(TunnelError::CommandFailed(_))
    ));
}

#[test]
fn test_handle_works_through_transport_trait() {
    // Arrange
    let remote = RemoteThread::spawn(|mut ws| async move {
        handshake(&mut ws).await;
        send_binary(&mut ws, b"he").await;
        send_binary(&mut ws, b"llo").await;
        hold_open(&mut ws).await;
    });
    let handle = assert_ok!(WsHandle::connect(&remote.url, fast_config()));
    let transport: &dyn Transport = &handle;

    // Act
    let data = assert_ok!(transport.read_exact(5, Some(Duration::from_secs(3))));

    // Assert
    assert_eq!(data, b"hello");
}
